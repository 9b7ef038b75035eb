//! Writer thread: drains the producer queue and commits records in batches.

use crossbeam_channel::{Receiver, Sender};
use rusqlite::{Connection, Transaction, params};

use blocklog_common::ActionRecord;

use crate::store::{Counters, Shared};

/// Messages accepted by the writer thread.
pub(crate) enum WriterMsg {
    Record(ActionRecord),
    /// Commit everything received so far, then acknowledge.
    Flush(Sender<()>),
}

const INSERT_ACTION: &str = "INSERT INTO action_records \
     (time_epoch, actor_id, actor_name, world, x, y, z, kind, before_state, after_state) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

/// Writer loop. Blocks for the first message, then takes whatever else is
/// already queued up to `batch_size` and commits it as one transaction.
///
/// Returns once every sender is gone and the queue is empty.
pub(crate) fn run(shared: &Shared, rx: &Receiver<WriterMsg>, batch_size: usize) {
    let mut batch: Vec<ActionRecord> = Vec::with_capacity(batch_size);
    let mut acks: Vec<Sender<()>> = Vec::new();

    while let Ok(first) = rx.recv() {
        push(first, &mut batch, &mut acks);
        while batch.len() < batch_size && acks.is_empty() {
            match rx.try_recv() {
                Ok(msg) => push(msg, &mut batch, &mut acks),
                Err(_) => break,
            }
        }
        write_batch(shared, &mut batch);
        for ack in acks.drain(..) {
            let _ = ack.send(());
        }
    }
    tracing::debug!("writer thread drained, exiting");
}

fn push(msg: WriterMsg, batch: &mut Vec<ActionRecord>, acks: &mut Vec<Sender<()>>) {
    match msg {
        WriterMsg::Record(record) => batch.push(record),
        WriterMsg::Flush(ack) => acks.push(ack),
    }
}

fn write_batch(shared: &Shared, batch: &mut Vec<ActionRecord>) {
    if batch.is_empty() {
        return;
    }
    let _span = tracing::debug_span!("writer_batch", size = batch.len()).entered();
    let mut conn = shared.conn.lock();
    let Some(conn) = conn.as_mut() else {
        tracing::error!(lost = batch.len(), "connection released before batch was written");
        Counters::add(&shared.counters.dropped, batch.len());
        batch.clear();
        return;
    };
    match commit_batch(conn, batch) {
        Ok(()) => {
            Counters::add(&shared.counters.committed, batch.len());
            Counters::add(&shared.counters.batches, 1);
        }
        Err(e) => {
            tracing::error!(lost = batch.len(), "batch write failed, rolled back: {e}");
            Counters::add(&shared.counters.dropped, batch.len());
        }
    }
    batch.clear();
}

/// Insert `records` in one transaction. Dropping the transaction on error
/// rolls it back.
pub(crate) fn commit_batch(
    conn: &mut Connection,
    records: &[ActionRecord],
) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    for record in records {
        insert_record(&tx, record)?;
    }
    tx.commit()
}

fn insert_record(tx: &Transaction<'_>, record: &ActionRecord) -> rusqlite::Result<()> {
    let mut stmt = tx.prepare_cached(INSERT_ACTION)?;
    stmt.execute(params![
        record.time,
        record.actor.id.to_string(),
        record.actor.name,
        record.world.as_str(),
        record.pos.x(),
        record.pos.y(),
        record.pos.z(),
        record.kind.as_str(),
        record.before,
        record.after,
    ])?;
    Ok(())
}
