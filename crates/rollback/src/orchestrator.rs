use std::collections::HashMap;
use std::fmt;

use blocklog_codec::{BlockState, ContainerSnapshot, StateCodec};
use blocklog_common::{ActionRecord, BlockPos, WorldId, epoch_now};
use blocklog_kernel::{ExecutionContext, WorldAccess, WorldError};
use blocklog_persist::{ActionStore, AreaQuery, EntryTarget, SessionEntry, StoreError, StoredAction};

use crate::params::RollbackParams;

/// Errors that abort a whole rollback or restore run.
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("action store is unavailable")]
    StoreUnavailable,
    #[error("could not create rollback session: {0}")]
    SessionCreate(#[source] StoreError),
}

/// A rollback or window restore: where, and with which parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackRequest {
    pub world: WorldId,
    pub center: BlockPos,
    pub params: RollbackParams,
    /// Epoch second the time window is measured back from.
    pub now: i64,
}

impl RollbackRequest {
    pub fn new(world: impl Into<WorldId>, center: BlockPos, params: RollbackParams) -> Self {
        Self {
            world: world.into(),
            center,
            params,
            now: epoch_now(),
        }
    }

    pub fn at(mut self, now: i64) -> Self {
        self.now = now;
        self
    }

    pub fn query(&self) -> AreaQuery {
        AreaQuery {
            world: self.world.clone(),
            center: self.center,
            radius: self.params.radius,
            since: Some(self.params.since(self.now)),
            actor: self.params.actor.clone(),
        }
    }
}

/// Outcome counts of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Session created (rollback) or replayed (restore by session).
    pub session_id: Option<i64>,
    pub candidates: usize,
    pub applied: usize,
    /// Already in the target state.
    pub skipped: usize,
    /// Could not be read, decoded or written.
    pub failed: usize,
}

impl fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.session_id {
            write!(f, "session #{id}: ")?;
        }
        write!(
            f,
            "{} of {} applied ({} skipped, {} failed)",
            self.applied, self.candidates, self.skipped, self.failed
        )
    }
}

/// Result of restoring a rollback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRestore {
    /// Unknown id, or a session that wrote nothing.
    NotFound(i64),
    Restored(ApplyReport),
}

enum Step {
    Applied(SessionEntry),
    Skipped,
}

/// State to write at a position, through the block or the container interface.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Block(BlockState),
    Container(ContainerSnapshot),
}

impl Target {
    fn kind(&self) -> EntryTarget {
        match self {
            Self::Block(_) => EntryTarget::Block,
            Self::Container(_) => EntryTarget::Container,
        }
    }
}

type PositionKey = (WorldId, BlockPos, EntryTarget);

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    World(#[from] WorldError),
    #[error("unreadable container snapshot: {0}")]
    Snapshot(#[from] blocklog_codec::CodecError),
}

/// Turns stored history into world writes.
///
/// Every write happens under a suppressed execution context so the run does
/// not log itself. Rollbacks record what they wrote in a session so they can
/// be restored later.
pub struct Orchestrator<'a> {
    store: &'a ActionStore,
    codec: &'a StateCodec,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a ActionStore, codec: &'a StateCodec) -> Self {
        Self { store, codec }
    }

    /// Revert everything inside the request window, newest first.
    ///
    /// Writes that would not change anything are skipped, as are positions
    /// already back in their pre-window state, so running the same rollback
    /// twice applies nothing the second time.
    pub fn rollback<W: WorldAccess + ?Sized>(
        &self,
        world: &mut W,
        ctx: &ExecutionContext,
        executor: &str,
        request: &RollbackRequest,
    ) -> Result<ApplyReport, RollbackError> {
        self.require_store()?;
        let session_id = self
            .store
            .begin_rollback_session(executor, &request.params.to_string())
            .map_err(RollbackError::SessionCreate)?;
        let _span = tracing::info_span!("rollback", session_id, world = %request.world).entered();

        let candidates = self.store.actions_for_rollback(&request.query());
        let mut report = ApplyReport {
            session_id: Some(session_id),
            candidates: candidates.len(),
            ..ApplyReport::default()
        };
        tracing::info!(candidates = report.candidates, %executor, "rollback started");

        let finals = self.final_targets(&candidates);
        let _guard = ctx.suppress();
        for candidate in &candidates {
            let record = &candidate.record;
            match self.revert(world, ctx, record, &finals) {
                Ok(Step::Applied(entry)) => {
                    report.applied += 1;
                    if let Err(e) = self.store.append_session_entry(session_id, &entry) {
                        tracing::warn!(pos = %record.pos, "session entry not recorded: {e}");
                    }
                }
                Ok(Step::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        id = candidate.id,
                        pos = %record.pos,
                        "rollback skipped position: {e}"
                    );
                }
            }
        }
        tracing::info!(%report, "rollback complete");
        Ok(report)
    }

    /// Re-apply everything inside the request window, oldest first.
    pub fn restore<W: WorldAccess + ?Sized>(
        &self,
        world: &mut W,
        ctx: &ExecutionContext,
        request: &RollbackRequest,
    ) -> Result<ApplyReport, RollbackError> {
        self.require_store()?;
        let _span = tracing::info_span!("restore", world = %request.world).entered();

        let candidates = self.store.actions_for_restore(&request.query());
        let mut report = ApplyReport {
            candidates: candidates.len(),
            ..ApplyReport::default()
        };

        let _guard = ctx.suppress();
        for candidate in &candidates {
            let record = &candidate.record;
            let result = self
                .decode(record.kind.is_container(), record.after.as_deref())
                .and_then(|target| write(world, ctx, &record.world, record.pos, &target));
            match result {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        id = candidate.id,
                        pos = %record.pos,
                        "restore skipped position: {e}"
                    );
                }
            }
        }
        tracing::info!(%report, "restore complete");
        Ok(report)
    }

    /// Undo a rollback session by writing back what each of its entries
    /// replaced, latest entry first, then flag the session restored.
    ///
    /// Restoring an already restored session replays it again.
    pub fn restore_session<W: WorldAccess + ?Sized>(
        &self,
        world: &mut W,
        ctx: &ExecutionContext,
        session_id: i64,
    ) -> Result<SessionRestore, RollbackError> {
        self.require_store()?;
        let _span = tracing::info_span!("restore_session", session_id).entered();

        let entries = self.store.session_entries_for(session_id);
        if entries.is_empty() {
            tracing::info!("session not found or empty");
            return Ok(SessionRestore::NotFound(session_id));
        }
        if self.store.session(session_id).is_some_and(|s| s.restored) {
            tracing::warn!("session was already restored, replaying it again");
        }

        let mut report = ApplyReport {
            session_id: Some(session_id),
            candidates: entries.len(),
            ..ApplyReport::default()
        };
        {
            let _guard = ctx.suppress();
            for entry in entries.iter().rev().map(|stored| &stored.entry) {
                let result = self
                    .decode(entry.target == EntryTarget::Container, entry.before.as_deref())
                    .and_then(|target| write(world, ctx, &entry.world, entry.pos, &target));
                match result {
                    Ok(()) => report.applied += 1,
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(pos = %entry.pos, "session restore skipped position: {e}");
                    }
                }
            }
        }

        if let Err(e) = self.store.mark_session_restored(session_id) {
            tracing::error!("could not flag session restored: {e}");
        }
        tracing::info!(%report, "session restore complete");
        Ok(SessionRestore::Restored(report))
    }

    fn require_store(&self) -> Result<(), RollbackError> {
        if self.store.is_available() {
            Ok(())
        } else {
            Err(RollbackError::StoreUnavailable)
        }
    }

    /// Decode a stored blob into something writable.
    fn decode(&self, container: bool, blob: Option<&str>) -> Result<Target, StepError> {
        if container {
            Ok(Target::Container(ContainerSnapshot::parse(
                blob.unwrap_or_default(),
            )?))
        } else {
            Ok(Target::Block(self.codec.decode(blob)))
        }
    }

    /// Pre-window state of every position: the "before" of the oldest
    /// candidate there. Candidates arrive newest first, so the last one wins.
    fn final_targets(&self, candidates: &[StoredAction]) -> HashMap<PositionKey, Target> {
        let mut finals = HashMap::new();
        for candidate in candidates {
            let record = &candidate.record;
            if let Ok(target) = self.decode(record.kind.is_container(), record.before.as_deref()) {
                finals.insert((record.world.clone(), record.pos, target.kind()), target);
            }
        }
        finals
    }

    /// Put one position back to the record's "before" state. Positions
    /// already in their pre-window state are left alone.
    fn revert<W: WorldAccess + ?Sized>(
        &self,
        world: &mut W,
        ctx: &ExecutionContext,
        record: &ActionRecord,
        finals: &HashMap<PositionKey, Target>,
    ) -> Result<Step, StepError> {
        let target = self.decode(record.kind.is_container(), record.before.as_deref())?;
        let current = read(world, &record.world, record.pos, target.kind())?;
        let settled = finals
            .get(&(record.world.clone(), record.pos, target.kind()))
            .is_some_and(|pre_window| *pre_window == current);
        if current == target || settled {
            return Ok(Step::Skipped);
        }
        write(world, ctx, &record.world, record.pos, &target)?;
        Ok(Step::Applied(SessionEntry {
            world: record.world.clone(),
            pos: record.pos,
            target: target.kind(),
            before: self.encode(&current),
            after: self.encode(&target),
        }))
    }

    /// Session ledger form: air is "nothing there", containers are snapshots.
    fn encode(&self, target: &Target) -> Option<String> {
        match target {
            Target::Block(state) if state.is_air() => None,
            Target::Block(state) => Some(self.codec.encode_state(state)),
            Target::Container(contents) => Some(contents.encode()),
        }
    }
}

fn read<W: WorldAccess + ?Sized>(
    world: &W,
    world_id: &WorldId,
    pos: BlockPos,
    kind: EntryTarget,
) -> Result<Target, StepError> {
    Ok(match kind {
        EntryTarget::Block => Target::Block(world.block_state(world_id, pos)?),
        EntryTarget::Container => Target::Container(world.container_contents(world_id, pos)?),
    })
}

fn write<W: WorldAccess + ?Sized>(
    world: &mut W,
    ctx: &ExecutionContext,
    world_id: &WorldId,
    pos: BlockPos,
    target: &Target,
) -> Result<(), StepError> {
    match target {
        Target::Block(state) => world.set_block_state(world_id, pos, state, ctx)?,
        Target::Container(contents) => world.set_container_contents(world_id, pos, contents, ctx)?,
    }
    Ok(())
}
