//! Session ledger: one row per rollback run, one entry per position it wrote.

use std::fmt;
use std::str::FromStr;

use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;

use blocklog_common::{BlockPos, WorldId, epoch_now};

use crate::query::{from_sql_count, to_sql_count};
use crate::store::{ActionStore, StoreError};

/// Which world interface a session entry was applied through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryTarget {
    Block,
    Container,
}

impl EntryTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Container => "container",
        }
    }
}

impl fmt::Display for EntryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryTarget {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(Self::Block),
            "container" => Ok(Self::Container),
            other => Err(StoreError::Corrupt(format!("unknown session entry target: {other}"))),
        }
    }
}

/// One operator-initiated rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackSession {
    pub id: i64,
    /// Epoch seconds.
    pub time: i64,
    pub executor: String,
    /// Free-form summary of the parameters the rollback ran with.
    pub params: String,
    pub restored: bool,
}

/// One position written by a rollback: what was there, and what the
/// rollback put there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEntry {
    pub world: WorldId,
    pub pos: BlockPos,
    pub target: EntryTarget,
    pub before: Option<String>,
    pub after: Option<String>,
}

/// A persisted session entry with its store-assigned ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredSessionEntry {
    /// Write order within the ledger.
    pub id: i64,
    pub session_id: i64,
    pub entry: SessionEntry,
}

impl ActionStore {
    /// Create the session row up front so the operator gets a stable id
    /// even if nothing ends up being written.
    pub fn begin_rollback_session(&self, executor: &str, params: &str) -> Result<i64, StoreError> {
        self.write(|conn| {
            conn.execute(
                "INSERT INTO rollback_sessions (time_epoch, executor, params, restored) \
                 VALUES (?1, ?2, ?3, 0)",
                params![epoch_now(), executor, params],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn append_session_entry(
        &self,
        session_id: i64,
        entry: &SessionEntry,
    ) -> Result<(), StoreError> {
        self.write(|conn| {
            let mut stmt = conn.prepare_cached(
                "INSERT INTO session_entries \
                 (session_id, world, x, y, z, target, before_state, after_state) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            stmt.execute(params![
                session_id,
                entry.world.as_str(),
                entry.pos.x(),
                entry.pos.y(),
                entry.pos.z(),
                entry.target.as_str(),
                entry.before,
                entry.after,
            ])?;
            Ok(())
        })
    }

    /// Flag a session as restored. Returns false if no such session exists.
    pub fn mark_session_restored(&self, session_id: i64) -> Result<bool, StoreError> {
        self.write(|conn| {
            let changed = conn.execute(
                "UPDATE rollback_sessions SET restored = 1 WHERE id = ?1",
                params![session_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Entries of a session in the order they were written.
    pub fn session_entries_for(&self, session_id: i64) -> Vec<StoredSessionEntry> {
        self.read("session_entries_for", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, session_id, world, x, y, z, target, before_state, after_state \
                 FROM session_entries WHERE session_id = ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![session_id], session_entry)?;
            rows.collect()
        })
    }

    pub fn session(&self, session_id: i64) -> Option<RollbackSession> {
        self.read("session", |conn| {
            conn.query_row(
                "SELECT id, time_epoch, executor, params, restored \
                 FROM rollback_sessions WHERE id = ?1",
                params![session_id],
                rollback_session,
            )
            .optional()
        })
    }

    /// Most recent sessions first.
    pub fn recent_sessions(&self, limit: usize) -> Vec<RollbackSession> {
        self.read("recent_sessions", |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, time_epoch, executor, params, restored \
                 FROM rollback_sessions ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![to_sql_count(limit)], rollback_session)?;
            rows.collect()
        })
    }

    pub fn session_count(&self) -> usize {
        self.read("session_count", |conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM rollback_sessions", [], |row| row.get(0))?;
            Ok(from_sql_count(n))
        })
    }
}

fn rollback_session(row: &Row<'_>) -> rusqlite::Result<RollbackSession> {
    Ok(RollbackSession {
        id: row.get(0)?,
        time: row.get(1)?,
        executor: row.get(2)?,
        params: row.get(3)?,
        restored: row.get(4)?,
    })
}

fn session_entry(row: &Row<'_>) -> rusqlite::Result<StoredSessionEntry> {
    let world: String = row.get(2)?;
    let target: String = row.get(6)?;
    let target = target
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    Ok(StoredSessionEntry {
        id: row.get(0)?,
        session_id: row.get(1)?,
        entry: SessionEntry {
            world: WorldId::from(world),
            pos: BlockPos::new(row.get(3)?, row.get(4)?, row.get(5)?),
            target,
            before: row.get(7)?,
            after: row.get(8)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreConfig;
    use crate::test_support::{DIRT, STONE, overworld};

    fn entry(x: i32, before: Option<&str>, after: Option<&str>) -> SessionEntry {
        SessionEntry {
            world: overworld(),
            pos: BlockPos::new(x, 64, 0),
            target: EntryTarget::Block,
            before: before.map(str::to_string),
            after: after.map(str::to_string),
        }
    }

    #[test]
    fn session_ids_increase() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        let a = store.begin_rollback_session("Op", "r:5 t:1h").unwrap();
        let b = store.begin_rollback_session("Op", "r:5 t:1h").unwrap();
        assert!(b > a);
        assert_eq!(store.session_count(), 2);
    }

    #[test]
    fn empty_session_still_exists() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        let id = store.begin_rollback_session("Op", "r:0").unwrap();
        let session = store.session(id).unwrap();
        assert_eq!(session.executor, "Op");
        assert_eq!(session.params, "r:0");
        assert!(!session.restored);
        assert!(store.session_entries_for(id).is_empty());
    }

    #[test]
    fn entries_keep_write_order() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        let id = store.begin_rollback_session("Op", "").unwrap();
        store.append_session_entry(id, &entry(2, Some(DIRT), None)).unwrap();
        store.append_session_entry(id, &entry(1, None, Some(STONE))).unwrap();
        let mut chest = entry(3, Some("[]"), Some("[]"));
        chest.target = EntryTarget::Container;
        store.append_session_entry(id, &chest).unwrap();

        let entries = store.session_entries_for(id);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry, entry(2, Some(DIRT), None));
        assert_eq!(entries[2].entry.target, EntryTarget::Container);
        assert!(entries.iter().all(|stored| stored.session_id == id));
        assert!(entries[0].id < entries[1].id && entries[1].id < entries[2].id);
    }

    #[test]
    fn unknown_target_is_corruption() {
        assert_eq!("container".parse::<EntryTarget>().unwrap(), EntryTarget::Container);
        assert!(matches!("furnace".parse::<EntryTarget>(), Err(StoreError::Corrupt(_))));

        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        let id = store.begin_rollback_session("Op", "").unwrap();
        store.append_session_entry(id, &entry(0, None, Some(STONE))).unwrap();
        store
            .write(|conn| {
                conn.execute("UPDATE session_entries SET target = 'furnace'", [])?;
                Ok(())
            })
            .unwrap();
        // Unreadable rows fail the read, which answers empty.
        assert!(store.session_entries_for(id).is_empty());
    }

    #[test]
    fn entries_require_a_session() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        let err = store.append_session_entry(99, &entry(0, None, None)).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)));
    }

    #[test]
    fn mark_restored() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        let id = store.begin_rollback_session("Op", "").unwrap();
        assert!(store.mark_session_restored(id).unwrap());
        assert!(store.mark_session_restored(id).unwrap());
        assert!(store.session(id).unwrap().restored);
        assert!(!store.mark_session_restored(id + 1).unwrap());
    }

    #[test]
    fn recent_sessions_newest_first() {
        let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
        let ids: Vec<i64> = (0..4)
            .map(|_| store.begin_rollback_session("Op", "").unwrap())
            .collect();
        let recent: Vec<i64> = store.recent_sessions(2).iter().map(|s| s.id).collect();
        assert_eq!(recent, [ids[3], ids[2]]);
    }

    #[test]
    fn unavailable_store_cannot_begin_sessions() {
        let store = ActionStore::unavailable(StoreConfig::in_memory());
        assert!(matches!(
            store.begin_rollback_session("Op", ""),
            Err(StoreError::Unavailable)
        ));
        assert!(store.session(1).is_none());
        assert!(store.recent_sessions(5).is_empty());
    }
}
