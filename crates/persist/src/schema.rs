//! Table layout and migration bookkeeping.

use rusqlite::Connection;

use crate::store::StoreError;

/// Stored in `PRAGMA user_version`. Bump when the layout below changes.
pub const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS action_records (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  time_epoch INTEGER NOT NULL,
  actor_id TEXT NOT NULL,
  actor_name TEXT NOT NULL,
  world TEXT NOT NULL,
  x INTEGER NOT NULL,
  y INTEGER NOT NULL,
  z INTEGER NOT NULL,
  kind TEXT NOT NULL,
  before_state TEXT,
  after_state TEXT
);

CREATE INDEX IF NOT EXISTS idx_action_records_pos
  ON action_records (world, x, y, z);
CREATE INDEX IF NOT EXISTS idx_action_records_actor
  ON action_records (actor_id, time_epoch);
CREATE INDEX IF NOT EXISTS idx_action_records_time
  ON action_records (world, time_epoch);

CREATE TABLE IF NOT EXISTS rollback_sessions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  time_epoch INTEGER NOT NULL,
  executor TEXT NOT NULL,
  params TEXT NOT NULL,
  restored INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS session_entries (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  session_id INTEGER NOT NULL REFERENCES rollback_sessions (id) ON DELETE CASCADE,
  world TEXT NOT NULL,
  x INTEGER NOT NULL,
  y INTEGER NOT NULL,
  z INTEGER NOT NULL,
  target TEXT NOT NULL DEFAULT 'block',
  before_state TEXT,
  after_state TEXT
);

CREATE INDEX IF NOT EXISTS idx_session_entries_session
  ON session_entries (session_id);
"#;

/// Create missing tables and check the stored schema version.
///
/// Idempotent. A fresh database is stamped with [`SCHEMA_VERSION`]; a
/// database written by a different version is refused.
pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version != 0 && version != SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            file_version: version,
            expected_version: SCHEMA_VERSION,
        });
    }
    conn.execute_batch(SCHEMA)?;
    if version == 0 {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        tracing::debug!(version = SCHEMA_VERSION, "schema created");
    }
    Ok(())
}
