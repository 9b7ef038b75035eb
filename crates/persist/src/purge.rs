//! Retention: delete old records, optionally only for one world or for
//! specific block identifiers.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter};

use blocklog_codec::normalize_id;
use blocklog_common::WorldId;

use crate::store::{ActionStore, StoreError};

/// Which records a purge deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeFilter {
    /// Delete records strictly older than this epoch second.
    pub older_than: i64,
    pub world: Option<WorldId>,
    /// Only records whose before or after state is one of these blocks.
    /// Identifiers without a namespace get the default one.
    pub state_ids: Vec<String>,
    /// Reclaim file space afterwards.
    pub optimize: bool,
}

impl PurgeFilter {
    pub fn older_than(time: i64) -> Self {
        Self {
            older_than: time,
            ..Self::default()
        }
    }
}

impl ActionStore {
    /// Delete matching records in one transaction. Returns how many were
    /// deleted.
    ///
    /// A state id matches a record when either stored blob equals it
    /// verbatim, or the blob decodes (in any stored format) to a block with
    /// that identifier.
    pub fn purge(&self, filter: &PurgeFilter) -> Result<usize, StoreError> {
        let wanted: Vec<String> = filter
            .state_ids
            .iter()
            .map(|raw| {
                normalize_id(raw)
                    .ok_or_else(|| StoreError::Config(format!("invalid block identifier: {raw}")))
            })
            .collect::<Result<_, _>>()?;

        let mut sql = String::from("time_epoch < ?");
        let mut args = vec![Value::Integer(filter.older_than)];
        if let Some(world) = &filter.world {
            sql.push_str(" AND world = ?");
            args.push(Value::Text(world.as_str().to_string()));
        }

        let codec = self.codec();
        let deleted = self.write(|conn| {
            let tx = conn.transaction()?;
            let deleted = if wanted.is_empty() {
                tx.execute(
                    &format!("DELETE FROM action_records WHERE {sql}"),
                    params_from_iter(args),
                )?
            } else {
                let ids: Vec<i64> = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT id, before_state, after_state FROM action_records WHERE {sql}"
                    ))?;
                    let rows = stmt.query_map(params_from_iter(args), |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, Option<String>>(2)?,
                        ))
                    })?;
                    let mut ids = Vec::new();
                    for row in rows {
                        let (id, before, after) = row?;
                        let matches = |blob: &Option<String>| {
                            blob.as_deref().is_some_and(|text| {
                                filter.state_ids.iter().any(|raw| raw == text)
                                    || codec
                                        .identifier_of(text)
                                        .is_some_and(|found| wanted.contains(&found))
                            })
                        };
                        if matches(&before) || matches(&after) {
                            ids.push(id);
                        }
                    }
                    ids
                };
                let mut stmt = tx.prepare_cached("DELETE FROM action_records WHERE id = ?1")?;
                let mut deleted = 0;
                for id in &ids {
                    deleted += stmt.execute(params![id])?;
                }
                deleted
            };
            tx.commit()?;
            if filter.optimize {
                conn.execute_batch("VACUUM")?;
            }
            Ok(deleted)
        })?;

        tracing::info!(
            deleted,
            older_than = filter.older_than,
            world = filter.world.as_ref().map(WorldId::as_str),
            optimize = filter.optimize,
            "purge complete"
        );
        Ok(deleted)
    }
}
