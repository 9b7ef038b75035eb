//! Read side: per-position history and spatiotemporal lookups.
//!
//! Area queries narrow by bounding box first (served by the position index)
//! and then apply the exact sphere test in SQL, so `LIMIT`/`OFFSET` page over
//! exact results. Every read returns empty or zero when the store is
//! unavailable.

use rusqlite::types::{Type, Value};
use rusqlite::{Connection, Row, params, params_from_iter};

use blocklog_common::{ActionKind, ActionRecord, Actor, ActorId, BlockPos, WorldId};

use crate::store::ActionStore;

const RECORD_COLUMNS: &str =
    "id, time_epoch, actor_id, actor_name, world, x, y, z, kind, before_state, after_state";

/// A persisted record with its store-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAction {
    /// Insertion order; breaks ties between equal timestamps.
    pub id: i64,
    pub record: ActionRecord,
}

/// Spatial, temporal and actor filter shared by lookups and rollback
/// candidate selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaQuery {
    pub world: WorldId,
    pub center: BlockPos,
    /// Sphere radius in blocks, boundary inclusive. Negative is treated as 0.
    pub radius: i32,
    /// Only records at or after this epoch second.
    pub since: Option<i64>,
    /// Actor display name (case-insensitive) or actor id.
    pub actor: Option<String>,
}

impl AreaQuery {
    pub fn new(world: impl Into<WorldId>, center: BlockPos, radius: i32) -> Self {
        Self {
            world: world.into(),
            center,
            radius,
            since: None,
            actor: None,
        }
    }

    pub fn since(mut self, time: i64) -> Self {
        self.since = Some(time);
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Whether a record falls inside the query's world and sphere.
    pub fn covers(&self, record: &ActionRecord) -> bool {
        record.world == self.world && record.pos.within_radius(self.center, self.radius.max(0))
    }

    /// `WHERE` clause and its positional arguments.
    fn filter(&self) -> (String, Vec<Value>) {
        let radius = self.radius.max(0);
        let (min, max) = self.center.bounds(radius);
        let (cx, cy, cz) = (
            i64::from(self.center.x()),
            i64::from(self.center.y()),
            i64::from(self.center.z()),
        );
        let mut sql = String::from(
            "world = ? \
             AND x BETWEEN ? AND ? AND y BETWEEN ? AND ? AND z BETWEEN ? AND ? \
             AND ((x - ?) * (x - ?) + (y - ?) * (y - ?) + (z - ?) * (z - ?)) <= ?",
        );
        let mut args: Vec<Value> = vec![
            Value::Text(self.world.as_str().to_string()),
            Value::Integer(min.x().into()),
            Value::Integer(max.x().into()),
            Value::Integer(min.y().into()),
            Value::Integer(max.y().into()),
            Value::Integer(min.z().into()),
            Value::Integer(max.z().into()),
            Value::Integer(cx),
            Value::Integer(cx),
            Value::Integer(cy),
            Value::Integer(cy),
            Value::Integer(cz),
            Value::Integer(cz),
            Value::Integer(i64::from(radius) * i64::from(radius)),
        ];
        if let Some(since) = self.since {
            sql.push_str(" AND time_epoch >= ?");
            args.push(Value::Integer(since));
        }
        if let Some(actor) = &self.actor {
            sql.push_str(" AND (actor_name = ? COLLATE NOCASE OR actor_id = ?)");
            args.push(Value::Text(actor.clone()));
            args.push(Value::Text(actor.to_ascii_lowercase()));
        }
        (sql, args)
    }
}

impl ActionStore {
    /// Records at exactly `pos`, newest first.
    pub fn history_at(
        &self,
        world: &WorldId,
        pos: BlockPos,
        limit: usize,
        offset: usize,
    ) -> Vec<StoredAction> {
        self.read("history_at", |conn| {
            let sql = format!(
                "SELECT {RECORD_COLUMNS} FROM action_records \
                 WHERE world = ?1 AND x = ?2 AND y = ?3 AND z = ?4 \
                 ORDER BY time_epoch DESC, id DESC LIMIT ?5 OFFSET ?6"
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(
                params![
                    world.as_str(),
                    pos.x(),
                    pos.y(),
                    pos.z(),
                    to_sql_count(limit),
                    to_sql_count(offset)
                ],
                stored_action,
            )?;
            rows.collect()
        })
    }

    pub fn count_at(&self, world: &WorldId, pos: BlockPos) -> usize {
        self.read("count_at", |conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM action_records \
                 WHERE world = ?1 AND x = ?2 AND y = ?3 AND z = ?4",
                params![world.as_str(), pos.x(), pos.y(), pos.z()],
                |row| row.get(0),
            )?;
            Ok(from_sql_count(n))
        })
    }

    /// Records inside the query sphere, newest first, one page at a time.
    pub fn lookup_history(
        &self,
        query: &AreaQuery,
        limit: usize,
        offset: usize,
    ) -> Vec<StoredAction> {
        let (filter, mut args) = query.filter();
        args.push(Value::Integer(to_sql_count(limit)));
        args.push(Value::Integer(to_sql_count(offset)));
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM action_records WHERE {filter} \
             ORDER BY time_epoch DESC, id DESC LIMIT ? OFFSET ?"
        );
        self.read("lookup_history", |conn| select(conn, &sql, args))
    }

    pub fn count_lookup(&self, query: &AreaQuery) -> usize {
        let (filter, args) = query.filter();
        let sql = format!("SELECT COUNT(*) FROM action_records WHERE {filter}");
        self.read("count_lookup", |conn| {
            let n: i64 = conn.query_row(&sql, params_from_iter(args), |row| row.get(0))?;
            Ok(from_sql_count(n))
        })
    }

    /// Rollback candidates: newest first, so the oldest "before" state is
    /// the last one written at each position.
    pub fn actions_for_rollback(&self, query: &AreaQuery) -> Vec<StoredAction> {
        self.ordered(query, "DESC", "actions_for_rollback")
    }

    /// Restore candidates: oldest first, so the newest "after" state wins.
    pub fn actions_for_restore(&self, query: &AreaQuery) -> Vec<StoredAction> {
        self.ordered(query, "ASC", "actions_for_restore")
    }

    fn ordered(&self, query: &AreaQuery, direction: &str, op: &str) -> Vec<StoredAction> {
        let (filter, args) = query.filter();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM action_records WHERE {filter} \
             ORDER BY time_epoch {direction}, id {direction}"
        );
        let mut actions = self.read(op, |conn| select(conn, &sql, args));
        // Candidates drive world writes; nothing outside the sphere gets through.
        actions.retain(|action| query.covers(&action.record));
        actions
    }

    /// Total number of logged records.
    pub fn record_count(&self) -> usize {
        self.read("record_count", |conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM action_records", [], |row| row.get(0))?;
            Ok(from_sql_count(n))
        })
    }
}

fn select(conn: &Connection, sql: &str, args: Vec<Value>) -> rusqlite::Result<Vec<StoredAction>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params_from_iter(args), stored_action)?;
    rows.collect()
}

fn stored_action(row: &Row<'_>) -> rusqlite::Result<StoredAction> {
    let actor_id: String = row.get(2)?;
    let actor_id: ActorId = actor_id
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let kind: String = row.get(8)?;
    let kind: ActionKind = kind
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;
    let world: String = row.get(4)?;
    Ok(StoredAction {
        id: row.get(0)?,
        record: ActionRecord {
            time: row.get(1)?,
            actor: Actor::new(actor_id, row.get::<_, String>(3)?),
            world: WorldId::from(world),
            pos: BlockPos::new(row.get(5)?, row.get(6)?, row.get(7)?),
            kind,
            before: row.get(9)?,
            after: row.get(10)?,
        },
    })
}

pub(crate) fn to_sql_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

pub(crate) fn from_sql_count(n: i64) -> usize {
    usize::try_from(n).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DIRT, STONE, action, actor, overworld, record, store_with};
    use crate::{ActionStore, StoreConfig};

    fn at(x: i32, y: i32, z: i32) -> BlockPos {
        BlockPos::new(x, y, z)
    }

    #[test]
    fn history_is_newest_first() {
        let alice = actor("Alice");
        let pos = at(10, 64, 10);
        let store = store_with([
            action(1000, &alice, ActionKind::Place, pos, None, Some(STONE)),
            action(3000, &alice, ActionKind::Break, pos, Some(STONE), None),
            action(2000, &alice, ActionKind::Place, pos, None, Some(DIRT)),
            action(2500, &alice, ActionKind::Place, at(0, 0, 0), None, Some(DIRT)),
        ]);
        let times: Vec<i64> = store
            .history_at(&overworld(), pos, 10, 0)
            .iter()
            .map(|a| a.record.time)
            .collect();
        assert_eq!(times, [3000, 2000, 1000]);
        assert_eq!(store.count_at(&overworld(), pos), 3);
    }

    #[test]
    fn history_pages() {
        let store = store_with((0..7).map(|i| record(1000 + i, 0)));
        let world = overworld();
        let pos = at(0, 64, 0);
        assert_eq!(store.history_at(&world, pos, 5, 0).len(), 5);
        let last = store.history_at(&world, pos, 5, 5);
        assert_eq!(last.len(), 2);
        assert_eq!(last[1].record.time, 1000);
        assert!(store.history_at(&world, pos, 5, 10).is_empty());
    }

    #[test]
    fn equal_timestamps_order_by_insertion() {
        let store = store_with((0..3).map(|x| record(1000, x)));
        let xs: Vec<i32> = store
            .lookup_history(&AreaQuery::new(overworld(), at(0, 64, 0), 5), 10, 0)
            .iter()
            .map(|a| a.record.pos.x())
            .collect();
        assert_eq!(xs, [2, 1, 0]);
    }

    #[test]
    fn radius_is_exact_and_inclusive() {
        let alice = actor("Alice");
        let center = at(0, 64, 0);
        // Distances 4, 5 and 6 from the center; the box corner (5,69,5) is outside the sphere.
        let store = store_with([
            action(1000, &alice, ActionKind::Place, at(4, 64, 0), None, Some(STONE)),
            action(1000, &alice, ActionKind::Place, at(3, 68, 0), None, Some(STONE)),
            action(1000, &alice, ActionKind::Place, at(0, 64, 6), None, Some(STONE)),
            action(1000, &alice, ActionKind::Place, at(5, 69, 5), None, Some(STONE)),
        ]);
        let query = AreaQuery::new(overworld(), center, 5);
        let found: Vec<BlockPos> = store
            .lookup_history(&query, 10, 0)
            .iter()
            .map(|a| a.record.pos)
            .collect();
        assert_eq!(found, [at(3, 68, 0), at(4, 64, 0)]);
        assert_eq!(store.count_lookup(&query), 2);
        assert_eq!(store.actions_for_rollback(&query).len(), 2);
    }

    #[test]
    fn covers_matches_the_sql_sphere() {
        let query = AreaQuery::new(overworld(), at(0, 64, 0), 5);
        assert!(query.covers(&record(1000, 5)));
        assert!(!query.covers(&record(1000, 6)));
        let mut elsewhere = record(1000, 0);
        elsewhere.world = WorldId::new("minecraft:the_end");
        assert!(!query.covers(&elsewhere));

        let store = store_with((0..8).map(|x| record(1000, x)));
        let candidates = store.actions_for_rollback(&query);
        assert_eq!(candidates.len(), 6);
        assert!(candidates.iter().all(|a| query.covers(&a.record)));
    }

    #[test]
    fn time_and_actor_filters() {
        let alice = actor("Alice");
        let bob = actor("Bob");
        let pos = at(0, 64, 0);
        let store = store_with([
            action(1000, &alice, ActionKind::Place, pos, None, Some(STONE)),
            action(2000, &bob, ActionKind::Break, pos, Some(STONE), None),
            action(3000, &alice, ActionKind::Place, pos, None, Some(DIRT)),
        ]);
        let query = AreaQuery::new(overworld(), pos, 0);
        assert_eq!(store.count_lookup(&query.clone().since(2000)), 2);
        assert_eq!(store.count_lookup(&query.clone().actor("alice")), 2);
        assert_eq!(store.count_lookup(&query.clone().actor("ALICE").since(1500)), 1);
        assert_eq!(store.count_lookup(&query.clone().actor(bob.id.to_string())), 1);
        assert_eq!(store.count_lookup(&query.actor("Carol")), 0);
    }

    #[test]
    fn other_worlds_are_excluded() {
        let alice = actor("Alice");
        let pos = at(0, 64, 0);
        let mut nether = action(1000, &alice, ActionKind::Place, pos, None, Some(STONE));
        nether.world = WorldId::new("minecraft:the_nether");
        let store = store_with([nether, record(1000, 0)]);
        assert_eq!(store.count_lookup(&AreaQuery::new(overworld(), pos, 3)), 1);
    }

    #[test]
    fn rollback_and_restore_orderings() {
        // BREAK stone at t=1000 by Alice, then PLACE dirt at t=1100 by Bob.
        let alice = actor("Alice");
        let bob = actor("Bob");
        let pos = at(10, 64, 10);
        let store = store_with([
            action(1000, &alice, ActionKind::Break, pos, Some(STONE), None),
            action(1100, &bob, ActionKind::Place, pos, None, Some(DIRT)),
        ]);
        let query = AreaQuery::new(overworld(), pos, 0).since(900);
        let kinds: Vec<ActionKind> = store
            .actions_for_rollback(&query)
            .iter()
            .map(|a| a.record.kind)
            .collect();
        assert_eq!(kinds, [ActionKind::Place, ActionKind::Break]);
        let kinds: Vec<ActionKind> = store
            .actions_for_restore(&query)
            .iter()
            .map(|a| a.record.kind)
            .collect();
        assert_eq!(kinds, [ActionKind::Break, ActionKind::Place]);
    }

    #[test]
    fn records_round_trip_through_columns() {
        let alice = actor("Alice");
        let original = action(
            1234,
            &alice,
            ActionKind::Container,
            at(-5, -60, 7),
            Some("[]"),
            Some(r#"[{"slot":0,"item":"minecraft:apple","count":1}]"#),
        );
        let store = store_with([original.clone()]);
        let stored = store.history_at(&overworld(), at(-5, -60, 7), 1, 0);
        assert_eq!(stored[0].record, original);
        assert!(stored[0].id > 0);
    }

    #[test]
    fn unavailable_store_reads_empty() {
        let store = ActionStore::unavailable(StoreConfig::in_memory());
        let query = AreaQuery::new(overworld(), at(0, 0, 0), 10);
        assert!(store.lookup_history(&query, 10, 0).is_empty());
        assert!(store.actions_for_rollback(&query).is_empty());
        assert_eq!(store.count_lookup(&query), 0);
        assert_eq!(store.count_at(&overworld(), at(0, 0, 0)), 0);
        assert_eq!(store.record_count(), 0);
    }
}
