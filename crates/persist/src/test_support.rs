use blocklog_common::{ActionKind, ActionRecord, Actor, ActorId, BlockPos, WorldId};

use crate::{ActionStore, StoreConfig};

pub(crate) const STONE: &str = r#"{"Name":"minecraft:stone"}"#;
pub(crate) const DIRT: &str = r#"{"Name":"minecraft:dirt"}"#;

pub(crate) fn overworld() -> WorldId {
    WorldId::new("minecraft:overworld")
}

/// Alice places stone at (x, 64, 0).
pub(crate) fn record(time: i64, x: i32) -> ActionRecord {
    ActionRecord::new(
        ActionKind::Place,
        Actor::named("Alice"),
        overworld(),
        BlockPos::new(x, 64, 0),
        None,
        Some(STONE.into()),
    )
    .at(time)
}

pub(crate) fn action(
    time: i64,
    actor: &Actor,
    kind: ActionKind,
    pos: BlockPos,
    before: Option<&str>,
    after: Option<&str>,
) -> ActionRecord {
    ActionRecord::new(
        kind,
        actor.clone(),
        overworld(),
        pos,
        before.map(str::to_string),
        after.map(str::to_string),
    )
    .at(time)
}

pub(crate) fn actor(name: &str) -> Actor {
    Actor::new(ActorId::new(), name)
}

/// In-memory store with `records` committed.
pub(crate) fn store_with(records: impl IntoIterator<Item = ActionRecord>) -> ActionStore {
    let store = ActionStore::open(StoreConfig::in_memory()).unwrap();
    for record in records {
        store.log_action(record);
    }
    store.flush();
    store
}
