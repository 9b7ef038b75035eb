use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use blocklog_codec::{BlockState, ContainerSnapshot, StateCodec};
use blocklog_common::{ActionKind, ActionRecord, Actor, BlockPos, WorldId};

use crate::context::ExecutionContext;

/// Lowest buildable y coordinate in the reference world.
pub const MIN_BUILD_Y: i32 = -64;
/// Highest buildable y coordinate in the reference world.
pub const MAX_BUILD_Y: i32 = 319;

/// Errors from reading or writing world state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorldError {
    #[error("world {0} is not loaded")]
    UnknownWorld(WorldId),
    #[error("{pos} is outside the buildable height of {world}")]
    OutOfBounds { world: WorldId, pos: BlockPos },
    #[error("no container at {pos} in {world}")]
    NoContainer { world: WorldId, pos: BlockPos },
}

/// Read and write access to a live block world.
///
/// Writes take the caller's execution context so the world can decide whether
/// the change is reported to the action log.
pub trait WorldAccess {
    fn block_state(&self, world: &WorldId, pos: BlockPos) -> Result<BlockState, WorldError>;

    fn set_block_state(
        &mut self,
        world: &WorldId,
        pos: BlockPos,
        state: &BlockState,
        ctx: &ExecutionContext,
    ) -> Result<(), WorldError>;

    fn container_contents(
        &self,
        world: &WorldId,
        pos: BlockPos,
    ) -> Result<ContainerSnapshot, WorldError>;

    fn set_container_contents(
        &mut self,
        world: &WorldId,
        pos: BlockPos,
        contents: &ContainerSnapshot,
        ctx: &ExecutionContext,
    ) -> Result<(), WorldError>;
}

/// Receives every logged mutation. Must never block for long or fail.
pub trait ActionSink: Send + Sync {
    fn log_action(&self, record: ActionRecord);
}

/// In-memory block world.
///
/// Unset positions are air. Container contents live beside the block map and
/// are cleared whenever their block is replaced by air. Uses BTreeMap so
/// iteration order is stable.
pub struct BlockWorld {
    worlds: BTreeSet<WorldId>,
    blocks: BTreeMap<(WorldId, BlockPos), BlockState>,
    containers: BTreeMap<(WorldId, BlockPos), ContainerSnapshot>,
    codec: StateCodec,
    sink: Option<Arc<dyn ActionSink>>,
}

impl BlockWorld {
    /// Create a world with no dimensions loaded and no sink attached.
    pub fn new() -> Self {
        Self {
            worlds: BTreeSet::new(),
            blocks: BTreeMap::new(),
            containers: BTreeMap::new(),
            codec: StateCodec::new(),
            sink: None,
        }
    }

    pub fn with_world(mut self, world: impl Into<WorldId>) -> Self {
        self.add_world(world);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ActionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn add_world(&mut self, world: impl Into<WorldId>) {
        self.worlds.insert(world.into());
    }

    pub fn set_sink(&mut self, sink: Option<Arc<dyn ActionSink>>) {
        self.sink = sink;
    }

    pub fn worlds(&self) -> impl Iterator<Item = &WorldId> {
        self.worlds.iter()
    }

    /// Number of non-air blocks across all worlds.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn codec(&self) -> &StateCodec {
        &self.codec
    }

    /// A player breaks the block at `pos`. Returns the state that was there.
    pub fn break_block(
        &mut self,
        actor: &Actor,
        world: &WorldId,
        pos: BlockPos,
        ctx: &ExecutionContext,
    ) -> Result<BlockState, WorldError> {
        self.set_block_as(actor, ActionKind::Break, world, pos, BlockState::air(), ctx)
    }

    /// A player places `state` at `pos`. Returns the state it replaced.
    pub fn place_block(
        &mut self,
        actor: &Actor,
        world: &WorldId,
        pos: BlockPos,
        state: BlockState,
        ctx: &ExecutionContext,
    ) -> Result<BlockState, WorldError> {
        self.set_block_as(actor, ActionKind::Place, world, pos, state, ctx)
    }

    /// Replace the block at `pos` on behalf of `actor`, logging the change
    /// under `kind`. Returns the previous state.
    ///
    /// Replacing a container block with air also empties the container,
    /// which is logged as a separate CONTAINER record.
    pub fn set_block_as(
        &mut self,
        actor: &Actor,
        kind: ActionKind,
        world: &WorldId,
        pos: BlockPos,
        state: BlockState,
        ctx: &ExecutionContext,
    ) -> Result<BlockState, WorldError> {
        let previous = self.block_state(world, pos)?;
        if previous == state {
            return Ok(previous);
        }
        if state.is_air() {
            if let Some(contents) = self.containers.remove(&(world.clone(), pos)) {
                let emptied = ContainerSnapshot::new();
                self.emit(ctx, || {
                    ActionRecord::new(
                        ActionKind::Container,
                        actor.clone(),
                        world.clone(),
                        pos,
                        Some(contents.encode()),
                        Some(emptied.encode()),
                    )
                });
            }
        }
        self.store_block(world, pos, state.clone());
        let before = self.encode_block(&previous);
        let after = self.encode_block(&state);
        self.emit(ctx, || {
            ActionRecord::new(kind, actor.clone(), world.clone(), pos, before, after)
        });
        Ok(previous)
    }

    /// Replace the contents of the container at `pos` on behalf of `actor`.
    pub fn set_container_as(
        &mut self,
        actor: &Actor,
        world: &WorldId,
        pos: BlockPos,
        contents: ContainerSnapshot,
        ctx: &ExecutionContext,
    ) -> Result<ContainerSnapshot, WorldError> {
        let previous = self.container_contents(world, pos)?;
        if previous == contents {
            return Ok(previous);
        }
        let (before, after) = (previous.encode(), contents.encode());
        self.store_container(world, pos, contents);
        self.emit(ctx, || {
            ActionRecord::new(
                ActionKind::Container,
                actor.clone(),
                world.clone(),
                pos,
                Some(before),
                Some(after),
            )
        });
        Ok(previous)
    }

    fn check(&self, world: &WorldId, pos: BlockPos) -> Result<(), WorldError> {
        if !self.worlds.contains(world) {
            return Err(WorldError::UnknownWorld(world.clone()));
        }
        if !(MIN_BUILD_Y..=MAX_BUILD_Y).contains(&pos.y()) {
            return Err(WorldError::OutOfBounds {
                world: world.clone(),
                pos,
            });
        }
        Ok(())
    }

    fn store_block(&mut self, world: &WorldId, pos: BlockPos, state: BlockState) {
        let key = (world.clone(), pos);
        if state.is_air() {
            self.blocks.remove(&key);
            self.containers.remove(&key);
        } else {
            self.blocks.insert(key, state);
        }
    }

    fn store_container(&mut self, world: &WorldId, pos: BlockPos, contents: ContainerSnapshot) {
        let key = (world.clone(), pos);
        if contents.is_empty() {
            self.containers.remove(&key);
        } else {
            self.containers.insert(key, contents);
        }
    }

    /// Air is stored as "nothing there".
    fn encode_block(&self, state: &BlockState) -> Option<String> {
        if state.is_air() {
            None
        } else {
            Some(self.codec.encode_state(state))
        }
    }

    fn emit(&self, ctx: &ExecutionContext, record: impl FnOnce() -> ActionRecord) {
        if ctx.is_suppressed() {
            return;
        }
        let Some(sink) = &self.sink else {
            return;
        };
        let record = record();
        if record.is_noop() {
            return;
        }
        tracing::trace!(
            kind = %record.kind,
            pos = %record.pos,
            actor = %record.actor.name,
            "mutation logged"
        );
        sink.log_action(record);
    }
}

impl Default for BlockWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlockWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockWorld")
            .field("worlds", &self.worlds)
            .field("blocks", &self.blocks.len())
            .field("containers", &self.containers.len())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Writes through the access seam are attributed to the environment.
impl WorldAccess for BlockWorld {
    fn block_state(&self, world: &WorldId, pos: BlockPos) -> Result<BlockState, WorldError> {
        self.check(world, pos)?;
        Ok(self
            .blocks
            .get(&(world.clone(), pos))
            .cloned()
            .unwrap_or_default())
    }

    fn set_block_state(
        &mut self,
        world: &WorldId,
        pos: BlockPos,
        state: &BlockState,
        ctx: &ExecutionContext,
    ) -> Result<(), WorldError> {
        self.set_block_as(
            &Actor::environment(),
            ActionKind::Worldedit,
            world,
            pos,
            state.clone(),
            ctx,
        )
        .map(|_| ())
    }

    fn container_contents(
        &self,
        world: &WorldId,
        pos: BlockPos,
    ) -> Result<ContainerSnapshot, WorldError> {
        self.check(world, pos)?;
        let key = (world.clone(), pos);
        if !self.blocks.contains_key(&key) {
            return Err(WorldError::NoContainer {
                world: world.clone(),
                pos,
            });
        }
        Ok(self.containers.get(&key).cloned().unwrap_or_default())
    }

    fn set_container_contents(
        &mut self,
        world: &WorldId,
        pos: BlockPos,
        contents: &ContainerSnapshot,
        ctx: &ExecutionContext,
    ) -> Result<(), WorldError> {
        self.set_container_as(&Actor::environment(), world, pos, contents.clone(), ctx)
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blocklog_codec::ItemStack;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<ActionRecord>>);

    impl ActionSink for RecordingSink {
        fn log_action(&self, record: ActionRecord) {
            self.0.lock().unwrap().push(record);
        }
    }

    impl RecordingSink {
        fn take(&self) -> Vec<ActionRecord> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    fn overworld() -> WorldId {
        WorldId::new("minecraft:overworld")
    }

    fn setup() -> (BlockWorld, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let world = BlockWorld::new()
            .with_world(overworld())
            .with_sink(sink.clone());
        (world, sink)
    }

    #[test]
    fn unset_positions_are_air() {
        let (world, _) = setup();
        let state = world.block_state(&overworld(), BlockPos::new(0, 64, 0)).unwrap();
        assert!(state.is_air());
        assert_eq!(world.block_count(), 0);
    }

    #[test]
    fn place_and_break_are_logged() {
        let (mut world, sink) = setup();
        let ctx = ExecutionContext::new();
        let alice = Actor::named("Alice");
        let pos = BlockPos::new(10, 64, 10);

        world
            .place_block(&alice, &overworld(), pos, BlockState::new("minecraft:stone"), &ctx)
            .unwrap();
        let prev = world.break_block(&alice, &overworld(), pos, &ctx).unwrap();
        assert_eq!(prev, BlockState::new("minecraft:stone"));

        let records = sink.take();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, ActionKind::Place);
        assert_eq!(records[0].before, None);
        assert_eq!(
            records[0].after.as_deref(),
            Some(r#"{"Name":"minecraft:stone"}"#)
        );
        assert_eq!(records[1].kind, ActionKind::Break);
        assert_eq!(records[1].after, None);
        assert_eq!(records[1].actor.name, "Alice");
    }

    #[test]
    fn noop_writes_are_not_logged() {
        let (mut world, sink) = setup();
        let ctx = ExecutionContext::new();
        let pos = BlockPos::new(0, 0, 0);
        world
            .break_block(&Actor::named("Bob"), &overworld(), pos, &ctx)
            .unwrap();
        assert!(sink.take().is_empty());
    }

    #[test]
    fn suppressed_context_skips_logging() {
        let (mut world, sink) = setup();
        let ctx = ExecutionContext::new();
        let pos = BlockPos::new(1, 2, 3);
        {
            let _guard = ctx.suppress();
            world
                .set_block_state(&overworld(), pos, &BlockState::new("minecraft:dirt"), &ctx)
                .unwrap();
        }
        assert!(sink.take().is_empty());
        assert_eq!(
            world.block_state(&overworld(), pos).unwrap(),
            BlockState::new("minecraft:dirt")
        );

        // A different context keeps logging while another is suppressed.
        let other = ExecutionContext::new();
        let _guard = ctx.suppress();
        world
            .set_block_state(&overworld(), pos, &BlockState::air(), &other)
            .unwrap();
        let records = sink.take();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ActionKind::Worldedit);
        assert!(records[0].actor.id.is_environment());
    }

    #[test]
    fn unknown_world_and_height_are_rejected() {
        let (mut world, _) = setup();
        let ctx = ExecutionContext::new();
        let nether = WorldId::new("minecraft:the_nether");
        assert_eq!(
            world.block_state(&nether, BlockPos::new(0, 0, 0)),
            Err(WorldError::UnknownWorld(nether))
        );
        let err = world
            .set_block_state(
                &overworld(),
                BlockPos::new(0, MAX_BUILD_Y + 1, 0),
                &BlockState::new("minecraft:stone"),
                &ctx,
            )
            .unwrap_err();
        assert!(matches!(err, WorldError::OutOfBounds { .. }));
    }

    #[test]
    fn containers_need_a_block() {
        let (mut world, sink) = setup();
        let ctx = ExecutionContext::new();
        let pos = BlockPos::new(5, 70, 5);
        let chest = ContainerSnapshot::from_slots([(0, ItemStack::new("minecraft:apple", 3))]);

        assert!(matches!(
            world.container_contents(&overworld(), pos),
            Err(WorldError::NoContainer { .. })
        ));

        let alice = Actor::named("Alice");
        world
            .place_block(&alice, &overworld(), pos, BlockState::new("minecraft:chest"), &ctx)
            .unwrap();
        assert!(world.container_contents(&overworld(), pos).unwrap().is_empty());
        world
            .set_container_as(&alice, &overworld(), pos, chest.clone(), &ctx)
            .unwrap();
        assert_eq!(world.container_contents(&overworld(), pos).unwrap(), chest);

        let records = sink.take();
        assert_eq!(records[1].kind, ActionKind::Container);
        assert_eq!(records[1].before.as_deref(), Some("[]"));
        assert_eq!(records[1].after, Some(chest.encode()));
    }

    #[test]
    fn breaking_a_container_logs_its_contents() {
        let (mut world, sink) = setup();
        let ctx = ExecutionContext::new();
        let pos = BlockPos::new(5, 70, 5);
        let bob = Actor::named("Bob");
        let chest = ContainerSnapshot::from_slots([(4, ItemStack::new("minecraft:diamond", 1))]);
        world
            .place_block(&bob, &overworld(), pos, BlockState::new("minecraft:chest"), &ctx)
            .unwrap();
        world
            .set_container_as(&bob, &overworld(), pos, chest.clone(), &ctx)
            .unwrap();
        sink.take();

        world.break_block(&bob, &overworld(), pos, &ctx).unwrap();
        let records = sink.take();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].kind, ActionKind::Container);
        assert_eq!(records[0].before, Some(chest.encode()));
        assert_eq!(records[1].kind, ActionKind::Break);
    }

    #[test]
    fn properties_survive_a_write() {
        let (mut world, _) = setup();
        let ctx = ExecutionContext::new();
        let pos = BlockPos::new(0, 64, 0);
        let log = BlockState::new("minecraft:oak_log").with_property("axis", "x");
        world.set_block_state(&overworld(), pos, &log, &ctx).unwrap();
        assert_eq!(world.block_state(&overworld(), pos).unwrap(), log);
    }
}
