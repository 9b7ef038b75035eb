//! Shared types for the audit engine.
//!
//! # Invariants
//! - Positions are integer block coordinates; distances are computed in `i64`.
//! - An `ActionRecord` is immutable once handed to a store.

pub mod types;

pub use types::{
    ActionKind, ActionRecord, Actor, ActorId, BlockPos, ENVIRONMENT_NAME, UnknownActionKind,
    WorldId, epoch_now,
};
