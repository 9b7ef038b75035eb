//! World Kernel: the seam between the audit engine and a live block world.
//!
//! The host world is reached only through [`WorldAccess`]. Mutations that the
//! world performs on behalf of players or the environment are reported to an
//! [`ActionSink`] unless the caller's [`ExecutionContext`] is suppressed.
//!
//! # Invariants
//! - Suppression is scoped to one execution context, never global.
//! - A suppression guard always restores the previous flag, even on unwind.
//! - No-op mutations are never reported.

pub mod context;
pub mod world;

pub use context::{ExecutionContext, SuppressionGuard};
pub use world::{ActionSink, BlockWorld, MAX_BUILD_Y, MIN_BUILD_Y, WorldAccess, WorldError};
