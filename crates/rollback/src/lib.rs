//! Rollback: turn the action log back into world state, parse operator
//! parameters, and render history for operators.
//!
//! # Invariants
//! - Rollback and restore writes never produce new action records.
//! - Every position a rollback writes is recorded in its session.
//! - A rollback run over a window it already reverted applies nothing.
//! - A failed position is counted and skipped; it never aborts the run.

pub mod format;
pub mod orchestrator;
pub mod params;

pub use format::{Page, describe_record, format_history_line, relative_age};
pub use orchestrator::{ApplyReport, Orchestrator, RollbackError, RollbackRequest, SessionRestore};
pub use params::{
    DEFAULT_RADIUS, DEFAULT_SECONDS, DurationError, ParamError, PurgeParams, RollbackParams,
    parse_duration,
};
