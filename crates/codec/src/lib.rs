//! State codec and container diffing.
//!
//! The store treats encoded states as opaque strings. This crate is the one
//! place that knows how to turn them back into values: block states through an
//! ordered chain of decoders (current format first, legacy formats after), and
//! container contents through snapshots that can be diffed for display.
//!
//! # Invariants
//! - Decoding never fails; unknown input degrades to the air sentinel.
//! - Encoding is deterministic: equal states produce equal strings.

mod codec;
mod container;
mod state;

pub use codec::{BareIdDecoder, PropertyListDecoder, StateCodec, StateDecoder, TaggedDecoder};
pub use container::{
    ContainerChange, ContainerSnapshot, ItemCount, ItemGroup, ItemKey, ItemStack, describe_change,
};
pub use state::{AIR_ID, BlockState, DEFAULT_NAMESPACE, normalize_id};

/// Errors from parsing encoded values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a container snapshot: {0}")]
    NotASnapshot(String),
}
