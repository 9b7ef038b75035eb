use std::collections::BTreeMap;

use crate::state::{BlockState, normalize_id};

/// One stored-state format. Decoders are tried in order until one accepts the text.
pub trait StateDecoder: Send + Sync {
    /// Short format name for diagnostics.
    fn name(&self) -> &'static str;

    /// Decode `text`, or `None` if it is not in this format.
    fn decode(&self, text: &str) -> Option<BlockState>;
}

/// Current format: `{"Name":"minecraft:oak_log","Properties":{"axis":"y"}}`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TaggedDecoder;

impl StateDecoder for TaggedDecoder {
    fn name(&self) -> &'static str {
        "tagged"
    }

    fn decode(&self, text: &str) -> Option<BlockState> {
        if !text.starts_with('{') {
            return None;
        }
        let mut state: BlockState = match serde_json::from_str(text) {
            Ok(state) => state,
            Err(e) => {
                tracing::debug!(%text, "tagged state rejected: {e}");
                return None;
            }
        };
        state.id = normalize_id(&state.id)?;
        Some(state)
    }
}

/// Legacy format: `minecraft:wool[color=red]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PropertyListDecoder;

impl StateDecoder for PropertyListDecoder {
    fn name(&self) -> &'static str {
        "property-list"
    }

    fn decode(&self, text: &str) -> Option<BlockState> {
        let (id, rest) = text.split_once('[')?;
        let body = rest.strip_suffix(']')?;
        let mut properties = BTreeMap::new();
        for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return None;
            }
            properties.insert(key.to_string(), value.to_string());
        }
        Some(BlockState {
            id: normalize_id(id)?,
            properties,
        })
    }
}

/// Oldest format: a bare identifier, `minecraft:stone` or `stone`.
#[derive(Debug, Default, Clone, Copy)]
pub struct BareIdDecoder;

impl StateDecoder for BareIdDecoder {
    fn name(&self) -> &'static str {
        "bare-id"
    }

    fn decode(&self, text: &str) -> Option<BlockState> {
        normalize_id(text).map(BlockState::new)
    }
}

/// Encodes block states in the canonical format and decodes any format ever stored.
pub struct StateCodec {
    decoders: Vec<Box<dyn StateDecoder>>,
}

impl StateCodec {
    /// Standard chain: tagged, then property list, then bare identifier.
    pub fn new() -> Self {
        Self::with_decoders(vec![
            Box::new(TaggedDecoder),
            Box::new(PropertyListDecoder),
            Box::new(BareIdDecoder),
        ])
    }

    pub fn with_decoders(decoders: Vec<Box<dyn StateDecoder>>) -> Self {
        Self { decoders }
    }

    /// Encode a state for storage. `None` stays `None`.
    pub fn encode(&self, state: Option<&BlockState>) -> Option<String> {
        state.map(|s| self.encode_state(s))
    }

    /// Canonical encoding, falling back to the bare identifier.
    pub fn encode_state(&self, state: &BlockState) -> String {
        match serde_json::to_string(state) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    id = %state.id,
                    "canonical state encoding failed, storing id only: {e}"
                );
                state.id.clone()
            }
        }
    }

    /// Decode a stored state. Absent or blank text is air; undecodable text is
    /// logged and also becomes air.
    pub fn decode(&self, text: Option<&str>) -> BlockState {
        let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
            return BlockState::air();
        };
        match self.decode_with_format(text) {
            Some((state, _)) => state,
            None => {
                tracing::warn!(%text, "could not decode stored block state, using air");
                BlockState::air()
            }
        }
    }

    /// Decode and report which format accepted the text.
    pub fn decode_with_format(&self, text: &str) -> Option<(BlockState, &'static str)> {
        let text = text.trim();
        self.decoders
            .iter()
            .find_map(|d| d.decode(text).map(|state| (state, d.name())))
    }

    /// Identifier of a stored state, without the air fallback.
    pub fn identifier_of(&self, text: &str) -> Option<String> {
        self.decode_with_format(text).map(|(state, _)| state.id)
    }
}

impl Default for StateCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.decoders.iter().map(|d| d.name()).collect();
        f.debug_struct("StateCodec").field("decoders", &names).finish()
    }
}
