use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Namespace assumed for identifiers written without one.
pub const DEFAULT_NAMESPACE: &str = "minecraft";

/// Identifier of the empty block, also the decode-failure sentinel.
pub const AIR_ID: &str = "minecraft:air";

/// A block state: identifier plus string-valued properties.
///
/// Serializes to the canonical tagged form `{"Name": .., "Properties": {..}}`.
/// Properties live in a `BTreeMap` so the encoding is stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockState {
    #[serde(rename = "Name")]
    pub id: String,
    #[serde(
        rename = "Properties",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    pub fn air() -> Self {
        Self::new(AIR_ID)
    }

    pub fn is_air(&self) -> bool {
        self.id == AIR_ID
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

impl Default for BlockState {
    fn default() -> Self {
        Self::air()
    }
}

/// Legacy textual form: `ns:path[key=value,...]`.
impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)?;
        if self.properties.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (i, (key, value)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("]")
    }
}

/// Validate and normalize a namespaced identifier.
///
/// `stone` becomes `minecraft:stone`. Namespaces allow `[a-z0-9_.-]`, paths
/// additionally allow `/`. Returns `None` for anything else.
pub fn normalize_id(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let (namespace, path) = match raw.split_once(':') {
        Some((ns, path)) => (ns, path),
        None => (DEFAULT_NAMESPACE, raw),
    };
    let namespace_ok = !namespace.is_empty() && namespace.chars().all(is_namespace_char);
    let path_ok = !path.is_empty() && path.chars().all(|c| is_namespace_char(c) || c == '/');
    (namespace_ok && path_ok).then(|| format!("{namespace}:{path}"))
}

fn is_namespace_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-')
}
