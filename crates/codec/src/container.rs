//! Container snapshots and the multiset diff used to describe content changes.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::CodecError;

/// Longest auxiliary-data summary shown next to an item.
const MAX_DATA_SUMMARY: usize = 60;

/// One stack of items in a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub item: String,
    pub count: u32,
    /// Enchantments, custom names, anything else that makes stacks distinct.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ItemStack {
    pub fn new(item: impl Into<String>, count: u32) -> Self {
        Self {
            item: item.into(),
            count,
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Serialize, Deserialize)]
struct SlotEntry {
    slot: u32,
    #[serde(flatten)]
    stack: ItemStack,
}

#[derive(Deserialize)]
struct WrappedSlots {
    slots: Vec<SlotEntry>,
}

/// Contents of a container keyed by slot. Empty stacks are never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSnapshot {
    slots: BTreeMap<u32, ItemStack>,
}

impl ContainerSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_slots(slots: impl IntoIterator<Item = (u32, ItemStack)>) -> Self {
        let mut snapshot = Self::new();
        for (slot, stack) in slots {
            snapshot.set(slot, stack);
        }
        snapshot
    }

    /// Put a stack in a slot; a zero count clears the slot.
    pub fn set(&mut self, slot: u32, stack: ItemStack) {
        if stack.count == 0 {
            self.slots.remove(&slot);
        } else {
            self.slots.insert(slot, stack);
        }
    }

    pub fn get(&self, slot: u32) -> Option<&ItemStack> {
        self.slots.get(&slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &ItemStack)> {
        self.slots.iter().map(|(slot, stack)| (*slot, stack))
    }

    /// Parse a stored snapshot: a JSON slot array, or the array wrapped as
    /// `{"slots": [...]}`. Blank text is an empty container.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        let text = strip_quotes(text);
        let entries: Vec<SlotEntry> = if text.is_empty() {
            Vec::new()
        } else if text.starts_with('[') {
            serde_json::from_str(text)?
        } else if text.starts_with('{') {
            serde_json::from_str::<WrappedSlots>(text)?.slots
        } else {
            return Err(CodecError::NotASnapshot(text.to_string()));
        };
        Ok(Self::from_slots(
            entries.into_iter().map(|e| (e.slot, e.stack)),
        ))
    }

    /// Whether `text` looks like a stored snapshot at all.
    pub fn is_serialized(text: Option<&str>) -> bool {
        let Some(text) = text.map(strip_quotes).filter(|t| !t.is_empty()) else {
            return false;
        };
        text.starts_with('[') || serde_json::from_str::<WrappedSlots>(text).is_ok()
    }

    /// Parse, logging and returning an empty snapshot on failure.
    pub fn parse_lossy(text: Option<&str>) -> Self {
        let Some(text) = text else {
            return Self::new();
        };
        Self::parse(text).unwrap_or_else(|e| {
            tracing::warn!(%text, "could not read container snapshot: {e}");
            Self::new()
        })
    }

    /// Canonical encoding: JSON array ordered by slot.
    pub fn encode(&self) -> String {
        let entries: Vec<SlotEntry> = self
            .slots
            .iter()
            .map(|(slot, stack)| SlotEntry {
                slot: *slot,
                stack: stack.clone(),
            })
            .collect();
        serde_json::to_string(&entries).unwrap_or_else(|e| {
            tracing::warn!("container snapshot encoding failed: {e}");
            "[]".to_string()
        })
    }

    /// Total quantity per item identity.
    pub fn totals(&self) -> ItemGroup {
        let mut counts: BTreeMap<ItemKey, i64> = BTreeMap::new();
        for stack in self.slots.values() {
            accumulate(&mut counts, ItemKey::of(stack), i64::from(stack.count));
        }
        ItemGroup::from_signed(&counts, 1)
    }
}

fn strip_quotes(text: &str) -> &str {
    let text = text.trim();
    let unquoted = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .or_else(|| text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')));
    unquoted.map_or(text, str::trim)
}

/// Item identity: type plus auxiliary data, ignoring quantity and slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub item: String,
    /// Canonical JSON of the auxiliary data, empty when there is none.
    pub data: String,
}

impl ItemKey {
    pub fn of(stack: &ItemStack) -> Self {
        Self {
            item: stack.item.clone(),
            data: stack
                .data
                .as_ref()
                .map(serde_json::Value::to_string)
                .unwrap_or_default(),
        }
    }
}

/// A quantity of one item identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemCount {
    pub key: ItemKey,
    pub count: u64,
}

impl fmt::Display for ItemCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x {}", self.count, self.key.item)?;
        if !self.key.data.is_empty() {
            write!(f, " {}", shorten(&self.key.data, MAX_DATA_SUMMARY))?;
        }
        Ok(())
    }
}

/// Item counts ordered by identity. Displays as `[]` when empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemGroup(pub Vec<ItemCount>);

impl ItemGroup {
    /// Keep entries whose sign matches `sign`, as absolute counts.
    fn from_signed(counts: &BTreeMap<ItemKey, i64>, sign: i64) -> Self {
        Self(
            counts
                .iter()
                .filter(|(_, delta)| delta.signum() == sign)
                .map(|(key, delta)| ItemCount {
                    key: key.clone(),
                    count: delta.unsigned_abs(),
                })
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Count for an item with no auxiliary data, 0 if absent.
    pub fn count_of(&self, item: &str) -> u64 {
        self.0
            .iter()
            .filter(|c| c.key.item == item && c.key.data.is_empty())
            .map(|c| c.count)
            .sum()
    }
}

impl fmt::Display for ItemGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("[]");
        }
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{entry}")?;
        }
        Ok(())
    }
}

/// Description of how a container's contents changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerChange {
    /// Both sides were readable snapshots.
    Diff { removed: ItemGroup, added: ItemGroup },
    /// At least one side was not a snapshot; each side is summarized on its own.
    Replaced { before: ItemGroup, after: ItemGroup },
}

impl ContainerChange {
    pub fn is_diff(&self) -> bool {
        matches!(self, Self::Diff { .. })
    }
}

impl fmt::Display for ContainerChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Diff { removed, added } => write!(f, "-{removed} +{added}"),
            Self::Replaced { before, after } => write!(f, "{before} -> {after}"),
        }
    }
}

/// Diff two stored container snapshots.
pub fn describe_change(before: Option<&str>, after: Option<&str>) -> ContainerChange {
    if !ContainerSnapshot::is_serialized(before) || !ContainerSnapshot::is_serialized(after) {
        return replaced(before, after);
    }
    let (old, new) = match (
        ContainerSnapshot::parse(before.unwrap_or_default()),
        ContainerSnapshot::parse(after.unwrap_or_default()),
    ) {
        (Ok(old), Ok(new)) => (old, new),
        _ => return replaced(before, after),
    };

    let slots: BTreeSet<u32> = old.slots.keys().chain(new.slots.keys()).copied().collect();
    let mut deltas: BTreeMap<ItemKey, i64> = BTreeMap::new();
    for slot in slots {
        match (old.get(slot), new.get(slot)) {
            (Some(o), Some(n)) if ItemKey::of(o) == ItemKey::of(n) => {
                let delta = i64::from(n.count) - i64::from(o.count);
                accumulate(&mut deltas, ItemKey::of(o), delta);
            }
            (o, n) => {
                if let Some(o) = o {
                    accumulate(&mut deltas, ItemKey::of(o), -i64::from(o.count));
                }
                if let Some(n) = n {
                    accumulate(&mut deltas, ItemKey::of(n), i64::from(n.count));
                }
            }
        }
    }

    ContainerChange::Diff {
        removed: ItemGroup::from_signed(&deltas, -1),
        added: ItemGroup::from_signed(&deltas, 1),
    }
}

fn replaced(before: Option<&str>, after: Option<&str>) -> ContainerChange {
    ContainerChange::Replaced {
        before: ContainerSnapshot::parse_lossy(before).totals(),
        after: ContainerSnapshot::parse_lossy(after).totals(),
    }
}

fn accumulate(counts: &mut BTreeMap<ItemKey, i64>, key: ItemKey, delta: i64) {
    if delta == 0 {
        return;
    }
    let total = counts.entry(key.clone()).or_insert(0);
    *total += delta;
    if *total == 0 {
        counts.remove(&key);
    }
}

fn shorten(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(entries: &[(u32, &str, u32)]) -> String {
        ContainerSnapshot::from_slots(
            entries
                .iter()
                .map(|(slot, item, count)| (*slot, ItemStack::new(*item, *count))),
        )
        .encode()
    }

    #[test]
    fn encode_is_ordered_by_slot() {
        let text = snapshot(&[(3, "minecraft:dirt", 1), (0, "minecraft:stone", 64)]);
        assert_eq!(
            text,
            r#"[{"slot":0,"item":"minecraft:stone","count":64},{"slot":3,"item":"minecraft:dirt","count":1}]"#
        );
        assert_eq!(ContainerSnapshot::parse(&text).unwrap().len(), 2);
    }

    #[test]
    fn parse_accepts_wrapped_and_quoted_forms() {
        let wrapped = r#"{"slots":[{"slot":1,"item":"minecraft:apple","count":2}]}"#;
        let parsed = ContainerSnapshot::parse(wrapped).unwrap();
        assert_eq!(parsed.get(1), Some(&ItemStack::new("minecraft:apple", 2)));

        let quoted = r#"'[{"slot":0,"item":"minecraft:apple","count":1}]'"#;
        assert_eq!(ContainerSnapshot::parse(quoted).unwrap().len(), 1);
        assert!(ContainerSnapshot::parse("").unwrap().is_empty());
        assert!(ContainerSnapshot::parse("minecraft:chest").is_err());
    }

    #[test]
    fn zero_count_stacks_are_dropped() {
        let text = r#"[{"slot":0,"item":"minecraft:apple","count":0}]"#;
        assert!(ContainerSnapshot::parse(text).unwrap().is_empty());
    }

    #[test]
    fn is_serialized_detection() {
        assert!(ContainerSnapshot::is_serialized(Some("[]")));
        assert!(ContainerSnapshot::is_serialized(Some(r#"{"slots":[]}"#)));
        assert!(!ContainerSnapshot::is_serialized(Some(r#"{"Name":"minecraft:chest"}"#)));
        assert!(!ContainerSnapshot::is_serialized(Some("  ")));
        assert!(!ContainerSnapshot::is_serialized(None));
    }

    #[test]
    fn same_item_in_slot_yields_signed_delta() {
        let before = snapshot(&[(0, "minecraft:stone", 64)]);
        let after = snapshot(&[(0, "minecraft:stone", 10)]);
        let ContainerChange::Diff { removed, added } =
            describe_change(Some(&before), Some(&after))
        else {
            panic!("expected a diff");
        };
        assert_eq!(removed.count_of("minecraft:stone"), 54);
        assert!(added.is_empty());
    }

    #[test]
    fn changed_identity_removes_old_and_adds_new() {
        let before = snapshot(&[(0, "minecraft:stone", 5)]);
        let after = snapshot(&[(0, "minecraft:dirt", 3)]);
        let change = describe_change(Some(&before), Some(&after));
        assert_eq!(change.to_string(), "-5x minecraft:stone +3x minecraft:dirt");
    }

    #[test]
    fn moves_between_slots_cancel_out() {
        let before = snapshot(&[(0, "minecraft:stone", 5), (1, "minecraft:dirt", 2)]);
        let after = snapshot(&[(4, "minecraft:stone", 5), (1, "minecraft:dirt", 3)]);
        let ContainerChange::Diff { removed, added } =
            describe_change(Some(&before), Some(&after))
        else {
            panic!("expected a diff");
        };
        assert!(removed.is_empty());
        assert_eq!(added.len(), 1);
        assert_eq!(added.count_of("minecraft:dirt"), 1);
    }

    #[test]
    fn auxiliary_data_distinguishes_identities() {
        let plain = ItemStack::new("minecraft:sword", 1);
        let enchanted =
            ItemStack::new("minecraft:sword", 1).with_data(json!({"ench": "sharpness"}));
        let before = ContainerSnapshot::from_slots([(0, plain)]).encode();
        let after = ContainerSnapshot::from_slots([(0, enchanted)]).encode();
        let ContainerChange::Diff { removed, added } =
            describe_change(Some(&before), Some(&after))
        else {
            panic!("expected a diff");
        };
        assert_eq!(removed.count_of("minecraft:sword"), 1);
        assert_eq!(added.count_of("minecraft:sword"), 0);
        assert_eq!(
            added.to_string(),
            r#"1x minecraft:sword {"ench":"sharpness"}"#
        );
    }

    #[test]
    fn output_is_ordered_by_identity() {
        let before = snapshot(&[]);
        let after = snapshot(&[(0, "minecraft:stone", 1), (1, "minecraft:apple", 2)]);
        let change = describe_change(Some(&before), Some(&after));
        assert_eq!(
            change.to_string(),
            "-[] +2x minecraft:apple; 1x minecraft:stone"
        );
    }

    #[test]
    fn malformed_side_degrades_to_replacement() {
        let after = snapshot(&[(0, "minecraft:stone", 2), (5, "minecraft:stone", 3)]);
        let change = describe_change(Some("minecraft:chest"), Some(&after));
        assert!(!change.is_diff());
        assert_eq!(change.to_string(), "[] -> 5x minecraft:stone");

        let change = describe_change(None, Some(&after));
        assert!(!change.is_diff());
    }

    #[test]
    fn broken_json_degrades_to_replacement() {
        let before = "[{\"slot\":0,";
        let after = snapshot(&[(0, "minecraft:stone", 1)]);
        let change = describe_change(Some(before), Some(&after));
        assert!(!change.is_diff());
    }

    #[test]
    fn long_data_is_shortened() {
        let data = json!({ "lore": "x".repeat(200) });
        let count = ItemCount {
            key: ItemKey::of(&ItemStack::new("minecraft:book", 1).with_data(data)),
            count: 1,
        };
        let text = count.to_string();
        assert!(text.ends_with('…'));
        assert!(text.chars().count() < 100);
    }
}
