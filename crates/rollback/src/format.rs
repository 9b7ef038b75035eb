//! Plain-text history lines and pagination for operator output.

use blocklog_codec::{ContainerChange, StateCodec, describe_change};
use blocklog_common::ActionRecord;
use blocklog_persist::MAX_PAGE_SIZE;

/// Age like `3h 12m ago`: at most two units, seconds only when nothing
/// larger is present or to complete a single larger unit.
pub fn relative_age(seconds_ago: i64) -> String {
    let secs = seconds_ago.max(0);
    let days = secs / 86_400;
    let hours = secs % 86_400 / 3_600;
    let minutes = secs % 3_600 / 60;
    let seconds = secs % 60;

    let mut parts: Vec<String> = [(days, 'd'), (hours, 'h'), (minutes, 'm')]
        .into_iter()
        .filter(|(value, _)| *value > 0)
        .take(2)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();
    if parts.len() < 2 && seconds > 0 {
        parts.push(format!("{seconds}s"));
    }
    if parts.is_empty() {
        parts.push("0s".to_string());
    }
    format!("{} ago", parts.join(" "))
}

/// What a record changed, for display. Empty when there is nothing to show.
pub fn describe_record(codec: &StateCodec, record: &ActionRecord) -> String {
    if record.kind.is_container() {
        return match describe_change(record.before.as_deref(), record.after.as_deref()) {
            ContainerChange::Diff { removed, added } => {
                let mut out = Vec::new();
                if !removed.is_empty() {
                    out.push(format!("- {removed}"));
                }
                if !added.is_empty() {
                    out.push(format!("+ {added}"));
                }
                out.join(" ")
            }
            replaced @ ContainerChange::Replaced { .. } => replaced.to_string(),
        };
    }
    let before = codec.decode(record.before.as_deref());
    let after = codec.decode(record.after.as_deref());
    match (before.is_air(), after.is_air()) {
        (false, false) if before != after => format!("{before} -> {after}"),
        (_, false) => after.to_string(),
        (false, true) => before.to_string(),
        (true, true) => String::new(),
    }
}

/// `+ ` for pure additions, `- ` for pure removals, `• ` otherwise.
fn change_marker(codec: &StateCodec, record: &ActionRecord) -> &'static str {
    let (removal, addition) = if record.kind.is_container() {
        match describe_change(record.before.as_deref(), record.after.as_deref()) {
            ContainerChange::Diff { removed, added } => (!removed.is_empty(), !added.is_empty()),
            ContainerChange::Replaced { before, after } => (!before.is_empty(), !after.is_empty()),
        }
    } else {
        (
            !codec.decode(record.before.as_deref()).is_air(),
            !codec.decode(record.after.as_deref()).is_air(),
        )
    };
    match (removal, addition) {
        (false, true) => "+ ",
        (true, false) => "- ",
        _ => "• ",
    }
}

/// One history line: `5m ago + Alice place minecraft:stone`.
pub fn format_history_line(codec: &StateCodec, record: &ActionRecord, now: i64) -> String {
    let mut line = format!(
        "{} {}{} {}",
        relative_age(now - record.time),
        change_marker(codec, record),
        record.actor.name,
        record.kind.as_str().to_ascii_lowercase(),
    );
    let change = describe_record(codec, record);
    if !change.is_empty() {
        line.push(' ');
        line.push_str(&change);
    }
    line
}

/// A 1-based page of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub number: usize,
    pub size: usize,
}

impl Page {
    /// Page numbers below 1 become 1; sizes are clamped to `1..=MAX_PAGE_SIZE`.
    pub fn new(number: usize, size: usize) -> Self {
        Self {
            number: number.max(1),
            size: size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.number - 1).saturating_mul(self.size)
    }

    /// Number of pages needed for `count` results; at least 1.
    pub fn total_pages(&self, count: usize) -> usize {
        count.div_ceil(self.size).max(1)
    }

    /// Compact pager like `« 1 ... 4 [5] 6 ... 12 »`: first and last page,
    /// the current page with two neighbours each side, gaps elided.
    pub fn pager(&self, count: usize) -> String {
        let total = self.total_pages(count);
        let current = self.number.min(total);
        let start = current.saturating_sub(2).max(1);
        let end = (current + 2).min(total);

        let mut items = vec!["«".to_string()];
        let label = |page: usize| {
            if page == current {
                format!("[{page}]")
            } else {
                page.to_string()
            }
        };
        items.push(label(1));
        if start > 2 {
            items.push("...".into());
        }
        for page in start..=end {
            if page != 1 && page != total {
                items.push(label(page));
            }
        }
        if end + 1 < total {
            items.push("...".into());
        }
        if total > 1 {
            items.push(label(total));
        }
        items.push("»".into());
        items.join(" ")
    }
}
