use std::cell::Cell;

/// Per-execution state threaded through world mutations.
///
/// Not `Sync`: one context belongs to one logical execution. Unrelated
/// executions use their own context and keep logging.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    suppressed: Cell<bool>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether mutations made under this context skip the action log.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed.get()
    }

    /// Suppress logging until the returned guard is dropped.
    pub fn suppress(&self) -> SuppressionGuard<'_> {
        let previous = self.suppressed.replace(true);
        SuppressionGuard {
            ctx: self,
            previous,
        }
    }
}

/// Restores the suppression flag it replaced when dropped.
#[must_use = "suppression ends as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SuppressionGuard<'a> {
    ctx: &'a ExecutionContext,
    previous: bool,
}

impl Drop for SuppressionGuard<'_> {
    fn drop(&mut self) {
        self.ctx.suppressed.set(self.previous);
    }
}
