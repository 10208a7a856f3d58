//! Concurrency slot budget.
//!
//! A slot is held by every task that is downloading or paused. The budget is
//! only touched under the scheduler lock, so plain counters suffice.

use crate::config::MAX_CONCURRENT_CAP;

#[derive(Debug)]
pub(crate) struct SlotBudget {
    limit: usize,
    in_use: usize,
}

impl SlotBudget {
    /// Create a budget with the given limit, clamped to 1..=MAX_CONCURRENT_CAP.
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit: limit.clamp(1, MAX_CONCURRENT_CAP),
            in_use: 0,
        }
    }

    pub(crate) fn limit(&self) -> usize {
        self.limit
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use
    }

    /// Free slots. Zero when the limit was lowered below current use.
    pub(crate) fn available(&self) -> usize {
        self.limit.saturating_sub(self.in_use)
    }

    /// Take one slot if any is free.
    pub(crate) fn try_acquire(&mut self) -> bool {
        if self.available() == 0 {
            return false;
        }
        self.in_use += 1;
        true
    }

    pub(crate) fn release(&mut self) {
        self.in_use = self.in_use.saturating_sub(1);
    }

    /// Change the limit. Running tasks above a lowered limit keep their slots;
    /// no new task is admitted until use drops below it. Returns the clamped value.
    pub(crate) fn set_limit(&mut self, limit: usize) -> usize {
        self.limit = limit.clamp(1, MAX_CONCURRENT_CAP);
        self.limit
    }
}
