//! Stall detection hook.

use std::time::Duration;

use crate::task_db::TaskId;

/// What to do when a running task has reported no progress for a while.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallAction {
    Ignore,
    /// Log and emit a `Warning` event with this message.
    Warn(String),
}

/// Decides how to react to a stalled download. Never cancels the task.
pub trait StallPolicy: Send + Sync {
    fn on_stall(&self, task_id: TaskId, silent_for: Duration) -> StallAction;
}

/// Default policy: warn every time the window elapses without progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct WarnOnStall;

impl StallPolicy for WarnOnStall {
    fn on_stall(&self, _task_id: TaskId, silent_for: Duration) -> StallAction {
        StallAction::Warn(format!(
            "no progress reported for {}s",
            silent_for.as_secs()
        ))
    }
}
