//! Types used by the task database.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Task identifier.
pub type TaskId = i64;

/// Lifecycle state stored as a string in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub const ACTIVE: [TaskState; 3] = [TaskState::Pending, TaskState::Downloading, TaskState::Paused];
    pub const TERMINAL: [TaskState; 3] = [TaskState::Completed, TaskState::Failed, TaskState::Cancelled];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Downloading => "downloading",
            TaskState::Paused => "paused",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }

    /// Unknown strings map to `Failed` so a corrupt row is visible and retryable.
    pub fn from_str(s: &str) -> Self {
        match s {
            "pending" => TaskState::Pending,
            "downloading" => TaskState::Downloading,
            "paused" => TaskState::Paused,
            "completed" => TaskState::Completed,
            "failed" => TaskState::Failed,
            "cancelled" => TaskState::Cancelled,
            _ => TaskState::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Per-task options, stored as JSON so the schema stays flexible.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TaskOptions {
    /// Extra downloader arguments for this task only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    /// Overrides the configured output template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename_template: Option<String>,
}

/// Immutable inputs of a download request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    /// What to hand the downloader (usually a URL).
    pub locator: String,
    /// Dedup key, e.g. the site's video id.
    pub content_id: String,
    pub title: String,
    /// Format/quality selector passed as `--format`.
    pub format_selector: String,
    pub dest_dir: PathBuf,
    /// Browser name for cookie extraction, if the content needs a login.
    pub auth_hint: Option<String>,
    pub options: TaskOptions,
}

/// Full task row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub locator: String,
    pub content_id: String,
    pub title: String,
    pub format_selector: String,
    pub dest_dir: PathBuf,
    pub auth_hint: Option<String>,
    pub options: TaskOptions,
    pub state: TaskState,
    /// 0..=100; meaningful only while downloading.
    pub progress: f64,
    pub rate: Option<String>,
    pub eta: Option<String>,
    pub output_path: Option<PathBuf>,
    pub file_size: Option<i64>,
    /// Short human-readable failure message.
    pub error_message: Option<String>,
    /// Full diagnostic text (stderr tail) behind `error_message`.
    pub error_detail: Option<String>,
    /// Set when the task failed because its state could not be persisted.
    pub store_error: bool,
    /// FIFO position among pending tasks; retry moves a task to the back.
    pub queue_seq: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl TaskRecord {
    /// Progress fields are only current while the task is downloading.
    pub fn live_progress(&self) -> Option<(f64, Option<&str>, Option<&str>)> {
        (self.state == TaskState::Downloading)
            .then(|| (self.progress, self.rate.as_deref(), self.eta.as_deref()))
    }
}

/// Final fields written when a run ends.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TaskOutcome {
    pub output_path: Option<PathBuf>,
    pub file_size: Option<i64>,
    pub error_message: Option<String>,
    pub error_detail: Option<String>,
    pub store_error: bool,
}

/// One page of finished tasks.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub items: Vec<TaskRecord>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
}

/// Result of a dedup lookup by content id.
#[derive(Debug, Clone, Serialize, Default)]
pub struct DuplicateCheck {
    /// An active (pending/downloading/paused) task with this content id.
    pub in_queue: Option<TaskId>,
    /// The most recent completed task with this content id.
    pub history_match: Option<TaskRecord>,
}
