//! Error taxonomy for the download queue.
//!
//! [`QueueError`] is what callers of the orchestrator see. [`RunError`] ends a
//! single task's run and never escapes to siblings or the scheduler; its
//! display form becomes the task's stored failure message.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::task_db::{TaskId, TaskState};

/// Errors returned by orchestrator commands and queries.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Submission rejected before anything was persisted.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The content id is already pending, downloading or paused.
    #[error("content {content_id} is already queued as task {existing}")]
    DuplicateInQueue { content_id: String, existing: TaskId },

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    /// The command is not allowed from the task's current state.
    #[error("cannot {action} task {id} while it is {from}")]
    InvalidTransition {
        id: TaskId,
        from: TaskState,
        action: &'static str,
    },

    /// Persistence failed after retries.
    #[error("task store: {0:#}")]
    Store(anyhow::Error),

    /// The scheduler or the task's supervisor is gone (shutdown in progress).
    #[error("scheduler unavailable: {0}")]
    Unavailable(String),
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Store(err)
    }
}

/// Why a single task's subprocess run did not produce a file.
#[derive(Debug, Error)]
pub enum RunError {
    /// The downloader binary is missing or not executable.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit (or killed by a signal). Carries the stderr tail.
    #[error("{summary}")]
    Exit {
        code: Option<i32>,
        summary: String,
        stderr_tail: String,
    },

    /// Zero exit but no (or an empty) destination file.
    #[error("postprocessing produced no file{}", .expected.as_ref().map(|p| format!(": {}", p.display())).unwrap_or_default())]
    OutputMissing { expected: Option<PathBuf> },

    /// Waiting on the process failed at the OS level.
    #[error("lost track of downloader process: {0}")]
    Wait(#[source] std::io::Error),

    /// A status write kept failing; the task can be retried later.
    #[error("could not record task state: {0}")]
    Store(String),
}

impl RunError {
    /// Full diagnostic text kept alongside the short message.
    pub fn detail(&self) -> Option<String> {
        match self {
            RunError::Exit { stderr_tail, .. } if !stderr_tail.is_empty() => {
                Some(stderr_tail.clone())
            }
            _ => None,
        }
    }
}

/// The process outlived the grace period and was force-killed.
///
/// Logged by the supervisor; not a task failure.
#[derive(Debug, Error)]
#[error("process did not exit within {grace:?} of termination; killed")]
pub struct CancelTimeoutError {
    pub grace: Duration,
}
