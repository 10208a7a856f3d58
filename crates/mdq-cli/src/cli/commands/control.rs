//! `mdq pause|resume|cancel|retry <id>` and `mdq cancel-all`.
//!
//! Sent over the control socket when `mdq run` is active. Otherwise cancel,
//! retry and cancel-all edit the store directly (nothing is downloading);
//! pause and resume need a live process and fail.

use anyhow::{bail, Result};
use mdq_core::control::ControlRequest;
use mdq_core::error::QueueError;
use mdq_core::task_db::{TaskDb, TaskId, TaskState};

use crate::cli::control_socket;

pub async fn run_control(db: &TaskDb, request: ControlRequest) -> Result<()> {
    let path = control_socket::socket_path()?;
    if let Some(reply) = control_socket::send_request(&path, request).await? {
        println!("{reply}");
        return Ok(());
    }
    tracing::debug!(%request, "no running queue; applying to the store");

    match request {
        ControlRequest::Pause(_) | ControlRequest::Resume(_) => {
            bail!("no `mdq run` is active; only a downloading task can be paused or resumed")
        }
        ControlRequest::Cancel(id) => cancel_offline(db, id).await,
        ControlRequest::Retry(id) => retry_offline(db, id).await,
        ControlRequest::CancelAll => {
            let mut cancelled = 0;
            for task in db.list_active().await? {
                if db.cancel_if_active(task.id).await? {
                    cancelled += 1;
                }
            }
            println!("cancelled {cancelled} task(s)");
            Ok(())
        }
        ControlRequest::Refresh => Ok(()),
    }
}

async fn cancel_offline(db: &TaskDb, id: TaskId) -> Result<()> {
    let Some(task) = db.get_task(id).await? else {
        return Err(QueueError::TaskNotFound(id).into());
    };
    if task.state.is_terminal() || !db.cancel_if_active(id).await? {
        println!("task {id} already finished");
        return Ok(());
    }
    println!("cancelled task {id}");
    Ok(())
}

async fn retry_offline(db: &TaskDb, id: TaskId) -> Result<()> {
    let Some(task) = db.get_task(id).await? else {
        return Err(QueueError::TaskNotFound(id).into());
    };
    let invalid = QueueError::InvalidTransition {
        id,
        from: task.state,
        action: "retry",
    };
    if task.state != TaskState::Failed {
        return Err(invalid.into());
    }
    if let Some(existing) = db.find_active_by_content(&task.content_id).await? {
        return Err(QueueError::DuplicateInQueue {
            content_id: task.content_id,
            existing,
        }
        .into());
    }
    if !db.requeue_failed(id).await? {
        return Err(invalid.into());
    }
    println!("task {id} queued again");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdq_core::task_db::{NewTask, TaskOptions, TaskOutcome};
    use std::path::PathBuf;

    async fn db_with_task(dir: &tempfile::TempDir) -> (TaskDb, TaskId) {
        let db = TaskDb::open_at(dir.path().join("tasks.db")).await.unwrap();
        let id = db
            .insert_task(&NewTask {
                locator: "https://media.example/v/1".to_string(),
                content_id: "v1".to_string(),
                title: "one".to_string(),
                format_selector: "best".to_string(),
                dest_dir: PathBuf::from("/tmp"),
                auth_hint: None,
                options: TaskOptions::default(),
            })
            .await
            .unwrap();
        (db, id)
    }

    #[tokio::test]
    async fn offline_cancel_marks_pending_task() {
        let dir = tempfile::tempdir().unwrap();
        let (db, id) = db_with_task(&dir).await;
        cancel_offline(&db, id).await.unwrap();
        assert_eq!(db.get_task(id).await.unwrap().unwrap().state, TaskState::Cancelled);
        // Second cancel is a no-op.
        cancel_offline(&db, id).await.unwrap();
        assert!(cancel_offline(&db, id + 100).await.is_err());
    }

    #[tokio::test]
    async fn offline_retry_only_from_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (db, id) = db_with_task(&dir).await;
        let err = retry_offline(&db, id).await.unwrap_err();
        assert!(err.to_string().contains("cannot retry"));

        let failed = TaskOutcome {
            error_message: Some("boom".to_string()),
            ..TaskOutcome::default()
        };
        db.finish_task(id, TaskState::Failed, &failed).await.unwrap();
        retry_offline(&db, id).await.unwrap();
        let task = db.get_task(id).await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Pending);
        assert!(task.error_message.is_none());
    }
}
