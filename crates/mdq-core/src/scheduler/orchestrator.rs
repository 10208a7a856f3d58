//! Public face of the download queue.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use super::events::{Subscription, TaskEvent, TaskUpdate};
use super::stall::{StallPolicy, WarnOnStall};
use super::state::{SchedulerState, Shared};
use crate::config::MdqConfig;
use crate::control::{TaskCommand, TaskControl};
use crate::error::QueueError;
use crate::retry::run_with_retry;
use crate::runner::ProcessRunner;
use crate::task_db::{
    DuplicateCheck, HistoryPage, NewTask, TaskDb, TaskId, TaskRecord, TaskState,
};

/// Result of a successful submission.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: TaskId,
    /// A completed task with the same content id, if any. Informational only.
    pub possible_duplicate: Option<TaskRecord>,
}

/// Result of [`Orchestrator::cancel_all`]. Per-task failures never stop the rest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CancelAllReport {
    pub cancelled: Vec<TaskId>,
    pub failed: Vec<(TaskId, String)>,
}

/// Bounded-concurrency download queue.
///
/// Cheap to clone; all clones drive the same scheduler.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    /// Recover interrupted tasks, load the queue from `db` and start admitting.
    pub async fn start(db: TaskDb, config: &MdqConfig) -> Result<Self> {
        Self::start_with_stall_policy(db, config, Arc::new(WarnOnStall)).await
    }

    pub async fn start_with_stall_policy(
        db: TaskDb,
        config: &MdqConfig,
        stall_policy: Arc<dyn StallPolicy>,
    ) -> Result<Self> {
        let store_retry = config.store_retry_policy();
        let recovered =
            run_with_retry(&store_retry, "recover interrupted tasks", || db.recover_interrupted()).await?;
        if recovered > 0 {
            tracing::info!(recovered, "requeued tasks interrupted by a previous run");
        }

        let mut st = SchedulerState::new(config.concurrency_limit());
        for task in db.list_pending().await? {
            st.enqueue(task);
        }
        tracing::info!(
            pending = st.pending.len(),
            limit = st.slots.limit(),
            program = %config.downloader.program,
            "orchestrator starting"
        );

        let shared = Arc::new(Shared {
            db,
            runner: ProcessRunner::new(config.downloader.clone()),
            store_retry,
            pause_mode: config.pause_mode,
            cancel_grace: config.cancel_grace(),
            stall_window: config.stall_window(),
            progress_interval: config.progress_persist_interval(),
            stall_policy,
            state: Mutex::new(st),
        });
        {
            let mut st = shared.state.lock().await;
            shared.admit(&mut st).await;
        }
        Ok(Self { shared })
    }

    /// Queue a new download.
    pub async fn submit(&self, request: NewTask) -> Result<Submission, QueueError> {
        let request = validate_request(request)?;
        let shared = &self.shared;
        let db = &shared.db;

        let mut guard = shared.state.lock().await;
        let st = &mut *guard;
        if !st.accepting {
            return Err(QueueError::Unavailable("orchestrator is shutting down".to_string()));
        }

        let check = shared
            .store("check duplicate", || db.check_duplicate(&request.content_id))
            .await?;
        if let Some(existing) = check.in_queue {
            return Err(QueueError::DuplicateInQueue {
                content_id: request.content_id,
                existing,
            });
        }

        let id = shared.store("insert task", || db.insert_task(&request)).await?;
        let task = shared
            .store("load task", || db.get_task(id))
            .await?
            .ok_or(QueueError::TaskNotFound(id))?;
        tracing::info!(task_id = id, content_id = %task.content_id, "task queued");
        st.enqueue(task.clone());
        st.hub.publish(id, TaskEvent::Queued { task: Box::new(task) });
        shared.admit(st).await;

        Ok(Submission {
            id,
            possible_duplicate: check.history_match,
        })
    }

    /// Cancel a task. Cancelling a task that already finished is a no-op.
    pub async fn cancel(&self, id: TaskId) -> Result<(), QueueError> {
        let shared = &self.shared;
        let control = {
            let mut guard = shared.state.lock().await;
            let st = &mut *guard;
            match st.tasks.get(&id).map(|t| t.state) {
                Some(TaskState::Pending) => {
                    self.cancel_pending(st, id).await?;
                    return Ok(());
                }
                Some(_) => st.running.get(&id).cloned(),
                None => {
                    let db = &shared.db;
                    return match shared.store("load task", || db.get_task(id)).await? {
                        None => Err(QueueError::TaskNotFound(id)),
                        Some(task) if task.state.is_terminal() => Ok(()),
                        // Active in the store but not known here (added by another process).
                        Some(_) => {
                            shared.store("cancel task", || db.cancel_if_active(id)).await?;
                            Ok(())
                        }
                    };
                }
            }
        };
        match control {
            Some(control) => match control.send(TaskCommand::Cancel).await {
                // The task finished while the request was in flight.
                Err(QueueError::Unavailable(_)) => Ok(()),
                other => other,
            },
            None => Ok(()),
        }
    }

    /// Suspend a downloading task. Pausing a paused task is a no-op.
    pub async fn pause(&self, id: TaskId) -> Result<(), QueueError> {
        let control = self
            .control_for(id, "pause", |state| match state {
                TaskState::Downloading => Some(true),
                TaskState::Paused => Some(false),
                _ => None,
            })
            .await?;
        match control {
            Some(control) => control.send(TaskCommand::Pause).await,
            None => Ok(()),
        }
    }

    /// Continue a paused task. Resuming a downloading task is a no-op.
    pub async fn resume(&self, id: TaskId) -> Result<(), QueueError> {
        let control = self
            .control_for(id, "resume", |state| match state {
                TaskState::Paused => Some(true),
                TaskState::Downloading => Some(false),
                _ => None,
            })
            .await?;
        match control {
            Some(control) => control.send(TaskCommand::Resume).await,
            None => Ok(()),
        }
    }

    /// Put a failed task back at the end of the queue with progress and errors reset.
    pub async fn retry(&self, id: TaskId) -> Result<(), QueueError> {
        let shared = &self.shared;
        let db = &shared.db;
        let mut guard = shared.state.lock().await;
        let st = &mut *guard;
        if let Some(task) = st.tasks.get(&id) {
            return Err(QueueError::InvalidTransition {
                id,
                from: task.state,
                action: "retry",
            });
        }
        let task = shared
            .store("load task", || db.get_task(id))
            .await?
            .ok_or(QueueError::TaskNotFound(id))?;
        if task.state != TaskState::Failed {
            return Err(QueueError::InvalidTransition {
                id,
                from: task.state,
                action: "retry",
            });
        }
        if let Some(existing) = shared
            .store("check duplicate", || db.find_active_by_content(&task.content_id))
            .await?
        {
            return Err(QueueError::DuplicateInQueue {
                content_id: task.content_id,
                existing,
            });
        }
        if !shared.store("requeue task", || db.requeue_failed(id)).await? {
            return Err(QueueError::InvalidTransition {
                id,
                from: task.state,
                action: "retry",
            });
        }
        let task = shared
            .store("load task", || db.get_task(id))
            .await?
            .ok_or(QueueError::TaskNotFound(id))?;
        tracing::info!(task_id = id, queue_seq = task.queue_seq, "task requeued for retry");
        st.enqueue(task.clone());
        st.hub.publish(id, TaskEvent::Queued { task: Box::new(task) });
        shared.admit(st).await;
        Ok(())
    }

    /// Cancel every active task. Pending tasks go first so nothing new is
    /// admitted while running ones are being stopped.
    pub async fn cancel_all(&self) -> CancelAllReport {
        let mut report = CancelAllReport::default();
        let running: Vec<TaskId> = {
            let mut guard = self.shared.state.lock().await;
            let st = &mut *guard;
            let pending: Vec<TaskId> = st.pending.iter().copied().collect();
            for id in pending {
                match self.cancel_pending(st, id).await {
                    Ok(()) => report.cancelled.push(id),
                    Err(e) => report.failed.push((id, e.to_string())),
                }
            }
            let mut running: Vec<TaskId> = st.running.keys().copied().collect();
            running.sort_unstable();
            running
        };

        let mut set = JoinSet::new();
        for id in running {
            let this = self.clone();
            set.spawn(async move { (id, this.cancel(id).await) });
        }
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((id, Ok(()))) => report.cancelled.push(id),
                Ok((id, Err(e))) => report.failed.push((id, e.to_string())),
                Err(e) => tracing::error!("cancel task panicked: {}", e),
            }
        }
        report.cancelled.sort_unstable();
        tracing::info!(
            cancelled = report.cancelled.len(),
            failed = report.failed.len(),
            "cancel all finished"
        );
        report
    }

    /// Delete every finished task from history. Returns how many were removed.
    pub async fn clear_completed(&self) -> Result<u64, QueueError> {
        let db = &self.shared.db;
        let removed = self.shared.store("clear finished tasks", || db.clear_finished()).await?;
        tracing::info!(removed, "cleared finished tasks");
        Ok(removed)
    }

    /// Delete one finished task.
    pub async fn delete(&self, id: TaskId) -> Result<(), QueueError> {
        let shared = &self.shared;
        let db = &shared.db;
        let guard = shared.state.lock().await;
        if let Some(task) = guard.tasks.get(&id) {
            return Err(QueueError::InvalidTransition {
                id,
                from: task.state,
                action: "delete",
            });
        }
        if shared.store("delete task", || db.remove_task(id)).await? {
            tracing::info!(task_id = id, "task deleted");
            return Ok(());
        }
        match shared.store("load task", || db.get_task(id)).await? {
            None => Err(QueueError::TaskNotFound(id)),
            Some(task) => Err(QueueError::InvalidTransition {
                id,
                from: task.state,
                action: "delete",
            }),
        }
    }

    /// Change the concurrency limit (clamped to 1..=20). Returns the applied value.
    pub async fn set_limit(&self, limit: usize) -> usize {
        let mut guard = self.shared.state.lock().await;
        let st = &mut *guard;
        let applied = st.slots.set_limit(limit);
        tracing::info!(limit = applied, "concurrency limit changed");
        self.shared.admit(st).await;
        applied
    }

    /// Current concurrency limit.
    pub async fn limit(&self) -> usize {
        self.shared.state.lock().await.slots.limit()
    }

    /// Pick up pending tasks another process inserted into the store.
    /// Returns how many were added.
    pub async fn refresh(&self) -> Result<usize, QueueError> {
        let shared = &self.shared;
        let db = &shared.db;
        let mut guard = shared.state.lock().await;
        let st = &mut *guard;
        if !st.accepting {
            return Ok(0);
        }
        let rows = shared.store("load pending tasks", || db.list_pending()).await?;
        let mut added = 0;
        for task in rows {
            if st.tasks.contains_key(&task.id) {
                continue;
            }
            let id = task.id;
            st.enqueue(task.clone());
            st.hub.publish(id, TaskEvent::Queued { task: Box::new(task) });
            added += 1;
        }
        if added > 0 {
            st.sort_pending();
            tracing::info!(added, "picked up tasks from the store");
            shared.admit(st).await;
        }
        Ok(added)
    }

    /// Pending, downloading and paused tasks in queue order.
    pub async fn list_active(&self) -> Vec<TaskRecord> {
        self.shared.state.lock().await.active_sorted()
    }

    /// Finished tasks, newest first.
    pub async fn list_history(
        &self,
        page: u32,
        page_size: u32,
        title_filter: Option<&str>,
    ) -> Result<HistoryPage, QueueError> {
        Ok(self
            .shared
            .db
            .list_history(page, page_size, title_filter)
            .await?)
    }

    pub async fn check_duplicate(&self, content_id: &str) -> Result<DuplicateCheck, QueueError> {
        Ok(self.shared.db.check_duplicate(content_id).await?)
    }

    /// Current view of one task (live mirror for active tasks, store otherwise).
    pub async fn get(&self, id: TaskId) -> Result<TaskRecord, QueueError> {
        if let Some(task) = self.shared.state.lock().await.tasks.get(&id) {
            return Ok(task.clone());
        }
        self.shared
            .db
            .get_task(id)
            .await?
            .ok_or(QueueError::TaskNotFound(id))
    }

    /// Subscribe to events of one task (`Some(id)`) or all tasks (`None`).
    /// The stream starts with a `Snapshot` of the current state of each task
    /// it covers, so late subscribers miss nothing.
    pub async fn subscribe(&self, filter: Option<TaskId>) -> Result<Subscription, QueueError> {
        let mut guard = self.shared.state.lock().await;
        let st = &mut *guard;
        let initial: Vec<TaskRecord> = match filter {
            None => st.active_sorted(),
            Some(id) => match st.tasks.get(&id) {
                Some(task) => vec![task.clone()],
                None => match self.shared.db.get_task(id).await? {
                    Some(task) => vec![task],
                    None => return Err(QueueError::TaskNotFound(id)),
                },
            },
        };
        let initial = initial.into_iter().map(|task| TaskUpdate {
            task_id: task.id,
            event: TaskEvent::Snapshot { task: Box::new(task) },
        });
        Ok(st.hub.subscribe(filter, initial))
    }

    /// Stop admitting, stop every live process (leaving its task recoverable as
    /// pending) and end all subscriptions.
    pub async fn shutdown(&self) {
        let controls: Vec<TaskControl> = {
            let mut st = self.shared.state.lock().await;
            st.accepting = false;
            st.running.values().cloned().collect()
        };
        let mut set = JoinSet::new();
        for control in controls {
            set.spawn(async move {
                let id = control.task_id();
                if let Err(e) = control.send(TaskCommand::Detach).await {
                    tracing::debug!(task_id = id, "detach: {}", e);
                }
            });
        }
        while set.join_next().await.is_some() {}
        self.shared.state.lock().await.hub.close();
        tracing::info!("orchestrator stopped");
    }

    /// Cancel a pending task. Caller holds the lock.
    async fn cancel_pending(&self, st: &mut SchedulerState, id: TaskId) -> Result<(), QueueError> {
        let db = &self.shared.db;
        self.shared.store("cancel task", || db.cancel_if_active(id)).await?;
        st.pending.retain(|p| *p != id);
        st.tasks.remove(&id);
        st.hub.publish(id, TaskEvent::Cancelled);
        tracing::info!(task_id = id, "pending task cancelled");
        Ok(())
    }

    /// Resolve the command channel for `action` on task `id`.
    ///
    /// `allowed` maps the current state to `Some(true)` (send the command),
    /// `Some(false)` (already there, no-op) or `None` (invalid transition).
    async fn control_for(
        &self,
        id: TaskId,
        action: &'static str,
        allowed: impl Fn(TaskState) -> Option<bool>,
    ) -> Result<Option<TaskControl>, QueueError> {
        let guard = self.shared.state.lock().await;
        let state = match guard.tasks.get(&id) {
            Some(task) => task.state,
            None => match self.shared.db.get_task(id).await? {
                Some(task) => task.state,
                None => return Err(QueueError::TaskNotFound(id)),
            },
        };
        match allowed(state) {
            Some(true) => guard
                .running
                .get(&id)
                .cloned()
                .map(Some)
                .ok_or_else(|| QueueError::Unavailable(format!("task {id} is not running here"))),
            Some(false) => Ok(None),
            None => Err(QueueError::InvalidTransition {
                id,
                from: state,
                action,
            }),
        }
    }
}

/// Check and normalize a submission: trims fields, requires a parsable
/// locator URL and non-empty ids, and defaults an empty title to the content id.
pub fn validate_request(mut request: NewTask) -> Result<NewTask, QueueError> {
    request.locator = request.locator.trim().to_string();
    request.content_id = request.content_id.trim().to_string();
    request.format_selector = request.format_selector.trim().to_string();
    request.title = request.title.trim().to_string();

    if request.locator.is_empty() {
        return Err(QueueError::Validation("locator is empty".to_string()));
    }
    if request.content_id.is_empty() {
        return Err(QueueError::Validation("content id is empty".to_string()));
    }
    if request.format_selector.is_empty() {
        return Err(QueueError::Validation("format selector is empty".to_string()));
    }
    if request.dest_dir.as_os_str().is_empty() {
        return Err(QueueError::Validation("destination directory is empty".to_string()));
    }
    url::Url::parse(&request.locator)
        .map_err(|e| QueueError::Validation(format!("invalid locator {:?}: {e}", request.locator)))?;
    if request.title.is_empty() {
        request.title = request.content_id.clone();
    }
    Ok(request)
}
