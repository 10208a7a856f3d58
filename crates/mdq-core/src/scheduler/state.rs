//! Scheduler state shared by the orchestrator and every supervisor.
//!
//! All admission decisions and status transitions happen while holding
//! `Shared::state`. Status writes go to the store (with retry) before the
//! matching event is published, so a subscriber never sees a transition the
//! store does not have.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use super::events::{EventHub, TaskEvent};
use super::slots::SlotBudget;
use super::stall::StallPolicy;
use super::supervise::Supervisor;
use crate::config::PauseMode;
use crate::control::TaskControl;
use crate::error::{QueueError, RunError};
use crate::progress::ProgressSample;
use crate::retry::{run_with_retry, RetryPolicy};
use crate::runner::{suspend_supported, Outcome, ProcessRunner, RunHandle};
use crate::task_db::{TaskDb, TaskId, TaskOutcome, TaskRecord, TaskState};

/// Mutable scheduler state, guarded by one async mutex.
pub(crate) struct SchedulerState {
    /// Mirror of every active (pending, downloading, paused) task.
    pub(crate) tasks: HashMap<TaskId, TaskRecord>,
    /// Pending task ids in admission order.
    pub(crate) pending: VecDeque<TaskId>,
    /// Command channels of tasks holding a slot.
    pub(crate) running: HashMap<TaskId, TaskControl>,
    pub(crate) slots: SlotBudget,
    pub(crate) hub: EventHub,
    /// Cleared on shutdown; nothing new is admitted afterwards.
    pub(crate) accepting: bool,
}

impl SchedulerState {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            tasks: HashMap::new(),
            pending: VecDeque::new(),
            running: HashMap::new(),
            slots: SlotBudget::new(limit),
            hub: EventHub::default(),
            accepting: true,
        }
    }

    /// Add a pending task to the mirror and the back of the queue.
    pub(crate) fn enqueue(&mut self, task: TaskRecord) {
        let id = task.id;
        self.tasks.insert(id, task);
        if !self.pending.contains(&id) {
            self.pending.push_back(id);
        }
    }

    /// Re-sort the queue by persisted position (after merging rows from the store).
    pub(crate) fn sort_pending(&mut self) {
        let tasks = &self.tasks;
        self.pending
            .make_contiguous()
            .sort_by_key(|id| tasks.get(id).map(|t| (t.queue_seq, t.id)).unwrap_or((i64::MAX, *id)));
    }

    /// Active tasks in queue order.
    pub(crate) fn active_sorted(&self) -> Vec<TaskRecord> {
        let mut tasks: Vec<TaskRecord> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| (t.queue_seq, t.id));
        tasks
    }
}

/// Everything a supervisor or orchestrator call needs.
pub(crate) struct Shared {
    pub(crate) db: TaskDb,
    pub(crate) runner: ProcessRunner,
    pub(crate) store_retry: RetryPolicy,
    pub(crate) pause_mode: PauseMode,
    pub(crate) cancel_grace: Duration,
    pub(crate) stall_window: Option<Duration>,
    pub(crate) progress_interval: Duration,
    pub(crate) stall_policy: Arc<dyn StallPolicy>,
    pub(crate) state: Mutex<SchedulerState>,
}

impl Shared {
    /// Run a store operation under the retry policy.
    pub(crate) async fn store<T, F, Fut>(&self, what: &str, f: F) -> Result<T, QueueError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        run_with_retry(&self.store_retry, what, f).await.map_err(|e| {
            tracing::error!("{what}: {e:#}");
            QueueError::Store(e)
        })
    }

    /// Whether pause should stop the process in place.
    pub(crate) fn suspends_on_pause(&self) -> bool {
        match self.pause_mode {
            PauseMode::Suspend => true,
            PauseMode::Restart => false,
            PauseMode::Auto => suspend_supported(),
        }
    }

    /// Admit pending tasks while slots are free. Caller holds the lock.
    pub(crate) async fn admit(self: &Arc<Self>, st: &mut SchedulerState) {
        while st.accepting && st.slots.available() > 0 {
            let Some(id) = st.pending.pop_front() else {
                break;
            };
            let Some(task) = st.tasks.get(&id).cloned() else {
                continue;
            };
            if task.state != TaskState::Pending || !st.slots.try_acquire() {
                continue;
            }

            let db = &self.db;
            if let Err(e) = self
                .store("mark task downloading", || db.set_state(id, TaskState::Downloading))
                .await
            {
                st.slots.release();
                self.fail_unstarted(st, id, RunError::Store(format!("{e}"))).await;
                continue;
            }

            match self.runner.start(&task) {
                Ok(handle) => {
                    let (control, commands) = TaskControl::channel(id);
                    let mut task = task;
                    task.state = TaskState::Downloading;
                    task.rate = None;
                    task.eta = None;
                    st.tasks.insert(id, task.clone());
                    st.running.insert(id, control);
                    st.hub.publish(id, TaskEvent::Started);
                    tracing::info!(
                        task_id = id,
                        pid = ?handle.signals.pid(),
                        running = st.slots.in_use(),
                        limit = st.slots.limit(),
                        "task started"
                    );
                    spawn_supervisor(Supervisor::new(Arc::clone(self), task, commands), handle);
                }
                Err(err) => {
                    tracing::warn!(task_id = id, "could not start downloader: {}", err);
                    st.slots.release();
                    self.fail_unstarted(st, id, err).await;
                }
            }
        }
    }

    /// Fail a task that never got a live process.
    async fn fail_unstarted(&self, st: &mut SchedulerState, id: TaskId, err: RunError) {
        let (state, fields, event) = terminal_fields(Outcome::Failed(err));
        let db = &self.db;
        if let Err(e) = self.store("record failed start", || db.finish_task(id, state, &fields)).await {
            tracing::error!(task_id = id, "failed start not recorded: {}", e);
        }
        st.tasks.remove(&id);
        st.hub.publish(id, event);
    }

    /// Record the end of a run, release its slot and admit the next task.
    pub(crate) async fn finish(self: &Arc<Self>, id: TaskId, outcome: Outcome) {
        let (state, fields, event) = terminal_fields(outcome);
        let mut guard = self.state.lock().await;
        let st = &mut *guard;

        let db = &self.db;
        let (state, event) = match self.store("record task outcome", || db.finish_task(id, state, &fields)).await {
            Ok(()) => (state, event),
            Err(e) => {
                // The outcome could not be stored; surface it as a retryable failure.
                let (state, fields, event) =
                    terminal_fields(Outcome::Failed(RunError::Store(format!("{e}"))));
                if let Err(e) = db.finish_task(id, state, &fields).await {
                    tracing::error!(task_id = id, "store unreachable, task state only in memory: {:#}", e);
                }
                (state, event)
            }
        };

        st.tasks.remove(&id);
        if st.running.remove(&id).is_some() {
            st.slots.release();
        }
        st.hub.publish(id, event);
        tracing::info!(task_id = id, state = %state, "task finished");
        self.admit(st).await;
    }

    /// Leave a task recoverable after its process was stopped for shutdown.
    pub(crate) async fn detach(&self, id: TaskId) {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let db = &self.db;
        if let Err(e) = self.store("requeue detached task", || db.set_state(id, TaskState::Pending)).await {
            tracing::warn!(task_id = id, "detached task left as-is; it is recovered on next start: {}", e);
        }
        st.tasks.remove(&id);
        if st.running.remove(&id).is_some() {
            st.slots.release();
        }
        tracing::info!(task_id = id, "task detached for shutdown");
    }

    /// Persist and announce a pause or resume.
    pub(crate) async fn record_transition(
        &self,
        id: TaskId,
        to: TaskState,
        event: TaskEvent,
    ) -> Result<(), QueueError> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let db = &self.db;
        self.store("record task state", || db.set_state(id, to)).await?;
        if let Some(task) = st.tasks.get_mut(&id) {
            task.state = to;
            task.rate = None;
            task.eta = None;
        }
        st.hub.publish(id, event);
        tracing::info!(task_id = id, state = %to, "task state changed");
        Ok(())
    }

    /// Publish an event that does not change state.
    pub(crate) async fn announce(&self, id: TaskId, event: TaskEvent) {
        self.state.lock().await.hub.publish(id, event);
    }

    /// Fold a sample into the mirror and publish it. Progress never decreases
    /// within a run. Returns the mirrored values while the task is downloading.
    pub(crate) async fn record_progress(
        &self,
        id: TaskId,
        sample: ProgressSample,
    ) -> Option<(f64, Option<String>, Option<String>)> {
        let mut guard = self.state.lock().await;
        let st = &mut *guard;
        let task = st.tasks.get_mut(&id)?;
        if task.state != TaskState::Downloading {
            return None;
        }
        if let Some(pct) = sample.percent {
            task.progress = task.progress.max(pct);
        }
        task.rate = sample.rate.clone();
        task.eta = sample.eta.clone();
        let mirrored = (task.progress, task.rate.clone(), task.eta.clone());

        let sample = ProgressSample {
            percent: sample.percent.map(|_| mirrored.0),
            ..sample
        };
        st.hub.publish(id, TaskEvent::Progress { sample });
        Some(mirrored)
    }
}

type SupervisorFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn spawn_supervisor(supervisor: Supervisor, handle: RunHandle) {
    let fut: SupervisorFuture = Box::pin(supervisor.run(handle));
    tokio::spawn(fut);
}

/// Final state, stored fields and event for a run outcome.
fn terminal_fields(outcome: Outcome) -> (TaskState, TaskOutcome, TaskEvent) {
    match outcome {
        Outcome::Success { path, size } => (
            TaskState::Completed,
            TaskOutcome {
                output_path: Some(path.clone()),
                file_size: Some(i64::try_from(size).unwrap_or(i64::MAX)),
                ..TaskOutcome::default()
            },
            TaskEvent::Completed { path, size },
        ),
        Outcome::Failed(err) => {
            let message = err.to_string();
            (
                TaskState::Failed,
                TaskOutcome {
                    error_message: Some(message.clone()),
                    error_detail: err.detail(),
                    store_error: matches!(err, RunError::Store(_)),
                    ..TaskOutcome::default()
                },
                TaskEvent::Failed { message },
            )
        }
        Outcome::Cancelled => (TaskState::Cancelled, TaskOutcome::default(), TaskEvent::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn store_failures_are_flagged() {
        let (state, fields, event) =
            terminal_fields(Outcome::Failed(RunError::Store("database is locked".to_string())));
        assert_eq!(state, TaskState::Failed);
        assert!(fields.store_error);
        assert_eq!(
            event,
            TaskEvent::Failed {
                message: "could not record task state: database is locked".to_string()
            }
        );
    }

    #[test]
    fn success_records_path_and_size() {
        let (state, fields, event) = terminal_fields(Outcome::Success {
            path: PathBuf::from("/tmp/a.mkv"),
            size: 42,
        });
        assert_eq!(state, TaskState::Completed);
        assert_eq!(fields.file_size, Some(42));
        assert!(!fields.store_error);
        assert!(event.is_terminal());
    }
}
