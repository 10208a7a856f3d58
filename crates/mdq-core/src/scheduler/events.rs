//! Task event stream.
//!
//! Every subscriber owns a queue. Publishing never blocks and never drops a
//! non-progress event; a new `Progress` replaces the same task's previous
//! `Progress` if the subscriber has not consumed it yet and nothing else for
//! that task was queued after it.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serde::Serialize;
use tokio::sync::Notify;

use crate::progress::ProgressSample;
use crate::task_db::{TaskId, TaskRecord};

/// What happened to a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEvent {
    /// Current state, sent first to a new subscriber.
    Snapshot { task: Box<TaskRecord> },
    Queued { task: Box<TaskRecord> },
    Started,
    Progress { sample: ProgressSample },
    Postprocessing,
    Paused,
    Resumed,
    Warning { message: String },
    Completed { path: PathBuf, size: u64 },
    Failed { message: String },
    Cancelled,
}

impl TaskEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::Completed { .. } | TaskEvent::Failed { .. } | TaskEvent::Cancelled
        )
    }

    fn is_progress(&self) -> bool {
        matches!(self, TaskEvent::Progress { .. })
    }
}

/// An event tagged with its task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub event: TaskEvent,
}

#[derive(Default)]
struct QueueInner {
    events: VecDeque<TaskUpdate>,
    closed: bool,
}

struct SubscriberQueue {
    filter: Option<TaskId>,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl SubscriberQueue {
    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        // A panic while holding this lock cannot leave the queue half-updated.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, update: TaskUpdate) {
        if self.filter.is_some_and(|id| id != update.task_id) {
            return;
        }
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            if update.event.is_progress() {
                let last_for_task = inner
                    .events
                    .iter_mut()
                    .rev()
                    .find(|u| u.task_id == update.task_id);
                if let Some(prev) = last_for_task {
                    if prev.event.is_progress() {
                        *prev = update;
                        return;
                    }
                }
            }
            inner.events.push_back(update);
        }
        self.notify.notify_one();
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }
}

/// Fan-out point for task events. Lives inside the scheduler state, so
/// publishing is serialized with every state transition.
#[derive(Default)]
pub(crate) struct EventHub {
    subscribers: Vec<Weak<SubscriberQueue>>,
}

impl EventHub {
    /// Register a subscriber, seeding its queue with `initial` events.
    pub(crate) fn subscribe(
        &mut self,
        filter: Option<TaskId>,
        initial: impl IntoIterator<Item = TaskUpdate>,
    ) -> Subscription {
        let queue = Arc::new(SubscriberQueue {
            filter,
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
        });
        for update in initial {
            queue.push(update);
        }
        self.subscribers.retain(|w| w.strong_count() > 0);
        self.subscribers.push(Arc::downgrade(&queue));
        Subscription { queue }
    }

    pub(crate) fn publish(&mut self, task_id: TaskId, event: TaskEvent) {
        let update = TaskUpdate { task_id, event };
        self.subscribers.retain(|w| match w.upgrade() {
            Some(queue) => {
                queue.push(update.clone());
                true
            }
            None => false,
        });
    }

    /// End every subscription; `recv` returns `None` once queued events are consumed.
    pub(crate) fn close(&mut self) {
        for queue in self.subscribers.drain(..).filter_map(|w| w.upgrade()) {
            queue.close();
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.iter().filter(|w| w.strong_count() > 0).count()
    }
}

/// Receiving end of a task event stream. Dropping it detaches.
///
/// The queue is unbounded for lifecycle events (everything except
/// `Progress`), since those are never dropped. Progress is bounded to one
/// queued sample per task. A subscription that is held but never read
/// therefore grows by a few events per task transition; drop it when no
/// longer interested.
pub struct Subscription {
    queue: Arc<SubscriberQueue>,
}

impl Subscription {
    /// Next event, waiting if none is queued. `None` after the orchestrator shut down.
    pub async fn recv(&mut self) -> Option<TaskUpdate> {
        loop {
            {
                let mut inner = self.queue.lock();
                if let Some(update) = inner.events.pop_front() {
                    return Some(update);
                }
                if inner.closed {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<TaskUpdate> {
        self.queue.lock().events.pop_front()
    }
}
