//! Download orchestrator.
//!
//! Coordinates tasks, the concurrency budget and downloader processes:
//! submit → FIFO queue → admission (slot free) → supervisor per process →
//! outcome recorded in the task store → next task admitted.
//! Events for every transition fan out to subscribers.

mod events;
mod orchestrator;
mod slots;
mod stall;
mod state;
mod supervise;

pub use events::{Subscription, TaskEvent, TaskUpdate};
pub use orchestrator::{validate_request, CancelAllReport, Orchestrator, Submission};
pub use stall::{StallAction, StallPolicy, WarnOnStall};
