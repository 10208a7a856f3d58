//! Retry and backoff policy for task store writes.
//!
//! Status transitions must reach the database before they are reported, so a
//! transient SQLite failure (busy/locked database, exhausted pool) is retried
//! with exponential backoff instead of failing the task outright.

mod classify;
mod policy;
mod run;

pub use classify::classify_store_error;
pub use policy::{ErrorKind, RetryDecision, RetryPolicy};
pub use run::run_with_retry;
