//! Durable task table (SQLite via sqlx).
//!
//! One row per task: immutable request fields, lifecycle state, the latest
//! progress mirror, outcome fields, and the FIFO queue position. Status writes
//! are synchronous; progress writes only touch progress columns so a late
//! progress update can never overwrite a state transition.

mod db;
mod tasks;
mod types;

pub use db::TaskDb;
pub use types::*;

#[cfg(test)]
pub(crate) use db::open_memory;
