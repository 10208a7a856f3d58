pub mod config;
pub mod logging;

pub mod control;
pub mod error;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod task_db;
