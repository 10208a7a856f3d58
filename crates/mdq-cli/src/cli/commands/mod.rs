//! CLI command handlers, one file per command.

mod add;
mod check;
mod clear;
mod completions;
mod control;
mod history;
mod remove;
mod run;
mod status;

pub use add::{run_add, AddArgs};
pub use check::run_check;
pub use clear::run_clear;
pub use completions::{run_completions, run_man};
pub use control::run_control;
pub use history::run_history;
pub use remove::run_remove;
pub use run::run_queue;
pub use status::run_status;
