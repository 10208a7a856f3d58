//! `mdq remove <id>` – delete a finished task; optionally its file with --delete-files.

use anyhow::{bail, Result};
use mdq_core::runner::remove_output;
use mdq_core::task_db::TaskDb;

/// Removes a completed, failed or cancelled task from the store. Active tasks
/// must be cancelled first.
pub async fn run_remove(db: &TaskDb, id: i64, delete_files: bool) -> Result<()> {
    let Some(task) = db.get_task(id).await? else {
        bail!("task {id} not found");
    };
    if !task.state.is_terminal() {
        bail!("task {id} is {}; cancel it first", task.state);
    }

    if delete_files {
        match task.output_path.as_deref() {
            Some(path) => match remove_output(path).await {
                Ok(true) => println!("Deleted {}", path.display()),
                Ok(false) => tracing::debug!(path = %path.display(), "output already gone"),
                Err(e) => tracing::warn!(path = %path.display(), "could not delete file: {}", e),
            },
            None => tracing::debug!(task_id = id, "task has no output file"),
        }
    }

    if !db.remove_task(id).await? {
        bail!("task {id} changed state while removing; try again");
    }
    println!("Removed task {id}");
    Ok(())
}
