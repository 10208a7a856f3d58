//! `mdq clear` – delete every finished task from history.

use anyhow::Result;
use mdq_core::task_db::TaskDb;

pub async fn run_clear(db: &TaskDb) -> Result<()> {
    let removed = db.clear_finished().await?;
    println!("Removed {removed} finished task(s)");
    Ok(())
}
