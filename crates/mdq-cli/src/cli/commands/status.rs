//! `mdq status` – show active tasks in queue order.

use anyhow::Result;
use mdq_core::task_db::TaskDb;

pub async fn run_status(db: &TaskDb, json: bool) -> Result<()> {
    let tasks = db.list_active().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No active tasks.");
        return Ok(());
    }
    println!(
        "{:<6} {:<12} {:>7} {:<12} {:<9} {}",
        "ID", "STATE", "DONE", "RATE", "ETA", "TITLE"
    );
    for t in tasks {
        println!(
            "{:<6} {:<12} {:>6.1}% {:<12} {:<9} {}",
            t.id,
            t.state,
            t.progress,
            t.rate.as_deref().unwrap_or("-"),
            t.eta.as_deref().unwrap_or("-"),
            t.title
        );
    }
    Ok(())
}
