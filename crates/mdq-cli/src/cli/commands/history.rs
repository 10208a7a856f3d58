//! `mdq history` – finished tasks, newest first.

use anyhow::Result;
use mdq_core::task_db::{TaskDb, TaskRecord, TaskState};

pub async fn run_history(
    db: &TaskDb,
    page: u32,
    page_size: u32,
    search: Option<&str>,
    json: bool,
) -> Result<()> {
    let history = db.list_history(page, page_size, search).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }
    if history.items.is_empty() {
        println!("No finished tasks.");
        return Ok(());
    }
    println!("{:<6} {:<10} {:<40} {}", "ID", "STATE", "TITLE", "RESULT");
    for t in &history.items {
        println!("{:<6} {:<10} {:<40} {}", t.id, t.state, t.title, result_column(t));
    }
    let pages = history.total_count.div_ceil(u64::from(history.page_size.max(1)));
    println!(
        "page {} of {} ({} task(s))",
        history.page + 1,
        pages.max(1),
        history.total_count
    );
    Ok(())
}

fn result_column(t: &TaskRecord) -> String {
    match t.state {
        TaskState::Completed => t
            .output_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string()),
        TaskState::Failed => t.error_message.clone().unwrap_or_else(|| "-".to_string()),
        _ => "-".to_string(),
    }
}
