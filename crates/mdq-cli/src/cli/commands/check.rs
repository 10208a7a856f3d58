//! `mdq check <content-id>` – duplicate lookup.

use anyhow::Result;
use mdq_core::task_db::TaskDb;

pub async fn run_check(db: &TaskDb, content_id: &str, json: bool) -> Result<()> {
    let check = db.check_duplicate(content_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&check)?);
        return Ok(());
    }
    if let Some(id) = check.in_queue {
        println!("{content_id} is queued as task {id}");
    }
    if let Some(prev) = &check.history_match {
        match prev.output_path.as_deref() {
            Some(path) => println!("{content_id} was downloaded as task {}: {}", prev.id, path.display()),
            None => println!("{content_id} was downloaded as task {}", prev.id),
        }
    }
    if check.in_queue.is_none() && check.history_match.is_none() {
        println!("{content_id} has not been queued before");
    }
    Ok(())
}
