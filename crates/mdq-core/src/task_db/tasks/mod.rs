//! Task CRUD split by direction; shared row mapping lives here.

mod read;
mod write;

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use super::types::{TaskOptions, TaskRecord, TaskState};

pub(super) const TASK_COLUMNS: &str = "id, locator, content_id, title, format_selector, dest_dir, \
     auth_hint, options_json, state, progress, rate, eta, output_path, file_size, \
     error_message, error_detail, store_error, queue_seq, created_at, updated_at, completed_at";

pub(super) fn task_from_row(row: &SqliteRow) -> Result<TaskRecord> {
    let options_json: Option<String> = row.get("options_json");
    let options = options_json
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(|s| serde_json::from_str::<TaskOptions>(s))
        .transpose()?
        .unwrap_or_default();
    let dest_dir: String = row.get("dest_dir");
    let output_path: Option<String> = row.get("output_path");
    let state: String = row.get("state");
    let store_error: i64 = row.get("store_error");

    Ok(TaskRecord {
        id: row.get("id"),
        locator: row.get("locator"),
        content_id: row.get("content_id"),
        title: row.get("title"),
        format_selector: row.get("format_selector"),
        dest_dir: PathBuf::from(dest_dir),
        auth_hint: row.get("auth_hint"),
        options,
        state: TaskState::from_str(&state),
        progress: row.get("progress"),
        rate: row.get("rate"),
        eta: row.get("eta"),
        output_path: output_path.map(PathBuf::from),
        file_size: row.get("file_size"),
        error_message: row.get("error_message"),
        error_detail: row.get("error_detail"),
        store_error: store_error != 0,
        queue_seq: row.get("queue_seq"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `ESCAPE '\'`.
pub(super) fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("cat"), "%cat%");
        assert_eq!(like_pattern("100%_done\\"), "%100\\%\\_done\\\\%");
    }
}
