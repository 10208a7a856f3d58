//! Task write operations: insert, state transitions, progress, removal.

use anyhow::Result;
use std::path::Path;

use super::super::db::{unix_timestamp, TaskDb};
use super::super::types::{NewTask, TaskId, TaskOutcome, TaskState};

fn path_text(p: &Path) -> String {
    p.to_string_lossy().into_owned()
}

impl TaskDb {
    /// Insert a new pending task at the back of the queue.
    pub async fn insert_task(&self, task: &NewTask) -> Result<TaskId> {
        let now = unix_timestamp();
        let options_json = serde_json::to_string(&task.options)?;

        let row_id = sqlx::query(
            r#"
            INSERT INTO tasks (
                locator, content_id, title, format_selector, dest_dir,
                auth_hint, options_json, state, progress,
                queue_seq, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5,
                      ?6, ?7, ?8, 0.0,
                      (SELECT COALESCE(MAX(queue_seq), 0) + 1 FROM tasks), ?9, ?10)
            "#,
        )
        .bind(&task.locator)
        .bind(&task.content_id)
        .bind(&task.title)
        .bind(&task.format_selector)
        .bind(path_text(&task.dest_dir))
        .bind(&task.auth_hint)
        .bind(options_json)
        .bind(TaskState::Pending.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(row_id)
    }

    /// Update the state of an existing task. Rate and ETA are cleared on every
    /// transition since they only describe a live run.
    pub async fn set_state(&self, id: TaskId, state: TaskState) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?1,
                rate = NULL,
                eta = NULL,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(state.as_str())
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mirror the latest progress sample. Touches progress columns only.
    pub async fn update_progress(
        &self,
        id: TaskId,
        progress: f64,
        rate: Option<&str>,
        eta: Option<&str>,
    ) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE tasks
            SET progress = ?1,
                rate = ?2,
                eta = ?3,
                updated_at = ?4
            WHERE id = ?5 AND state = 'downloading'
            "#,
        )
        .bind(progress)
        .bind(rate)
        .bind(eta)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a terminal state together with the run's outcome fields.
    pub async fn finish_task(&self, id: TaskId, state: TaskState, outcome: &TaskOutcome) -> Result<()> {
        debug_assert!(state.is_terminal());
        let now = unix_timestamp();
        let output_path = outcome.output_path.as_deref().map(path_text);
        sqlx::query(
            r#"
            UPDATE tasks
            SET state = ?1,
                progress = CASE WHEN ?1 = 'completed' THEN 100.0 ELSE progress END,
                rate = NULL,
                eta = NULL,
                output_path = ?2,
                file_size = ?3,
                error_message = ?4,
                error_detail = ?5,
                store_error = ?6,
                completed_at = ?7,
                updated_at = ?7
            WHERE id = ?8
            "#,
        )
        .bind(state.as_str())
        .bind(output_path)
        .bind(outcome.file_size)
        .bind(&outcome.error_message)
        .bind(&outcome.error_detail)
        .bind(i64::from(outcome.store_error))
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Move a failed task back to pending at the back of the queue, with progress
    /// and error fields reset. Returns false if the task was not failed.
    pub async fn requeue_failed(&self, id: TaskId) -> Result<bool> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'pending',
                progress = 0.0,
                rate = NULL,
                eta = NULL,
                output_path = NULL,
                file_size = NULL,
                error_message = NULL,
                error_detail = NULL,
                store_error = 0,
                completed_at = NULL,
                queue_seq = (SELECT COALESCE(MAX(queue_seq), 0) + 1 FROM tasks),
                updated_at = ?1
            WHERE id = ?2 AND state = 'failed'
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Cancel a task only if it is still active. Returns true if the row changed,
    /// false if it had already reached a terminal state.
    pub async fn cancel_if_active(&self, id: TaskId) -> Result<bool> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'cancelled',
                rate = NULL,
                eta = NULL,
                completed_at = ?1,
                updated_at = ?1
            WHERE id = ?2 AND state IN ('pending', 'downloading', 'paused')
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Normalize tasks left downloading or paused by a previous process (whose
    /// subprocesses are gone) back to pending, keeping their queue position.
    /// Returns the number of tasks reset.
    pub async fn recover_interrupted(&self) -> Result<u64> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE tasks
            SET state = 'pending',
                rate = NULL,
                eta = NULL,
                updated_at = ?1
            WHERE state IN ('downloading', 'paused')
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    /// Permanently remove a finished task. Returns false if the task is missing or
    /// still active. File cleanup is handled separately by higher layers.
    pub async fn remove_task(&self, id: TaskId) -> Result<bool> {
        let r = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE id = ?1 AND state IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Remove every finished task. Returns the number of rows deleted.
    pub async fn clear_finished(&self) -> Result<u64> {
        let r = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE state IN ('completed', 'failed', 'cancelled')
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }
}
