//! Task read operations: get, active/history listings, dedup lookups.

use anyhow::Result;
use sqlx::Row;

use super::super::db::TaskDb;
use super::super::types::{DuplicateCheck, HistoryPage, TaskId, TaskRecord};
use super::{like_pattern, task_from_row, TASK_COLUMNS};

/// Largest page the history query will return.
pub const MAX_PAGE_SIZE: u32 = 100;

impl TaskDb {
    /// Fetch a single task row.
    pub async fn get_task(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Pending, downloading and paused tasks in queue order.
    pub async fn list_active(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE state IN ('pending', 'downloading', 'paused')
            ORDER BY queue_seq ASC, id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Pending tasks only, in FIFO order.
    pub async fn list_pending(&self) -> Result<Vec<TaskRecord>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE state = 'pending'
            ORDER BY queue_seq ASC, id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Finished tasks, newest first. `page` is 0-based; `page_size` is clamped to 1..=100.
    /// `title_filter` matches a substring of the title (LIKE wildcards are escaped).
    pub async fn list_history(
        &self,
        page: u32,
        page_size: u32,
        title_filter: Option<&str>,
    ) -> Result<HistoryPage> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = i64::from(page) * i64::from(page_size);
        let pattern = title_filter
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let (where_extra, count_sql) = if pattern.is_some() {
            (
                "AND title LIKE ?1 ESCAPE '\\'",
                "SELECT COUNT(*) AS n FROM tasks \
                 WHERE state IN ('completed', 'failed', 'cancelled') AND title LIKE ?1 ESCAPE '\\'",
            )
        } else {
            (
                "",
                "SELECT COUNT(*) AS n FROM tasks WHERE state IN ('completed', 'failed', 'cancelled')",
            )
        };

        let mut count_q = sqlx::query(count_sql);
        if let Some(p) = &pattern {
            count_q = count_q.bind(p);
        }
        let total: i64 = count_q.fetch_one(&self.pool).await?.get("n");

        let (limit_idx, offset_idx) = if pattern.is_some() { (2, 3) } else { (1, 2) };
        let sql = format!(
            r#"
            SELECT {TASK_COLUMNS}
            FROM tasks
            WHERE state IN ('completed', 'failed', 'cancelled') {where_extra}
            ORDER BY COALESCE(completed_at, updated_at) DESC, id DESC
            LIMIT ?{limit_idx} OFFSET ?{offset_idx}
            "#
        );
        let mut q = sqlx::query(&sql);
        if let Some(p) = &pattern {
            q = q.bind(p);
        }
        let rows = q
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        let items = rows.iter().map(task_from_row).collect::<Result<Vec<_>>>()?;

        Ok(HistoryPage {
            items,
            total_count: total.max(0) as u64,
            page,
            page_size,
        })
    }

    /// Id of an active task with this content id, if any.
    pub async fn find_active_by_content(&self, content_id: &str) -> Result<Option<TaskId>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM tasks
            WHERE content_id = ?1 AND state IN ('pending', 'downloading', 'paused')
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("id")))
    }

    /// Most recent completed task with this content id, if any.
    pub async fn find_completed_by_content(&self, content_id: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE content_id = ?1 AND state = 'completed'
            ORDER BY completed_at DESC, id DESC
            LIMIT 1
            "#
        ))
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// Both dedup signals for a content id.
    pub async fn check_duplicate(&self, content_id: &str) -> Result<DuplicateCheck> {
        Ok(DuplicateCheck {
            in_queue: self.find_active_by_content(content_id).await?,
            history_match: self.find_completed_by_content(content_id).await?,
        })
    }
}
