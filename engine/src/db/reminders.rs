use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::{from_millis, to_millis};
use crate::state::ReminderSink;

/// A queued reminder not yet picked up by the scheduler
#[derive(Debug, Clone, PartialEq)]
pub struct PendingReminder {
    pub id: i64,
    pub task_id: String,
    pub fires_at: DateTime<Utc>,
}

/// Reminder queue table drained by an external scheduler
pub struct SqliteReminderQueue {
    pool: SqlitePool,
}

impl SqliteReminderQueue {
    /// Create a new reminder queue
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn enqueue(&self, task_id: &str, fires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO reminders (task_id, fires_at, created_at) VALUES (?, ?, ?)",
        )
        .bind(task_id)
        .bind(to_millis(fires_at))
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to enqueue reminder")?;
        Ok(())
    }

    /// Undelivered reminders due at or before `now`, oldest first
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<PendingReminder>> {
        let rows = sqlx::query(
            "SELECT id, task_id, fires_at FROM reminders \
             WHERE delivered_at IS NULL AND fires_at <= ? ORDER BY fires_at ASC",
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch due reminders")?;

        rows.into_iter()
            .map(|r| {
                Ok(PendingReminder {
                    id: r.get("id"),
                    task_id: r.get("task_id"),
                    fires_at: from_millis(r.get("fires_at"))?,
                })
            })
            .collect()
    }

    /// Undelivered reminders of one task
    pub async fn pending_for_task(&self, task_id: &str) -> Result<Vec<PendingReminder>> {
        let rows = sqlx::query(
            "SELECT id, task_id, fires_at FROM reminders \
             WHERE task_id = ? AND delivered_at IS NULL ORDER BY fires_at ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch reminders")?;

        rows.into_iter()
            .map(|r| {
                Ok(PendingReminder {
                    id: r.get("id"),
                    task_id: r.get("task_id"),
                    fires_at: from_millis(r.get("fires_at"))?,
                })
            })
            .collect()
    }

    pub async fn mark_delivered(&self, reminder_id: i64) -> Result<()> {
        sqlx::query("UPDATE reminders SET delivered_at = ? WHERE id = ?")
            .bind(Utc::now().timestamp_millis())
            .bind(reminder_id)
            .execute(&self.pool)
            .await
            .context("Failed to mark reminder delivered")?;
        Ok(())
    }
}

#[async_trait]
impl ReminderSink for SqliteReminderQueue {
    async fn schedule(&self, task_id: &str, fires_at: DateTime<Utc>) -> Result<(), EngineError> {
        self.enqueue(task_id, fires_at)
            .await
            .map_err(|e| EngineError::storage(format!("{:#}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::state::TaskRepository;
    use crate::task::{Escalation, Task, TaskStatus};
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    async fn seed_task(db: &Database) -> Task {
        let task = Task {
            id: "task-1".into(),
            direction_key: "personal".into(),
            template_name: "reminder".into(),
            author_user_id: 1,
            fields: Default::default(),
            created_at: Utc::now(),
            status: TaskStatus::Open,
            escalation: Escalation::None,
            flow_token: "tok".into(),
            reminder_at: None,
        };
        db.tasks().insert(&task).await.unwrap();
        task
    }

    #[tokio::test]
    async fn test_schedule_and_drain() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let task = seed_task(&db).await;
        let queue = db.reminders();

        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        queue.schedule(&task.id, t0 + Duration::hours(2)).await.unwrap();
        queue.schedule(&task.id, t0).await.unwrap();
        // same instant twice is stored once
        queue.schedule(&task.id, t0).await.unwrap();

        assert_eq!(queue.pending_for_task(&task.id).await.unwrap().len(), 2);

        let due = queue.due(t0 + Duration::minutes(1)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].fires_at, t0);

        queue.mark_delivered(due[0].id).await.unwrap();
        assert!(queue.due(t0 + Duration::minutes(1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();
        let queue = db.reminders();

        let err = queue.schedule("missing", Utc::now()).await.unwrap_err();
        assert!(matches!(err, EngineError::StorageUnavailable(_)));
    }
}
