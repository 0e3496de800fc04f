use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::UserId;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::{from_millis, from_millis_opt, to_millis};
use crate::state::{TaskInsert, TaskRepository};
use crate::task::{Escalation, Task, TaskStatus};

const TASK_COLUMNS: &str = "id, direction_key, template_name, author_user_id, fields, created_at, \
                            status, escalation, flow_token, reminder_at";

/// SQLite-backed task repository
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    /// Create a new task repository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert unless the flow token is taken. Returns true if a row was written.
    async fn insert_task(&self, task: &Task) -> Result<bool> {
        let fields = serde_json::to_string(&task.fields).context("Failed to encode task fields")?;

        let result = sqlx::query(
            "INSERT INTO tasks (id, direction_key, template_name, author_user_id, fields, \
             created_at, status, escalation, flow_token, reminder_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(flow_token) DO NOTHING",
        )
        .bind(&task.id)
        .bind(&task.direction_key)
        .bind(&task.template_name)
        .bind(task.author_user_id)
        .bind(fields)
        .bind(to_millis(task.created_at))
        .bind(task.status.as_str())
        .bind(task.escalation.as_str())
        .bind(&task.flow_token)
        .bind(task.reminder_at.map(to_millis))
        .execute(&self.pool)
        .await
        .context("Failed to insert task")?;

        Ok(result.rows_affected() == 1)
    }

    async fn fetch_by_token(&self, flow_token: &str) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE flow_token = ?", TASK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(flow_token)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task by flow token")?;

        row.map(|r| row_to_task(&r)).transpose()
    }

    /// Get a task by id
    pub async fn get_task(&self, task_id: &str) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch task")?;

        row.map(|r| row_to_task(&r)).transpose()
    }

    async fn fetch_by_author(
        &self,
        author: UserId,
        direction_key: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE author_user_id = ? AND (? IS NULL OR direction_key = ?) \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
            TASK_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(author)
            .bind(direction_key)
            .bind(direction_key)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch tasks by author")?;

        rows.iter().map(row_to_task).collect()
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<bool> {
        let result = sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(task_id)
            .execute(&self.pool)
            .await
            .context("Failed to update task status")?;

        Ok(result.rows_affected() > 0)
    }
}

fn row_to_task(r: &SqliteRow) -> Result<Task> {
    let fields: String = r.get("fields");
    let status: String = r.get("status");
    let escalation: String = r.get("escalation");

    Ok(Task {
        id: r.get("id"),
        direction_key: r.get("direction_key"),
        template_name: r.get("template_name"),
        author_user_id: r.get("author_user_id"),
        fields: serde_json::from_str(&fields).context("Failed to decode task fields")?,
        created_at: from_millis(r.get("created_at"))?,
        status: status.parse::<TaskStatus>().map_err(anyhow::Error::msg)?,
        escalation: escalation
            .parse::<Escalation>()
            .map_err(anyhow::Error::msg)?,
        flow_token: r.get("flow_token"),
        reminder_at: from_millis_opt(r.get("reminder_at"))?,
    })
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert(&self, task: &Task) -> Result<TaskInsert, EngineError> {
        let outcome: Result<TaskInsert> = async {
            if self.insert_task(task).await? {
                return Ok(TaskInsert {
                    task: task.clone(),
                    created: true,
                });
            }
            let existing = self
                .fetch_by_token(&task.flow_token)
                .await?
                .context("Task with conflicting flow token disappeared")?;
            Ok(TaskInsert {
                task: existing,
                created: false,
            })
        }
        .await;

        outcome.map_err(|e| EngineError::storage(format!("{:#}", e)))
    }

    async fn find_by_token(&self, flow_token: &str) -> Result<Option<Task>, EngineError> {
        self.fetch_by_token(flow_token)
            .await
            .map_err(|e| EngineError::storage(format!("{:#}", e)))
    }

    async fn list_by_author(
        &self,
        author: UserId,
        direction_key: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Task>, EngineError> {
        self.fetch_by_author(author, direction_key, limit)
            .await
            .map_err(|e| EngineError::storage(format!("{:#}", e)))
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<bool, EngineError> {
        self.update_status(task_id, status)
            .await
            .map_err(|e| EngineError::storage(format!("{:#}", e)))
    }
}
