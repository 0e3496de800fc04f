use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sdk::types::UserId;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;

use super::{from_millis_opt, to_millis};
use crate::state::{ConversationState, ConversationStateStore, Phase};

/// SQLite-backed conversation state, one row per user
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Create a new state store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, user_id: UserId) -> Result<Option<ConversationState>> {
        let row = sqlx::query(
            "SELECT phase, active_direction, active_flow, step_index, answers, started_at, \
             updated_at, flow_token, menu_path, demanded_fields \
             FROM conversation_states WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch conversation state")?;

        row.map(|r| row_to_state(&r)).transpose()
    }

    async fn upsert(&self, user_id: UserId, state: &ConversationState) -> Result<()> {
        let answers = serde_json::to_string(&state.answers).context("Failed to encode answers")?;
        let menu_path =
            serde_json::to_string(&state.menu_path).context("Failed to encode menu path")?;
        let demanded = serde_json::to_string(&state.demanded_fields)
            .context("Failed to encode demanded fields")?;
        let step_index = i64::try_from(state.step_index).context("Step index out of range")?;

        sqlx::query(
            "INSERT INTO conversation_states \
             (user_id, phase, active_direction, active_flow, step_index, answers, started_at, \
              updated_at, flow_token, menu_path, demanded_fields) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
              phase = excluded.phase, \
              active_direction = excluded.active_direction, \
              active_flow = excluded.active_flow, \
              step_index = excluded.step_index, \
              answers = excluded.answers, \
              started_at = excluded.started_at, \
              updated_at = excluded.updated_at, \
              flow_token = excluded.flow_token, \
              menu_path = excluded.menu_path, \
              demanded_fields = excluded.demanded_fields",
        )
        .bind(user_id)
        .bind(state.phase.as_str())
        .bind(state.active_direction.as_deref())
        .bind(state.active_flow.as_deref())
        .bind(step_index)
        .bind(answers)
        .bind(state.started_at.map(to_millis))
        .bind(state.updated_at.map(to_millis))
        .bind(state.flow_token.as_deref())
        .bind(menu_path)
        .bind(demanded)
        .execute(&self.pool)
        .await
        .context("Failed to save conversation state")?;

        Ok(())
    }

    async fn delete(&self, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM conversation_states WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to clear conversation state")?;
        Ok(())
    }
}

fn row_to_state(r: &SqliteRow) -> Result<ConversationState> {
    let phase: String = r.get("phase");
    let step_index: i64 = r.get("step_index");
    let answers: String = r.get("answers");
    let menu_path: String = r.get("menu_path");
    let demanded: String = r.get("demanded_fields");

    Ok(ConversationState {
        phase: phase.parse::<Phase>().map_err(anyhow::Error::msg)?,
        active_direction: r.get("active_direction"),
        active_flow: r.get("active_flow"),
        step_index: usize::try_from(step_index).context("Negative step index")?,
        answers: serde_json::from_str(&answers).context("Failed to decode answers")?,
        started_at: from_millis_opt(r.get("started_at"))?,
        updated_at: from_millis_opt(r.get("updated_at"))?,
        flow_token: r.get("flow_token"),
        menu_path: serde_json::from_str(&menu_path).context("Failed to decode menu path")?,
        demanded_fields: serde_json::from_str(&demanded)
            .context("Failed to decode demanded fields")?,
    })
}

#[async_trait]
impl ConversationStateStore for SqliteStateStore {
    async fn load(&self, user_id: UserId) -> Result<ConversationState, EngineError> {
        self.fetch(user_id)
            .await
            .map(Option::unwrap_or_default)
            .map_err(|e| EngineError::storage(format!("{:#}", e)))
    }

    async fn save(&self, user_id: UserId, state: &ConversationState) -> Result<(), EngineError> {
        self.upsert(user_id, state)
            .await
            .map_err(|e| EngineError::storage(format!("{:#}", e)))
    }

    async fn clear(&self, user_id: UserId) -> Result<(), EngineError> {
        self.delete(user_id)
            .await
            .map_err(|e| EngineError::storage(format!("{:#}", e)))
    }
}
