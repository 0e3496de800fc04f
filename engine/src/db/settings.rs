use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sdk::errors::EngineError;
use sdk::types::UserId;
use sqlx::sqlite::SqlitePool;

use crate::state::{UserSettings, UserSettingsStore};

/// SQLite-backed per-user settings
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Create a new settings store
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, user_id: UserId) -> Result<UserSettings> {
        let last_direction: Option<Option<String>> =
            sqlx::query_scalar("SELECT last_direction FROM user_settings WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .context("Failed to fetch user settings")?;

        Ok(UserSettings {
            last_direction: last_direction.flatten(),
        })
    }

    async fn upsert(&self, user_id: UserId, settings: &UserSettings) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_settings (user_id, last_direction, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
              last_direction = excluded.last_direction, updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(settings.last_direction.as_deref())
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to save user settings")?;
        Ok(())
    }
}

#[async_trait]
impl UserSettingsStore for SqliteSettingsStore {
    async fn get(&self, user_id: UserId) -> Result<UserSettings, EngineError> {
        self.fetch(user_id)
            .await
            .map_err(|e| EngineError::storage(format!("{:#}", e)))
    }

    async fn set(&self, user_id: UserId, settings: &UserSettings) -> Result<(), EngineError> {
        self.upsert(user_id, settings)
            .await
            .map_err(|e| EngineError::storage(format!("{:#}", e)))
    }
}
