//! Conversation state and the persistence boundary
//!
//! The engine only talks to storage through the async traits in this module.
//! Implementations must map connectivity problems to
//! [`EngineError::StorageUnavailable`]; "not found" is never an error for
//! conversation state or user settings.

mod locks;

pub use locks::{UserGuard, UserLocks};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::UserId;
use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskStatus};

/// Position of a user in the conversation state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    DirectionSelect,
    FlowSelect,
    InStep,
    /// All steps answered, commit pending
    Complete,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::DirectionSelect => "direction_select",
            Phase::FlowSelect => "flow_select",
            Phase::InStep => "in_step",
            Phase::Complete => "complete",
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Phase::Idle),
            "direction_select" => Ok(Phase::DirectionSelect),
            "flow_select" => Ok(Phase::FlowSelect),
            "in_step" => Ok(Phase::InStep),
            "complete" => Ok(Phase::Complete),
            other => Err(format!("unknown phase '{}'", other)),
        }
    }
}

/// Per-user conversation state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub phase: Phase,
    pub active_direction: Option<String>,
    pub active_flow: Option<String>,
    pub step_index: usize,
    pub answers: crate::validator::Answers,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Token identifying this flow run; the commit is idempotent on it
    pub flow_token: Option<String>,
    /// Indices into nested submenus of the active direction
    #[serde(default)]
    pub menu_path: Vec<usize>,
    /// Optional fields that must be answered after a policy rollback
    #[serde(default)]
    pub demanded_fields: Vec<String>,
}

impl ConversationState {
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Whether the last activity is older than `timeout`.
    ///
    /// Idle states never expire.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        if self.is_idle() {
            return false;
        }
        match self.updated_at {
            Some(updated) => now - updated > timeout,
            None => false,
        }
    }

    /// Drop the running flow but keep the direction context.
    pub fn clear_flow(&mut self) {
        self.active_flow = None;
        self.step_index = 0;
        self.answers = Default::default();
        self.started_at = None;
        self.flow_token = None;
        self.demanded_fields.clear();
    }
}

/// Per-user preferences that outlive conversations
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserSettings {
    pub last_direction: Option<String>,
}

#[async_trait]
pub trait ConversationStateStore: Send + Sync {
    /// Load the state, returning the idle default when none is stored.
    async fn load(&self, user_id: UserId) -> Result<ConversationState, EngineError>;

    /// Overwrite the stored state in one statement.
    async fn save(&self, user_id: UserId, state: &ConversationState) -> Result<(), EngineError>;

    /// Reset to idle.
    async fn clear(&self, user_id: UserId) -> Result<(), EngineError>;
}

#[async_trait]
pub trait UserSettingsStore: Send + Sync {
    async fn get(&self, user_id: UserId) -> Result<UserSettings, EngineError>;

    async fn set(&self, user_id: UserId, settings: &UserSettings) -> Result<(), EngineError>;
}

/// Result of [`TaskRepository::insert`]
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInsert {
    pub task: Task,
    /// False when a task with the same flow token already existed
    pub created: bool,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a task; if its flow token is already stored, return the stored task.
    async fn insert(&self, task: &Task) -> Result<TaskInsert, EngineError>;

    async fn find_by_token(&self, flow_token: &str) -> Result<Option<Task>, EngineError>;

    /// Newest first, optionally restricted to one direction.
    async fn list_by_author(
        &self,
        author: UserId,
        direction_key: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Task>, EngineError>;

    /// Returns false if no task has that id.
    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<bool, EngineError>;
}

/// Hand-off point for reminder delivery
#[async_trait]
pub trait ReminderSink: Send + Sync {
    async fn schedule(&self, task_id: &str, fires_at: DateTime<Utc>) -> Result<(), EngineError>;
}

/// Bound a storage call by `limit`; running out of time counts as unavailable storage.
pub async fn bounded<T, F>(limit: std::time::Duration, op: &str, fut: F) -> Result<T, EngineError>
where
    F: std::future::Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::StorageUnavailable(format!(
            "{} timed out after {}ms",
            op,
            limit.as_millis()
        ))),
    }
}
