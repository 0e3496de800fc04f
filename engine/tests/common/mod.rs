//! Shared harness for engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sdk::errors::EngineError;
use sdk::types::{InboundMessage, RenderInstruction, UserId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tasksbot_engine::clock::ManualClock;
use tasksbot_engine::conversation::{ConversationEngine, EngineOptions, Stores};
use tasksbot_engine::db::conversations::SqliteStateStore;
use tasksbot_engine::db::tasks::SqliteTaskRepository;
use tasksbot_engine::db::Database;
use tasksbot_engine::direction::{builtin_directions, DirectionRegistry};
use tasksbot_engine::state::{
    ConversationState, ConversationStateStore, TaskInsert, TaskRepository,
};
use tasksbot_engine::task::{Task, TaskStatus};
use tempfile::TempDir;

/// State store whose writes can be switched off
pub struct FlakyStateStore {
    inner: SqliteStateStore,
    pub fail_saves: AtomicBool,
}

#[async_trait]
impl ConversationStateStore for FlakyStateStore {
    async fn load(&self, user_id: UserId) -> Result<ConversationState, EngineError> {
        self.inner.load(user_id).await
    }

    async fn save(&self, user_id: UserId, state: &ConversationState) -> Result<(), EngineError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(EngineError::StorageUnavailable("connection refused".into()));
        }
        self.inner.save(user_id, state).await
    }

    async fn clear(&self, user_id: UserId) -> Result<(), EngineError> {
        self.inner.clear(user_id).await
    }
}

/// Task repository that stores the task but reports a failure, `lost_acks` times.
/// With `fail_inserts` set the insert fails before anything is written.
pub struct LossyTaskRepository {
    inner: SqliteTaskRepository,
    pub lost_acks: AtomicUsize,
    pub fail_inserts: AtomicBool,
}

#[async_trait]
impl TaskRepository for LossyTaskRepository {
    async fn insert(&self, task: &Task) -> Result<TaskInsert, EngineError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(EngineError::StorageUnavailable("database is locked".into()));
        }
        let result = self.inner.insert(task).await?;
        let remaining = self.lost_acks.load(Ordering::SeqCst);
        if remaining > 0 {
            self.lost_acks.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::StorageUnavailable("connection reset".into()));
        }
        Ok(result)
    }

    async fn find_by_token(&self, flow_token: &str) -> Result<Option<Task>, EngineError> {
        self.inner.find_by_token(flow_token).await
    }

    async fn list_by_author(
        &self,
        author: UserId,
        direction_key: Option<&str>,
        limit: u32,
    ) -> Result<Vec<Task>, EngineError> {
        self.inner.list_by_author(author, direction_key, limit).await
    }

    async fn set_status(&self, task_id: &str, status: TaskStatus) -> Result<bool, EngineError> {
        self.inner.set_status(task_id, status).await
    }
}

pub struct TestBot {
    pub engine: Arc<ConversationEngine>,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub states: Arc<FlakyStateStore>,
    pub tasks: Arc<LossyTaskRepository>,
    _dir: TempDir,
}

impl TestBot {
    pub async fn new() -> Self {
        Self::with_options(EngineOptions::default()).await
    }

    pub async fn with_options(options: EngineOptions) -> Self {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("tasksbot.db")).await.unwrap();
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
        ));

        let states = Arc::new(FlakyStateStore {
            inner: db.conversations(),
            fail_saves: AtomicBool::new(false),
        });
        let tasks = Arc::new(LossyTaskRepository {
            inner: db.tasks(),
            lost_acks: AtomicUsize::new(0),
            fail_inserts: AtomicBool::new(false),
        });

        let registry =
            DirectionRegistry::from_directions(builtin_directions().unwrap()).unwrap();
        let stores = Stores {
            states: Arc::clone(&states) as Arc<dyn ConversationStateStore>,
            settings: Arc::new(db.settings()),
            tasks: Arc::clone(&tasks) as Arc<dyn TaskRepository>,
            reminders: Arc::new(db.reminders()),
        };

        let engine = ConversationEngine::new(
            Arc::new(registry),
            stores,
            Arc::clone(&clock) as Arc<dyn tasksbot_engine::clock::Clock>,
            options,
        )
        .unwrap();

        Self {
            engine: Arc::new(engine),
            db,
            clock,
            states,
            tasks,
            _dir: dir,
        }
    }

    pub async fn send(&self, user: UserId, text: &str) -> RenderInstruction {
        self.engine
            .handle_message(InboundMessage::new(user, text))
            .await
            .unwrap()
    }

    pub async fn try_send(&self, user: UserId, text: &str) -> Result<RenderInstruction, EngineError> {
        self.engine.handle_message(InboundMessage::new(user, text)).await
    }

    pub async fn state(&self, user: UserId) -> ConversationState {
        self.states.load(user).await.unwrap()
    }

    pub async fn tasks_of(&self, user: UserId) -> Vec<Task> {
        self.tasks.list_by_author(user, None, 50).await.unwrap()
    }
}
