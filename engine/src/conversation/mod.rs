//! Conversation engine
//!
//! Entry point for every inbound message. For one message the engine:
//!
//! 1. Takes the user's lock (messages of one user never interleave)
//! 2. Loads the stored state, discarding it if it no longer matches the registry
//! 3. Retries a pending commit, or expires a flow idle for too long
//! 4. Runs the pure [`machine::transition`] and executes its effect
//! 5. Saves the new state and returns a [`RenderInstruction`]
//!
//! User-input problems become re-prompts. Only `StorageUnavailable` reaches the
//! caller, and in that case the stored state is unchanged (a flow that reached
//! `Complete` stays there so the commit can be retried).

pub mod machine;
pub mod render;

pub use machine::{Context, Effect, PolicyRollback, Transition};

use sdk::errors::EngineError;
use sdk::types::{InboundMessage, Outcome, RenderInstruction, UserId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::commit::TaskCommitPipeline;
use crate::db::Database;
use crate::direction::{DirectionRegistry, ReportKind};
use crate::permissions::RoleMap;
use crate::state::{
    bounded, ConversationState, ConversationStateStore, Phase, ReminderSink, TaskRepository,
    UserLocks, UserSettings, UserSettingsStore,
};
use crate::task::{Escalation, TaskStatus};

/// Tunables of the engine, usually taken from `[conversation]` in config.toml
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub idle_timeout: chrono::Duration,
    pub storage_timeout: Duration,
    pub rollback: PolicyRollback,
    pub report_limit: u32,
    pub roles: RoleMap,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            idle_timeout: chrono::Duration::minutes(30),
            storage_timeout: Duration::from_millis(5000),
            rollback: PolicyRollback::default(),
            report_limit: 10,
            roles: RoleMap::default(),
        }
    }
}

/// Storage collaborators of the engine
#[derive(Clone)]
pub struct Stores {
    pub states: Arc<dyn ConversationStateStore>,
    pub settings: Arc<dyn UserSettingsStore>,
    pub tasks: Arc<dyn TaskRepository>,
    pub reminders: Arc<dyn ReminderSink>,
}

impl Stores {
    /// All stores backed by one SQLite database
    pub fn sqlite(db: &Database) -> Self {
        Self {
            states: Arc::new(db.conversations()),
            settings: Arc::new(db.settings()),
            tasks: Arc::new(db.tasks()),
            reminders: Arc::new(db.reminders()),
        }
    }
}

pub struct ConversationEngine {
    registry: Arc<DirectionRegistry>,
    states: Arc<dyn ConversationStateStore>,
    settings: Arc<dyn UserSettingsStore>,
    pipeline: TaskCommitPipeline,
    locks: UserLocks,
    clock: Arc<dyn Clock>,
    options: EngineOptions,
}

impl ConversationEngine {
    /// Create a new engine. The registry must be sealed.
    pub fn new(
        registry: Arc<DirectionRegistry>,
        stores: Stores,
        clock: Arc<dyn Clock>,
        options: EngineOptions,
    ) -> Result<Self, EngineError> {
        if !registry.is_sealed() {
            return Err(EngineError::Config(
                "direction registry must be sealed before the engine starts".to_string(),
            ));
        }
        if registry.is_empty() {
            return Err(EngineError::Config("no directions registered".to_string()));
        }

        let pipeline = TaskCommitPipeline::new(
            stores.tasks,
            stores.reminders,
            Arc::clone(&clock),
            options.storage_timeout,
        );

        info!(
            directions = registry.len(),
            idle_timeout_secs = options.idle_timeout.num_seconds(),
            rollback = ?options.rollback,
            "Conversation engine ready"
        );

        Ok(Self {
            registry,
            states: stores.states,
            settings: stores.settings,
            pipeline,
            locks: UserLocks::new(),
            clock,
            options,
        })
    }

    pub fn registry(&self) -> &Arc<DirectionRegistry> {
        &self.registry
    }

    pub fn tasks(&self) -> &Arc<dyn TaskRepository> {
        self.pipeline.tasks()
    }

    /// Advance the user's conversation by one message.
    pub async fn handle_message(&self, msg: InboundMessage) -> Result<RenderInstruction, EngineError> {
        let user_id = msg.user_id;
        let _guard = self.locks.lock(user_id).await;
        let now = self.clock.now();

        let stored = bounded(
            self.options.storage_timeout,
            "state load",
            self.states.load(user_id),
        )
        .await?;
        let (mut state, mut dirty) = self.sanitize(user_id, stored);

        if state.phase == Phase::Complete {
            if msg.command.as_ref().is_some_and(|c| c.name == "cancel") {
                return self.cancel_pending(user_id, &state).await;
            }
            return self.retry_commit(user_id, &state).await;
        }

        let expired = state.is_expired(now, self.options.idle_timeout);
        if expired {
            info!(user_id, phase = state.phase.as_str(), "Conversation expired");
            state = ConversationState::default();
            dirty = true;
        }

        let wants_last = msg.command.as_ref().is_some_and(|c| c.name == "menu")
            && state.active_direction.is_none();
        let last_direction = if wants_last {
            self.load_settings(user_id).await?.last_direction
        } else {
            None
        };

        let ctx = Context {
            registry: &self.registry,
            now,
            last_direction: last_direction.as_deref(),
            rollback: self.options.rollback,
            role: self.options.roles.role_of(user_id),
        };

        let Transition {
            state: mut next,
            mut reply,
            effect,
        } = machine::transition(&ctx, &state, &msg);

        debug!(
            user_id,
            from = state.phase.as_str(),
            to = next.as_ref().map(|s| s.phase.as_str()).unwrap_or("unchanged"),
            outcome = ?reply.outcome,
            "Transition"
        );

        match effect {
            None => {}
            Some(Effect::RememberDirection(key)) => {
                let settings = UserSettings {
                    last_direction: Some(key),
                };
                bounded(
                    self.options.storage_timeout,
                    "settings save",
                    self.settings.set(user_id, &settings),
                )
                .await?;
            }
            Some(Effect::ShowReport { direction, kind }) => {
                let text = self.report(user_id, &direction, kind).await?;
                reply = reply.with_notice(&text);
            }
            Some(Effect::Commit) => {
                let complete = next.take().unwrap_or_else(|| state.clone());
                self.save_state(user_id, &complete).await?;
                let (after, commit_reply) = self.run_commit(user_id, &ctx, &complete, false).await?;
                next = Some(after);
                reply = commit_reply;
            }
        }

        match next {
            Some(ref s) => self.save_state(user_id, s).await?,
            None if dirty => self.save_state(user_id, &state).await?,
            None => {}
        }

        if expired {
            reply = reply.with_notice(render::EXPIRED_NOTICE);
            if matches!(reply.outcome, Outcome::Prompt | Outcome::Reprompt) {
                reply.outcome = Outcome::Expired;
            }
        }

        Ok(reply)
    }

    /// A later message found the flow in `Complete`: commit once more, then go idle.
    async fn retry_commit(
        &self,
        user_id: UserId,
        state: &ConversationState,
    ) -> Result<RenderInstruction, EngineError> {
        info!(user_id, flow_token = ?state.flow_token, "Retrying pending commit");

        let ctx = Context {
            registry: &self.registry,
            now: self.clock.now(),
            last_direction: None,
            rollback: self.options.rollback,
            role: self.options.roles.role_of(user_id),
        };
        let (after, reply) = self.run_commit(user_id, &ctx, state, true).await?;
        self.save_state(user_id, &after).await?;
        Ok(reply)
    }

    /// `/cancel` on a flow waiting in `Complete`.
    ///
    /// The earlier insert may have reached storage even though it reported a
    /// failure. If the flow token is already stored the task exists and is
    /// reported; otherwise the answers are discarded.
    async fn cancel_pending(
        &self,
        user_id: UserId,
        state: &ConversationState,
    ) -> Result<RenderInstruction, EngineError> {
        let stored = match state.flow_token.as_deref() {
            Some(token) => {
                bounded(
                    self.options.storage_timeout,
                    "task lookup",
                    self.pipeline.tasks().find_by_token(token),
                )
                .await?
            }
            None => None,
        };

        let now = self.clock.now();
        let reply = match stored {
            Some(task) => {
                info!(user_id, task_id = %task.id, "Cancel after commit, task already stored");
                let direction = self.registry.get(&task.direction_key).ok();
                let template = direction
                    .as_ref()
                    .and_then(|d| d.template(&task.template_name));
                render::task_summary(&task, template)
            }
            None => {
                info!(user_id, flow_token = ?state.flow_token, "Pending commit cancelled");
                render::cancelled(&self.registry)
            }
        };

        let idle = ConversationState {
            updated_at: Some(now),
            ..Default::default()
        };
        self.save_state(user_id, &idle).await?;
        Ok(reply)
    }

    async fn run_commit(
        &self,
        user_id: UserId,
        ctx: &Context<'_>,
        state: &ConversationState,
        retry: bool,
    ) -> Result<(ConversationState, RenderInstruction), EngineError> {
        let result = match (
            state.active_direction.as_deref(),
            state.active_flow.as_deref(),
            state.flow_token.as_deref(),
        ) {
            (Some(key), Some(flow), Some(token)) => match self.registry.get(key) {
                Ok(direction) => {
                    self.pipeline
                        .commit(user_id, &direction, flow, &state.answers, token)
                        .await
                }
                Err(e) => Err(e),
            },
            _ => Err(EngineError::UnknownFlow {
                direction: state.active_direction.clone().unwrap_or_default(),
                flow: state.active_flow.clone().unwrap_or_default(),
            }),
        };

        if let Err(e) = &result {
            warn!(user_id, retry, error = %e, "Commit did not succeed");
        }

        machine::after_commit(ctx, state, result, retry)
    }

    async fn report(
        &self,
        user_id: UserId,
        direction_key: &str,
        kind: ReportKind,
    ) -> Result<String, EngineError> {
        let direction = self.registry.get(direction_key)?;
        let limit = self.options.report_limit;
        let window = match kind {
            ReportKind::Recent => limit,
            ReportKind::Open | ReportKind::Escalated => limit.saturating_mul(5),
        };

        let mut tasks = bounded(
            self.options.storage_timeout,
            "task list",
            self.pipeline
                .tasks()
                .list_by_author(user_id, Some(direction_key), window),
        )
        .await?;

        tasks.retain(|t| match kind {
            ReportKind::Recent => true,
            ReportKind::Open => t.status == TaskStatus::Open,
            ReportKind::Escalated => t.escalation == Escalation::Pending,
        });
        tasks.truncate(limit as usize);

        Ok(render::report(&direction, kind, &tasks))
    }

    async fn load_settings(&self, user_id: UserId) -> Result<UserSettings, EngineError> {
        bounded(
            self.options.storage_timeout,
            "settings load",
            self.settings.get(user_id),
        )
        .await
    }

    async fn save_state(&self, user_id: UserId, state: &ConversationState) -> Result<(), EngineError> {
        bounded(
            self.options.storage_timeout,
            "state save",
            self.states.save(user_id, state),
        )
        .await
    }

    /// Replace a stored state that no longer fits the registry with idle.
    fn sanitize(&self, user_id: UserId, state: ConversationState) -> (ConversationState, bool) {
        match self.check_invariants(&state) {
            Ok(()) => (state, false),
            Err(reason) => {
                warn!(user_id, reason, "Discarding inconsistent conversation state");
                (ConversationState::default(), true)
            }
        }
    }

    fn check_invariants(&self, state: &ConversationState) -> Result<(), &'static str> {
        if matches!(state.phase, Phase::Idle | Phase::DirectionSelect) {
            return Ok(());
        }

        let direction = state
            .active_direction
            .as_deref()
            .ok_or("no active direction")
            .and_then(|key| self.registry.get(key).map_err(|_| "unknown direction"))?;

        if state.phase == Phase::FlowSelect {
            return direction
                .menu_at(&state.menu_path)
                .map(|_| ())
                .ok_or("stale menu path");
        }

        let template = state
            .active_flow
            .as_deref()
            .and_then(|flow| direction.template(flow))
            .ok_or("unknown flow")?;
        if state.flow_token.is_none() {
            return Err("missing flow token");
        }

        let len = template.fields.len();
        match state.phase {
            Phase::InStep if state.step_index < len => Ok(()),
            Phase::Complete if state.step_index == len => Ok(()),
            _ => Err("step index out of range"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::direction::builtin_directions;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    async fn engine(dir: &TempDir) -> ConversationEngine {
        let db = Database::new(&dir.path().join("test.db")).await.unwrap();
        let registry =
            Arc::new(DirectionRegistry::from_directions(builtin_directions().unwrap()).unwrap());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap(),
        ));
        ConversationEngine::new(registry, Stores::sqlite(&db), clock, EngineOptions::default())
            .unwrap()
    }

    #[tokio::test]
    async fn test_unsealed_registry_is_refused() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(&dir.path().join("test.db")).await.unwrap();
        let mut registry = DirectionRegistry::new();
        for d in builtin_directions().unwrap() {
            registry.register(d).unwrap();
        }
        let result = ConversationEngine::new(
            Arc::new(registry),
            Stores::sqlite(&db),
            Arc::new(crate::clock::SystemClock),
            EngineOptions::default(),
        );
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_inconsistent_state_is_discarded() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        let bogus = ConversationState {
            phase: Phase::InStep,
            active_direction: Some("bakery".into()),
            active_flow: Some("bread".into()),
            flow_token: Some("x".into()),
            ..Default::default()
        };
        engine.states.save(1, &bogus).await.unwrap();

        let reply = engine
            .handle_message(InboundMessage::new(1, "hello"))
            .await
            .unwrap();
        assert_eq!(reply.outcome, Outcome::Prompt);
        let state = engine.states.load(1).await.unwrap();
        assert_eq!(state.phase, Phase::DirectionSelect);
    }

    #[tokio::test]
    async fn test_help_does_not_touch_state() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir).await;

        engine
            .handle_message(InboundMessage::new(1, "/help"))
            .await
            .unwrap();
        assert_eq!(engine.states.load(1).await.unwrap(), ConversationState::default());
    }
}
