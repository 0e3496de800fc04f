//! Task commit pipeline
//!
//! Turns the answers of a completed flow into a stored [`Task`]:
//!
//! 1. Order the answers by the template schema
//! 2. Run the direction's policy rules; a `require_field` rejection stops here
//! 3. Insert the task, idempotent on the flow token
//! 4. Hand computed reminders to the [`ReminderSink`]
//!
//! Reminder scheduling is fire-and-forget: a failing sink is logged and the
//! commit still succeeds. When the flow token is already stored (an earlier
//! attempt lost its acknowledgement) the reminders are computed again from the
//! stored task and scheduled once more; the sink ignores duplicates.

use chrono::{DateTime, Utc};
use sdk::errors::EngineError;
use sdk::types::UserId;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::direction::Direction;
use crate::policy;
use crate::state::{bounded, ReminderSink, TaskRepository};
use crate::task::{Escalation, Task, TaskStatus};
use crate::validator::Answers;

pub struct TaskCommitPipeline {
    tasks: Arc<dyn TaskRepository>,
    reminders: Arc<dyn ReminderSink>,
    clock: Arc<dyn Clock>,
    storage_timeout: Duration,
}

impl TaskCommitPipeline {
    /// Create a new commit pipeline
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        reminders: Arc<dyn ReminderSink>,
        clock: Arc<dyn Clock>,
        storage_timeout: Duration,
    ) -> Self {
        Self {
            tasks,
            reminders,
            clock,
            storage_timeout,
        }
    }

    pub fn tasks(&self) -> &Arc<dyn TaskRepository> {
        &self.tasks
    }

    /// Validate against policies, persist and schedule.
    ///
    /// Calling this again with the same `flow_token` returns the task stored
    /// the first time.
    pub async fn commit(
        &self,
        user_id: UserId,
        direction: &Direction,
        template_name: &str,
        answers: &Answers,
        flow_token: &str,
    ) -> Result<Task, EngineError> {
        let template = direction
            .template(template_name)
            .ok_or_else(|| EngineError::UnknownFlow {
                direction: direction.key.clone(),
                flow: template_name.to_string(),
            })?;

        // storage keeps milliseconds; reminders derived from `now` must match a reload
        let now = self.clock.now();
        let now = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);
        let fields = answers.ordered_by(&template.fields);

        let decision = policy::evaluate(direction, template_name, &fields, now).into_result()?;
        debug!(
            direction = %direction.key,
            template = template_name,
            matched = ?decision.matched_rules,
            "Policies evaluated"
        );

        let task = Task {
            id: Uuid::new_v4().to_string(),
            direction_key: direction.key.clone(),
            template_name: template_name.to_string(),
            author_user_id: user_id,
            fields,
            created_at: now,
            status: TaskStatus::Open,
            escalation: if decision.escalate {
                Escalation::Pending
            } else {
                Escalation::None
            },
            flow_token: flow_token.to_string(),
            reminder_at: decision.reminder_at,
        };

        let inserted = bounded(self.storage_timeout, "task insert", self.tasks.insert(&task)).await?;

        if !inserted.created {
            let stored = inserted.task;
            info!(task_id = %stored.id, flow_token, "Flow already committed");
            let reminders =
                policy::evaluate(direction, template_name, &stored.fields, stored.created_at)
                    .reminders;
            self.schedule(&stored.id, &reminders).await;
            return Ok(stored);
        }

        info!(
            task_id = %task.id,
            direction = %task.direction_key,
            template = %task.template_name,
            escalation = %task.escalation,
            "Task committed"
        );

        self.schedule(&task.id, &decision.reminders).await;

        Ok(inserted.task)
    }

    async fn schedule(&self, task_id: &str, reminders: &[DateTime<Utc>]) {
        for fires_at in reminders {
            let scheduled = bounded(
                self.storage_timeout,
                "reminder schedule",
                self.reminders.schedule(task_id, *fires_at),
            )
            .await;
            if let Err(e) = scheduled {
                warn!(task_id, %fires_at, error = %e, "Failed to schedule reminder");
            }
        }
    }
}
