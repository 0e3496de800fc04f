//! Pure conversation transitions
//!
//! `Idle → DirectionSelect → FlowSelect → InStep(n) → Complete → Idle`
//!
//! [`transition`] maps a stored state and one inbound message to the next
//! state, the reply and at most one side effect. It performs no I/O; the
//! engine loads and saves around it and executes the returned [`Effect`].

use chrono::{DateTime, Utc};
use sdk::errors::{EngineError, TasksbotErrorExt};
use sdk::types::{BotCommand, InboundMessage, MenuOption, Outcome, RenderInstruction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::render;
use crate::direction::{Direction, DirectionRegistry, MenuAction, MenuNode, ReportKind, Template};
use crate::permissions::{can, Action, Role};
use crate::state::{ConversationState, Phase};
use crate::task::Task;
use crate::validator::{validate_step, validate_step_demanded, Answers};

/// What happens to a flow whose commit was blocked by a `require_field` rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyRollback {
    /// Return to the offending field, dropping it and everything after it
    #[default]
    OffendingField,
    /// Start the template over
    Restart,
    /// Drop the flow and go idle
    Discard,
}

/// Per-call inputs that are not part of the stored state
pub struct Context<'a> {
    pub registry: &'a DirectionRegistry,
    pub now: DateTime<Utc>,
    /// Direction remembered in user settings, used by `/menu`
    pub last_direction: Option<&'a str>,
    pub rollback: PolicyRollback,
    /// Role of the user sending the message
    pub role: Role,
}

/// Side effect the engine must run for a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    RememberDirection(String),
    ShowReport { direction: String, kind: ReportKind },
    Commit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// State to persist; `None` leaves the stored state untouched
    pub state: Option<ConversationState>,
    pub reply: RenderInstruction,
    pub effect: Option<Effect>,
}

impl Transition {
    fn stay(reply: RenderInstruction) -> Self {
        Self {
            state: None,
            reply,
            effect: None,
        }
    }

    fn to(state: ConversationState, reply: RenderInstruction) -> Self {
        Self {
            state: Some(state),
            reply,
            effect: None,
        }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = Some(effect);
        self
    }
}

/// Advance `state` by one inbound message.
pub fn transition(ctx: &Context<'_>, state: &ConversationState, msg: &InboundMessage) -> Transition {
    if let Some(cmd) = &msg.command {
        return command(ctx, state, cmd);
    }

    match state.phase {
        Phase::Idle => match ctx.registry.find(&msg.text) {
            Some(direction) => enter_direction(ctx, &direction),
            None => show_directions(ctx),
        },
        Phase::DirectionSelect => match ctx.registry.find(&msg.text) {
            Some(direction) => enter_direction(ctx, &direction),
            None => Transition::stay(render::unknown_direction(ctx.registry, &msg.text)),
        },
        Phase::FlowSelect => flow_select(ctx, state, &msg.text),
        Phase::InStep => in_step(ctx, state, &msg.text),
        Phase::Complete => Transition::stay(RenderInstruction::prompt("Saving your task…"))
            .with_effect(Effect::Commit),
    }
}

fn command(ctx: &Context<'_>, state: &ConversationState, cmd: &BotCommand) -> Transition {
    match cmd.name.as_str() {
        "start" | "direction" => match cmd.argument.as_deref() {
            Some(arg) => match ctx.registry.find(arg) {
                Some(direction) => enter_direction(ctx, &direction),
                None => Transition {
                    reply: render::unknown_direction(ctx.registry, arg),
                    ..show_directions(ctx)
                },
            },
            None => show_directions(ctx),
        },
        "menu" => {
            let key = state.active_direction.as_deref().or(ctx.last_direction);
            match key.and_then(|k| ctx.registry.get(k).ok()) {
                Some(direction) => enter_direction(ctx, &direction),
                None => show_directions(ctx),
            }
        }
        "cancel" => {
            if state.is_idle() {
                return Transition::stay(RenderInstruction::prompt(
                    "Nothing to cancel. Send /start to begin.",
                ));
            }
            Transition::to(idle_state(ctx.now), render::cancelled(ctx.registry))
        }
        "help" => Transition::stay(render::help()),
        "back" => back(ctx, state),
        "skip" if state.phase == Phase::InStep => in_step(ctx, state, "/skip"),
        other => Transition::stay(RenderInstruction::reprompt(format!(
            "Unknown command /{}. Send /help for the list.",
            other
        ))),
    }
}

fn idle_state(now: DateTime<Utc>) -> ConversationState {
    ConversationState {
        updated_at: Some(now),
        ..Default::default()
    }
}

fn show_directions(ctx: &Context<'_>) -> Transition {
    let state = ConversationState {
        phase: Phase::DirectionSelect,
        updated_at: Some(ctx.now),
        ..Default::default()
    };
    Transition::to(state, render::direction_menu(ctx.registry))
}

fn enter_direction(ctx: &Context<'_>, direction: &Direction) -> Transition {
    let state = ConversationState {
        phase: Phase::FlowSelect,
        active_direction: Some(direction.key.clone()),
        updated_at: Some(ctx.now),
        ..Default::default()
    };
    Transition::to(state, render::flow_menu(direction, &direction.menu, false))
        .with_effect(Effect::RememberDirection(direction.key.clone()))
}

fn active_direction(ctx: &Context<'_>, state: &ConversationState) -> Option<Arc<Direction>> {
    state
        .active_direction
        .as_deref()
        .and_then(|key| ctx.registry.get(key).ok())
}

/// Find a menu node by label, 1-based index or the template name it starts.
fn match_menu<'m>(level: &'m [MenuNode], input: &str) -> Option<(usize, &'m MenuNode)> {
    let needle = input.trim().to_lowercase();
    level
        .iter()
        .enumerate()
        .find(|(_, node)| {
            node.label.to_lowercase() == needle
                || matches!(&node.action, MenuAction::StartFlow(t) if t.to_lowercase() == needle)
        })
        .or_else(|| {
            needle
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| level.get(i).map(|node| (i, node)))
        })
}

fn flow_select(ctx: &Context<'_>, state: &ConversationState, input: &str) -> Transition {
    let Some(direction) = active_direction(ctx, state) else {
        return show_directions(ctx);
    };
    let level = direction.menu_at(&state.menu_path).unwrap_or(&direction.menu);
    let nested = !state.menu_path.is_empty();

    let Some((index, node)) = match_menu(level, input) else {
        // a template anywhere in the direction, even below a submenu
        let needle = input.trim().to_lowercase();
        if let Some(template) = direction
            .templates
            .iter()
            .find(|t| t.name.to_lowercase() == needle)
        {
            return start_flow(ctx, state, template);
        }
        let menu = render::flow_menu(&direction, level, nested);
        return Transition::stay(
            RenderInstruction::reprompt(format!("Unknown option.\n\n{}", menu.text))
                .with_options(menu.options),
        );
    };

    match &node.action {
        MenuAction::Submenu(children) => {
            let mut next = state.clone();
            next.menu_path.push(index);
            next.updated_at = Some(ctx.now);
            Transition::to(next, render::flow_menu(&direction, children, true))
        }
        MenuAction::StartFlow(name) => match direction.template(name) {
            Some(template) => start_flow(ctx, state, template),
            None => Transition::stay(RenderInstruction::reprompt(format!(
                "'{}' is not available.",
                node.label
            ))),
        },
        MenuAction::ShowReport(kind) if !can(ctx.role, Action::for_report(*kind)) => {
            Transition::stay(render::not_permitted(&node.label, ctx.role))
        }
        MenuAction::ShowReport(kind) => {
            Transition::stay(render::flow_menu(&direction, level, nested)).with_effect(
                Effect::ShowReport {
                    direction: direction.key.clone(),
                    kind: *kind,
                },
            )
        }
    }
}

fn start_flow(ctx: &Context<'_>, state: &ConversationState, template: &Template) -> Transition {
    let next = ConversationState {
        phase: Phase::InStep,
        active_direction: state.active_direction.clone(),
        active_flow: Some(template.name.clone()),
        step_index: 0,
        answers: Answers::new(),
        started_at: Some(ctx.now),
        updated_at: Some(ctx.now),
        flow_token: Some(Uuid::new_v4().to_string()),
        menu_path: state.menu_path.clone(),
        demanded_fields: Vec::new(),
    };
    Transition::to(next, render::field_prompt(template, 0, false))
}

fn active_template(ctx: &Context<'_>, state: &ConversationState) -> Option<(Arc<Direction>, usize)> {
    let direction = active_direction(ctx, state)?;
    let flow = state.active_flow.as_deref()?;
    let index = direction.templates.iter().position(|t| t.name == flow)?;
    Some((direction, index))
}

fn is_demanded(state: &ConversationState, template: &Template, step_index: usize) -> bool {
    template
        .fields
        .get(step_index)
        .map(|f| state.demanded_fields.contains(&f.name))
        .unwrap_or(false)
}

fn in_step(ctx: &Context<'_>, state: &ConversationState, input: &str) -> Transition {
    let Some((direction, t_index)) = active_template(ctx, state) else {
        return show_directions(ctx);
    };
    let template = &direction.templates[t_index];
    let step = state.step_index;
    let demanded = is_demanded(state, template, step);

    let validated = if demanded {
        validate_step_demanded(&template.fields, step, input).map(Some)
    } else {
        validate_step(&template.fields, step, input)
    };

    let value = match validated {
        Ok(value) => value,
        Err(e) => return Transition::stay(render::validation_error(template, step, demanded, &e)),
    };

    let mut next = state.clone();
    if let (Some(value), Some(field)) = (value, template.fields.get(step)) {
        next.answers.insert(field.name.clone(), value);
    }
    next.step_index = step + 1;
    next.updated_at = Some(ctx.now);

    if next.step_index >= template.fields.len() {
        next.phase = Phase::Complete;
        return Transition::to(next, RenderInstruction::prompt("Saving your task…"))
            .with_effect(Effect::Commit);
    }

    let demanded_next = is_demanded(&next, template, next.step_index);
    let reply = render::field_prompt(template, next.step_index, demanded_next);
    Transition::to(next, reply)
}

fn back(ctx: &Context<'_>, state: &ConversationState) -> Transition {
    match state.phase {
        Phase::FlowSelect if !state.menu_path.is_empty() => {
            let Some(direction) = active_direction(ctx, state) else {
                return show_directions(ctx);
            };
            let mut next = state.clone();
            next.menu_path.pop();
            next.updated_at = Some(ctx.now);
            let level = direction.menu_at(&next.menu_path).unwrap_or(&direction.menu);
            let reply = render::flow_menu(&direction, level, !next.menu_path.is_empty());
            Transition::to(next, reply)
        }
        Phase::InStep => {
            let Some((direction, t_index)) = active_template(ctx, state) else {
                return show_directions(ctx);
            };
            let template = &direction.templates[t_index];
            let mut next = state.clone();
            next.updated_at = Some(ctx.now);

            if state.step_index == 0 {
                next.clear_flow();
                next.phase = Phase::FlowSelect;
                let level = direction.menu_at(&next.menu_path).unwrap_or(&direction.menu);
                let reply = render::flow_menu(&direction, level, !next.menu_path.is_empty());
                return Transition::to(next, reply);
            }

            next.step_index = state.step_index - 1;
            next.answers.truncate_from(&template.fields, next.step_index);
            let demanded = is_demanded(&next, template, next.step_index);
            let reply = render::field_prompt(template, next.step_index, demanded);
            Transition::to(next, reply)
        }
        _ => show_directions(ctx),
    }
}

/// Resolve a flow that was in `Complete` after a commit attempt.
///
/// On the first attempt a transient storage failure is returned as an error so
/// the stored `Complete` state is kept for a retry. With `retry` set the flow
/// always ends idle.
pub fn after_commit(
    ctx: &Context<'_>,
    state: &ConversationState,
    result: Result<Task, EngineError>,
    retry: bool,
) -> Result<(ConversationState, RenderInstruction), EngineError> {
    let active = active_template(ctx, state);
    let template = active.as_ref().map(|(d, i)| &d.templates[*i]);

    let (field, rule) = match result {
        Ok(task) => return Ok((idle_state(ctx.now), render::task_summary(&task, template))),
        Err(EngineError::PolicyViolation { field, rule }) => (field, rule),
        Err(e) if e.is_transient() && !retry => return Err(e),
        Err(e) => {
            tracing::warn!(error = %e, "Commit failed, closing flow");
            let reply = RenderInstruction::prompt(format!(
                "⚠️ The task could not be saved: {}",
                e.user_hint()
            ))
            .with_outcome(Outcome::CommitFailed);
            return Ok((idle_state(ctx.now), reply));
        }
    };

    let rollback = if retry { PolicyRollback::Discard } else { ctx.rollback };
    let target = match (rollback, template) {
        (PolicyRollback::OffendingField, Some(t)) => t.fields.position(&field).map(|p| (t, p)),
        (PolicyRollback::Restart, Some(t)) => Some((t, 0)),
        _ => None,
    };

    let Some((template, step)) = target else {
        let menu = render::direction_menu(ctx.registry);
        let options: Vec<MenuOption> = menu.options;
        let reply = RenderInstruction::prompt(format!(
            "⚠️ '{}' is required by rule '{}'. The flow was discarded.",
            field, rule
        ))
        .with_options(options)
        .with_outcome(Outcome::Rejected { field });
        return Ok((idle_state(ctx.now), reply));
    };

    let mut next = state.clone();
    next.phase = Phase::InStep;
    next.step_index = step;
    next.answers.truncate_from(&template.fields, step);
    if !next.demanded_fields.contains(&field) {
        next.demanded_fields.push(field.clone());
    }
    next.updated_at = Some(ctx.now);

    let demanded = is_demanded(&next, template, step);
    let reply = render::policy_rejection(template, step, demanded, &field, &rule);
    Ok((next, reply))
}
