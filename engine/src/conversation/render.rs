//! Text and option rendering for engine replies

use sdk::types::{MenuOption, Outcome, RenderInstruction};

use crate::direction::{Direction, DirectionRegistry, FieldType, MenuNode, ReportKind, Template};
use crate::permissions::Role;
use crate::task::{Escalation, Task};
use crate::validator::ValidationError;

pub const BACK_PAYLOAD: &str = "/back";
pub const SKIP_PAYLOAD: &str = "/skip";
pub const EXPIRED_NOTICE: &str = "⌛ Your previous flow expired and was discarded.";

pub fn direction_menu(registry: &DirectionRegistry) -> RenderInstruction {
    let options = registry
        .list()
        .map(|d| MenuOption::new(d.display_name.clone(), d.key.clone()))
        .collect();
    RenderInstruction::prompt("Choose a direction:").with_options(options)
}

/// Reply to `/cancel` of an active flow
pub fn cancelled(registry: &DirectionRegistry) -> RenderInstruction {
    let menu = direction_menu(registry);
    RenderInstruction::prompt(format!("❌ Cancelled.\n\n{}", menu.text))
        .with_options(menu.options)
        .with_outcome(Outcome::Cancelled)
}

pub fn unknown_direction(registry: &DirectionRegistry, input: &str) -> RenderInstruction {
    let menu = direction_menu(registry);
    RenderInstruction::reprompt(format!("Unknown direction '{}'. {}", input.trim(), menu.text))
        .with_options(menu.options)
}

/// Menu of `direction` at `level`; `nested` adds a back button.
pub fn flow_menu(direction: &Direction, level: &[MenuNode], nested: bool) -> RenderInstruction {
    let mut options: Vec<MenuOption> = level
        .iter()
        .enumerate()
        .map(|(i, node)| MenuOption::new(node.label.clone(), (i + 1).to_string()))
        .collect();
    if nested {
        options.push(MenuOption::new("⬅️ Back", BACK_PAYLOAD));
    }
    RenderInstruction::prompt(format!("{}: choose an action", direction.display_name))
        .with_options(options)
}

pub fn field_prompt(template: &Template, step_index: usize, demanded: bool) -> RenderInstruction {
    let Some(field) = template.fields.get(step_index) else {
        return RenderInstruction::prompt(template.title.clone());
    };

    let mut text = format!(
        "{} · step {}/{}\n{}",
        template.title,
        step_index + 1,
        template.fields.len(),
        field.label
    );

    let mut options = Vec::new();
    if let FieldType::Choice(choices) = &field.field_type {
        options.extend(choices.iter().map(|c| MenuOption::new(c.clone(), c.clone())));
    }
    match &field.field_type {
        FieldType::Date => text.push_str("\nFormat: DD.MM.YYYY"),
        FieldType::Attachment => text.push_str("\nSend a photo or a file."),
        _ => {}
    }

    if demanded {
        text.push_str("\nThis value is now required.");
    } else if !field.required {
        text.push_str("\nSend - to skip.");
        options.push(MenuOption::new("Skip", SKIP_PAYLOAD));
    }

    RenderInstruction::prompt(text).with_options(options)
}

pub fn validation_error(
    template: &Template,
    step_index: usize,
    demanded: bool,
    err: &ValidationError,
) -> RenderInstruction {
    let prompt = field_prompt(template, step_index, demanded);
    RenderInstruction::reprompt(format!("⚠️ {}\n\n{}", err.reason, prompt.text))
        .with_options(prompt.options)
}

pub fn policy_rejection(
    template: &Template,
    step_index: usize,
    demanded: bool,
    field: &str,
    rule: &str,
) -> RenderInstruction {
    let label = template
        .fields
        .get_by_name(field)
        .map(|f| f.label.as_str())
        .unwrap_or(field);
    let prompt = field_prompt(template, step_index, demanded);
    RenderInstruction::prompt(format!(
        "⚠️ '{}' is required by rule '{}'.\n\n{}",
        label, rule, prompt.text
    ))
    .with_options(prompt.options)
    .with_outcome(Outcome::Rejected {
        field: field.to_string(),
    })
}

pub fn task_summary(task: &Task, template: Option<&Template>) -> RenderInstruction {
    let mut lines = vec![format!("✅ Task #{} saved", task.short_id())];
    for answer in task.fields.iter() {
        let label = template
            .and_then(|t| t.fields.get_by_name(&answer.field))
            .map(|f| f.label.as_str())
            .unwrap_or(&answer.field);
        lines.push(format!("• {}: {}", label, answer.value));
    }
    if task.escalation == Escalation::Pending {
        lines.push("🚨 Escalated for follow-up".to_string());
    }
    if let Some(at) = task.reminder_at {
        lines.push(format!("🔔 Reminder at {}", at.format("%d.%m.%Y %H:%M UTC")));
    }

    RenderInstruction::prompt(lines.join("\n")).with_outcome(Outcome::Completed {
        task_id: task.id.clone(),
    })
}

pub fn not_permitted(label: &str, role: Role) -> RenderInstruction {
    RenderInstruction::reprompt(format!(
        "⛔ '{}' is not available for role {}.",
        label, role
    ))
}

pub fn report(direction: &Direction, kind: ReportKind, tasks: &[Task]) -> String {
    let mut lines = vec![format!("📊 {} · {}", direction.display_name, kind.title())];
    if tasks.is_empty() {
        lines.push("Nothing here yet.".to_string());
    }
    for task in tasks {
        let title = direction
            .template(&task.template_name)
            .map(|t| t.title.as_str())
            .unwrap_or(&task.template_name);
        lines.push(format!(
            "#{} {} · {} · {}",
            task.short_id(),
            task.created_at.format("%d.%m %H:%M"),
            title,
            task.status
        ));
    }
    lines.join("\n")
}

pub fn help() -> RenderInstruction {
    RenderInstruction::prompt(
        "Commands:\n\
         /start [direction] - choose a direction\n\
         /direction [direction] - switch direction\n\
         /menu - open the menu of the current direction\n\
         /back - go one step back\n\
         /skip - skip an optional field\n\
         /cancel - abandon the current flow\n\
         /help - this message",
    )
}
