//! Policy engine
//!
//! Evaluates a direction's declarative rules against the answers of a flow.
//! A rule pairs a field predicate with one effect:
//!
//! - `escalate`: the task needs elevated follow-up (cumulative)
//! - `schedule_reminder`: compute when a reminder should fire (cumulative)
//! - `require_field`: a field that must be present; the first unmet one blocks the commit
//!
//! Rules run in declaration order and only when scoped to the template being
//! committed (an empty `templates` list applies to all templates). The engine
//! only computes *when* reminders fire; delivery belongs to the reminder sink.
//!
//! ```toml
//! [[directions.policies]]
//! name = "large-delivery"
//! when = { op = "gt", field = "volume", value = 50 }
//! effect = { type = "escalate" }
//! ```

use chrono::{DateTime, Duration, NaiveTime, Utc};
use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::direction::{Direction, FieldType, Template};
use crate::validator::Answers;

/// Reminder offsets are limited to one year either way
pub const MAX_REMINDER_OFFSET_MINUTES: i64 = 365 * 24 * 60;

/// Condition over the collected answers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldPredicate {
    Always,
    Present { field: String },
    Absent { field: String },
    Equals { field: String, value: String },
    OneOf { field: String, values: Vec<String> },
    Gt { field: String, value: f64 },
    Lt { field: String, value: f64 },
}

impl FieldPredicate {
    pub fn matches(&self, answers: &Answers) -> bool {
        match self {
            FieldPredicate::Always => true,
            FieldPredicate::Present { field } => answers.contains(field),
            FieldPredicate::Absent { field } => !answers.contains(field),
            FieldPredicate::Equals { field, value } => answers
                .get(field)
                .map(|v| v.to_string().to_lowercase() == value.to_lowercase())
                .unwrap_or(false),
            FieldPredicate::OneOf { field, values } => answers
                .get(field)
                .map(|v| {
                    let rendered = v.to_string().to_lowercase();
                    values.iter().any(|candidate| candidate.to_lowercase() == rendered)
                })
                .unwrap_or(false),
            // A missing or non-numeric metric never passes a threshold
            FieldPredicate::Gt { field, value } => answers
                .get(field)
                .and_then(|v| v.as_number())
                .map(|n| n > *value)
                .unwrap_or(false),
            FieldPredicate::Lt { field, value } => answers
                .get(field)
                .and_then(|v| v.as_number())
                .map(|n| n < *value)
                .unwrap_or(false),
        }
    }
}

/// What a matching rule does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyEffect {
    Escalate,
    ScheduleReminder {
        offset_minutes: i64,
        /// Date field the offset is added to; commit time when absent
        #[serde(default)]
        anchor: Option<String>,
    },
    RequireField {
        field: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub name: Option<String>,
    /// Templates the rule applies to; empty means every template
    #[serde(default)]
    pub templates: Vec<String>,
    pub when: FieldPredicate,
    pub effect: PolicyEffect,
}

impl PolicyRule {
    pub fn applies_to(&self, template: &str) -> bool {
        self.templates.is_empty() || self.templates.iter().any(|t| t == template)
    }

    fn display_name(&self, index: usize) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("rule #{}", index + 1))
    }
}

/// A blocked commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRejection {
    pub field: String,
    pub rule: String,
}

impl From<PolicyRejection> for EngineError {
    fn from(r: PolicyRejection) -> Self {
        EngineError::PolicyViolation {
            field: r.field,
            rule: r.rule,
        }
    }
}

/// Outcome of evaluating all rules of a direction for one template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyDecision {
    pub escalate: bool,
    /// Every reminder time computed, in rule order
    pub reminders: Vec<DateTime<Utc>>,
    /// Earliest of `reminders`
    pub reminder_at: Option<DateTime<Utc>>,
    /// At most one entry: the first unmet `require_field` rule
    pub rejections: Vec<PolicyRejection>,
    /// Names of the rules whose predicate matched
    pub matched_rules: Vec<String>,
}

impl PolicyDecision {
    pub fn is_blocking(&self) -> bool {
        !self.rejections.is_empty()
    }

    /// Turn a blocking decision into a `PolicyViolation` error.
    pub fn into_result(self) -> Result<Self, EngineError> {
        match self.rejections.first() {
            Some(rejection) => Err(rejection.clone().into()),
            None => Ok(self),
        }
    }
}

/// Evaluate the rules of `direction` for `template_name`.
pub fn evaluate(
    direction: &Direction,
    template_name: &str,
    answers: &Answers,
    now: DateTime<Utc>,
) -> PolicyDecision {
    let mut decision = PolicyDecision::default();

    for (index, rule) in direction.policies.iter().enumerate() {
        if !rule.applies_to(template_name) || !rule.when.matches(answers) {
            continue;
        }
        let rule_name = rule.display_name(index);

        match &rule.effect {
            PolicyEffect::Escalate => {
                decision.escalate = true;
            }
            PolicyEffect::ScheduleReminder {
                offset_minutes,
                anchor,
            } => {
                let base = match anchor {
                    Some(field) => match answers.get(field).and_then(|v| v.as_date()) {
                        Some(date) => date.and_time(NaiveTime::MIN).and_utc(),
                        None => {
                            debug!(rule = %rule_name, anchor = %field, "Reminder anchor missing, skipping");
                            continue;
                        }
                    },
                    None => now,
                };
                decision
                    .reminders
                    .push(base + Duration::minutes(*offset_minutes));
            }
            PolicyEffect::RequireField { field } => {
                if answers.contains(field) || decision.is_blocking() {
                    continue;
                }
                decision.rejections.push(PolicyRejection {
                    field: field.clone(),
                    rule: rule_name.clone(),
                });
            }
        }

        decision.matched_rules.push(rule_name);
    }

    decision.reminder_at = decision.reminders.iter().min().copied();
    decision
}

/// Check that rules only reference templates and fields that exist.
///
/// A `require_field` rule must name a field present in every template it
/// applies to; otherwise a rollback to the offending field could never succeed.
pub fn validate_rules(rules: &[PolicyRule], templates: &[Template]) -> Result<(), String> {
    for (index, rule) in rules.iter().enumerate() {
        let name = rule.display_name(index);

        for scoped in &rule.templates {
            if !templates.iter().any(|t| &t.name == scoped) {
                return Err(format!("policy '{}' references unknown template '{}'", name, scoped));
            }
        }

        let applicable: Vec<&Template> = templates
            .iter()
            .filter(|t| rule.applies_to(&t.name))
            .collect();

        if let PolicyEffect::ScheduleReminder { offset_minutes, .. } = &rule.effect {
            if !(-MAX_REMINDER_OFFSET_MINUTES..=MAX_REMINDER_OFFSET_MINUTES).contains(offset_minutes) {
                return Err(format!(
                    "policy '{}' reminder offset {} is outside ±{} minutes",
                    name, offset_minutes, MAX_REMINDER_OFFSET_MINUTES
                ));
            }
        }

        match &rule.effect {
            PolicyEffect::RequireField { field } => {
                if let Some(t) = applicable.iter().find(|t| t.fields.position(field).is_none()) {
                    return Err(format!(
                        "policy '{}' requires field '{}' which template '{}' does not declare",
                        name, field, t.name
                    ));
                }
            }
            PolicyEffect::ScheduleReminder {
                anchor: Some(anchor),
                ..
            } => {
                let mut declared = false;
                for t in &applicable {
                    if let Some(f) = t.fields.get_by_name(anchor) {
                        if f.field_type != FieldType::Date {
                            return Err(format!(
                                "policy '{}' anchors on '{}' which is not a date field",
                                name, anchor
                            ));
                        }
                        declared = true;
                    }
                }
                if !declared {
                    return Err(format!(
                        "policy '{}' anchors on unknown field '{}'",
                        name, anchor
                    ));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::{FieldDescriptor, FieldSchema, MenuAction, MenuNode};
    use crate::validator::FieldValue;
    use chrono::{NaiveDate, TimeZone};

    fn template(name: &str, fields: &[(&str, FieldType)]) -> Template {
        Template {
            name: name.to_string(),
            title: name.to_string(),
            fields: FieldSchema::new(
                fields
                    .iter()
                    .map(|(n, t)| FieldDescriptor {
                        name: n.to_string(),
                        label: n.to_string(),
                        field_type: t.clone(),
                        required: false,
                        validator: None,
                    })
                    .collect(),
            ),
        }
    }

    fn direction(policies: Vec<PolicyRule>) -> Direction {
        Direction {
            key: "coffee".into(),
            display_name: "Coffee".into(),
            menu: vec![MenuNode {
                label: "Delivery".into(),
                action: MenuAction::StartFlow("delivery".into()),
            }],
            templates: vec![template(
                "delivery",
                &[
                    ("supplier", FieldType::Text),
                    ("volume", FieldType::Number),
                    ("photo", FieldType::Attachment),
                    ("due", FieldType::Date),
                ],
            )],
            policies,
        }
    }

    fn rule(when: FieldPredicate, effect: PolicyEffect) -> PolicyRule {
        PolicyRule {
            name: None,
            templates: vec![],
            when,
            effect,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_no_rules_no_effects() {
        let d = direction(vec![]);
        let decision = evaluate(&d, "delivery", &Answers::new(), now());
        assert_eq!(decision, PolicyDecision::default());
    }

    #[test]
    fn test_threshold_predicates_require_numeric_metric() {
        let gt = FieldPredicate::Gt {
            field: "volume".into(),
            value: 5.0,
        };
        let mut answers = Answers::new();
        assert!(!gt.matches(&answers));
        answers.insert("volume", FieldValue::Text("10".into()));
        assert!(!gt.matches(&answers));
        answers.insert("volume", FieldValue::Number(10.0));
        assert!(gt.matches(&answers));
    }

    #[test]
    fn test_first_require_field_rejection_only() {
        let d = direction(vec![
            rule(
                FieldPredicate::Always,
                PolicyEffect::RequireField { field: "photo".into() },
            ),
            rule(
                FieldPredicate::Always,
                PolicyEffect::RequireField { field: "supplier".into() },
            ),
        ]);
        let decision = evaluate(&d, "delivery", &Answers::new(), now());
        assert_eq!(
            decision.rejections,
            vec![PolicyRejection {
                field: "photo".into(),
                rule: "rule #1".into()
            }]
        );
        let err = decision.into_result().unwrap_err();
        assert!(matches!(err, EngineError::PolicyViolation { ref field, .. } if field == "photo"));
    }

    #[test]
    fn test_escalate_and_reminders_are_cumulative() {
        let d = direction(vec![
            rule(
                FieldPredicate::Gt { field: "volume".into(), value: 10.0 },
                PolicyEffect::Escalate,
            ),
            rule(
                FieldPredicate::Always,
                PolicyEffect::ScheduleReminder { offset_minutes: 120, anchor: None },
            ),
            rule(
                FieldPredicate::Present { field: "volume".into() },
                PolicyEffect::ScheduleReminder { offset_minutes: 30, anchor: None },
            ),
        ]);
        let mut answers = Answers::new();
        answers.insert("volume", FieldValue::Number(12.0));

        let decision = evaluate(&d, "delivery", &answers, now());
        assert!(decision.escalate);
        assert_eq!(decision.reminders.len(), 2);
        assert_eq!(decision.reminder_at, Some(now() + Duration::minutes(30)));
        assert_eq!(decision.matched_rules.len(), 3);
        assert!(!decision.is_blocking());
    }

    #[test]
    fn test_anchored_reminder() {
        let d = direction(vec![rule(
            FieldPredicate::Always,
            PolicyEffect::ScheduleReminder {
                offset_minutes: 9 * 60,
                anchor: Some("due".into()),
            },
        )]);
        let mut answers = Answers::new();
        assert!(evaluate(&d, "delivery", &answers, now()).reminders.is_empty());

        answers.insert(
            "due",
            FieldValue::Date(NaiveDate::from_ymd_opt(2025, 3, 4).unwrap()),
        );
        let decision = evaluate(&d, "delivery", &answers, now());
        assert_eq!(
            decision.reminder_at,
            Some(Utc.with_ymd_and_hms(2025, 3, 4, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_rules_scoped_to_other_templates_are_ignored() {
        let mut r = rule(FieldPredicate::Always, PolicyEffect::Escalate);
        r.templates = vec!["checkin".into()];
        let d = direction(vec![r]);
        assert!(!evaluate(&d, "delivery", &Answers::new(), now()).escalate);
    }

    #[test]
    fn test_validate_rules_rejects_unknown_required_field() {
        let templates = vec![template("delivery", &[("volume", FieldType::Number)])];
        let rules = vec![rule(
            FieldPredicate::Always,
            PolicyEffect::RequireField { field: "photo".into() },
        )];
        let err = validate_rules(&rules, &templates).unwrap_err();
        assert!(err.contains("photo"));
    }

    #[test]
    fn test_validate_rules_rejects_non_date_anchor() {
        let templates = vec![template("delivery", &[("volume", FieldType::Number)])];
        let rules = vec![rule(
            FieldPredicate::Always,
            PolicyEffect::ScheduleReminder {
                offset_minutes: 0,
                anchor: Some("volume".into()),
            },
        )];
        assert!(validate_rules(&rules, &templates).is_err());
    }

    #[test]
    fn test_validate_rules_bounds_reminder_offset() {
        let templates = vec![template("delivery", &[("volume", FieldType::Number)])];
        let offset = |offset_minutes| {
            vec![rule(
                FieldPredicate::Always,
                PolicyEffect::ScheduleReminder { offset_minutes, anchor: None },
            )]
        };
        assert!(validate_rules(&offset(MAX_REMINDER_OFFSET_MINUTES), &templates).is_ok());
        assert!(validate_rules(&offset(-MAX_REMINDER_OFFSET_MINUTES), &templates).is_ok());
        assert!(validate_rules(&offset(MAX_REMINDER_OFFSET_MINUTES + 1), &templates).is_err());
        assert!(validate_rules(&offset(i64::MIN), &templates)
            .unwrap_err()
            .contains("offset"));
    }

    #[test]
    fn test_rule_deserializes_from_toml() {
        let src = r#"
name = "photo-on-shortage"
templates = ["delivery"]
when = { op = "lt", field = "volume", value = 3 }
effect = { type = "require_field", field = "photo" }
"#;
        let parsed: PolicyRule = toml::from_str(src).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("photo-on-shortage"));
        assert_eq!(
            parsed.effect,
            PolicyEffect::RequireField { field: "photo".into() }
        );
        assert_eq!(
            parsed.when,
            FieldPredicate::Lt { field: "volume".into(), value: 3.0 }
        );
    }
}
