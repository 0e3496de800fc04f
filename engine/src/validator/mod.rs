//! Template validator
//!
//! Validates one conversational turn against the field at the current step of a
//! template. Prior answers are never re-validated; every function here is pure.
//!
//! Accepted input per field type:
//!
//! - **text**: any non-empty string
//! - **number**: decimal, `,` accepted as decimal separator
//! - **choice**: one of the options (case-insensitive) or its 1-based index
//! - **date**: `DD.MM.YYYY` or `YYYY-MM-DD`
//! - **attachment**: `attachment:<id>` as produced by transports for photos/documents
//!
//! An empty input, `-` or `/skip` skips an optional field.

mod answers;
mod expr;

pub use answers::{Answer, Answers, FieldValue};
pub use expr::ValidatorExpr;

use chrono::NaiveDate;
use sdk::errors::EngineError;
use thiserror::Error;

use crate::direction::{FieldDescriptor, FieldSchema, FieldType};

/// Tokens that skip an optional field
const SKIP_TOKENS: [&str; 2] = ["-", "/skip"];

/// Prefix transports use for attachment references
pub const ATTACHMENT_PREFIX: &str = "attachment:";

/// Why a value was rejected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationReason {
    #[error("a value is required")]
    Missing,

    #[error("expected {expected}")]
    TypeMismatch { expected: &'static str },

    #[error("'{value}' is not one of: {}", allowed.join(", "))]
    NotAllowed { value: String, allowed: Vec<String> },

    #[error("{0}")]
    Rejected(String),

    #[error("step {0} is outside the template")]
    StepOutOfRange(usize),
}

/// A rejected value for a specific field
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: ValidationReason,
}

impl ValidationError {
    fn new(field: &FieldDescriptor, reason: ValidationReason) -> Self {
        Self {
            field: field.name.clone(),
            reason,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Validation {
            field: err.field,
            reason: err.reason.to_string(),
        }
    }
}

/// Validate `raw` against a single field.
///
/// Returns `Ok(None)` when an optional field was skipped.
pub fn validate_field(
    field: &FieldDescriptor,
    raw: &str,
) -> Result<Option<FieldValue>, ValidationError> {
    validate_with_requirement(field, raw, field.required)
}

/// Validate the input for the field at `step_index`.
pub fn validate_step(
    schema: &FieldSchema,
    step_index: usize,
    raw: &str,
) -> Result<Option<FieldValue>, ValidationError> {
    let field = field_at(schema, step_index)?;
    validate_field(field, raw)
}

/// Like [`validate_step`], but the field may not be skipped even if optional.
///
/// Used after a policy rollback demanded a field the template marks optional.
pub fn validate_step_demanded(
    schema: &FieldSchema,
    step_index: usize,
    raw: &str,
) -> Result<FieldValue, ValidationError> {
    let field = field_at(schema, step_index)?;
    validate_with_requirement(field, raw, true)?
        .ok_or_else(|| ValidationError::new(field, ValidationReason::Missing))
}

fn field_at(schema: &FieldSchema, step_index: usize) -> Result<&FieldDescriptor, ValidationError> {
    schema.get(step_index).ok_or_else(|| ValidationError {
        field: String::new(),
        reason: ValidationReason::StepOutOfRange(step_index),
    })
}

fn validate_with_requirement(
    field: &FieldDescriptor,
    raw: &str,
    required: bool,
) -> Result<Option<FieldValue>, ValidationError> {
    let input = raw.trim();

    if input.is_empty() || SKIP_TOKENS.contains(&input) {
        if required {
            return Err(ValidationError::new(field, ValidationReason::Missing));
        }
        return Ok(None);
    }

    let value = parse_typed(field, input)?;

    if let Some(validator) = &field.validator {
        validator
            .check(&value)
            .map_err(|msg| ValidationError::new(field, ValidationReason::Rejected(msg)))?;
    }

    Ok(Some(value))
}

fn parse_typed(field: &FieldDescriptor, input: &str) -> Result<FieldValue, ValidationError> {
    match &field.field_type {
        FieldType::Text => Ok(FieldValue::Text(input.to_string())),
        FieldType::Number => parse_number(input).map(FieldValue::Number).ok_or_else(|| {
            ValidationError::new(field, ValidationReason::TypeMismatch { expected: "a number" })
        }),
        FieldType::Choice(options) => match_choice(options, input)
            .map(|opt| FieldValue::Choice(opt.to_string()))
            .ok_or_else(|| {
                ValidationError::new(
                    field,
                    ValidationReason::NotAllowed {
                        value: input.to_string(),
                        allowed: options.clone(),
                    },
                )
            }),
        FieldType::Date => parse_date(input).map(FieldValue::Date).ok_or_else(|| {
            ValidationError::new(
                field,
                ValidationReason::TypeMismatch {
                    expected: "a date like 31.12.2025",
                },
            )
        }),
        FieldType::Attachment => input
            .strip_prefix(ATTACHMENT_PREFIX)
            .filter(|id| !id.is_empty() && !id.contains(char::is_whitespace))
            .map(|id| FieldValue::Attachment(id.to_string()))
            .ok_or_else(|| {
                ValidationError::new(
                    field,
                    ValidationReason::TypeMismatch {
                        expected: "a photo or file",
                    },
                )
            }),
    }
}

fn parse_number(input: &str) -> Option<f64> {
    input
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

fn match_choice<'a>(options: &'a [String], input: &str) -> Option<&'a str> {
    // to_lowercase rather than eq_ignore_ascii_case: options are often Cyrillic
    let needle = input.to_lowercase();
    if let Some(opt) = options.iter().find(|o| o.to_lowercase() == needle) {
        return Some(opt.as_str());
    }
    input
        .parse::<usize>()
        .ok()
        .and_then(|idx| idx.checked_sub(1))
        .and_then(|idx| options.get(idx))
        .map(String::as_str)
}

fn parse_date(input: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(input, "%d.%m.%Y")
        .or_else(|_| NaiveDate::parse_from_str(input, "%Y-%m-%d"))
        .ok()
}
