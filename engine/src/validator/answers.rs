//! Validated values and the ordered answer map collected during a flow

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::direction::FieldSchema;

/// A value that passed validation for its field type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    Choice(String),
    Date(NaiveDate),
    Attachment(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) | FieldValue::Choice(s) => write!(f, "{}", s),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Date(d) => write!(f, "{}", d.format("%d.%m.%Y")),
            FieldValue::Attachment(id) => write!(f, "{}{}", super::ATTACHMENT_PREFIX, id),
        }
    }
}

/// One collected answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub field: String,
    pub value: FieldValue,
}

/// Field name → validated value, preserving insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Answers(Vec<Answer>);

impl Answers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the value for `field`.
    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        let field = field.into();
        match self.0.iter_mut().find(|a| a.field == field) {
            Some(existing) => existing.value = value,
            None => self.0.push(Answer { field, value }),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.iter().find(|a| a.field == field).map(|a| &a.value)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Answer> {
        self.0.iter()
    }

    /// Drop every answer whose field sits at or after `step_index` in `schema`.
    pub fn truncate_from(&mut self, schema: &FieldSchema, step_index: usize) {
        self.0.retain(|a| {
            schema
                .position(&a.field)
                .map(|pos| pos < step_index)
                .unwrap_or(false)
        });
    }

    /// Copy of the answers sorted by the field order of `schema`.
    /// Answers for fields not in the schema are dropped.
    pub fn ordered_by(&self, schema: &FieldSchema) -> Answers {
        let ordered = schema
            .iter()
            .filter_map(|field| {
                self.get(&field.name).map(|value| Answer {
                    field: field.name.clone(),
                    value: value.clone(),
                })
            })
            .collect();
        Answers(ordered)
    }
}

impl FromIterator<(String, FieldValue)> for Answers {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        let mut answers = Answers::new();
        for (field, value) in iter {
            answers.insert(field, value);
        }
        answers
    }
}
