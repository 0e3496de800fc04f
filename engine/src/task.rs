//! Committed tasks

use chrono::{DateTime, Utc};
use sdk::types::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::validator::Answers;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    Accepted,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Escalation {
    #[default]
    None,
    Pending,
    Fired,
}

macro_rules! string_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

string_enum!(TaskStatus {
    Open => "open",
    Accepted => "accepted",
    Closed => "closed",
});

string_enum!(Escalation {
    None => "none",
    Pending => "pending",
    Fired => "fired",
});

/// A task created by completing a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub direction_key: String,
    pub template_name: String,
    pub author_user_id: UserId,
    /// Validated answers in schema order
    pub fields: Answers,
    pub created_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub escalation: Escalation,
    pub flow_token: String,
    pub reminder_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Short id for display
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}
