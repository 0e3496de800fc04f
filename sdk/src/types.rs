//! Transport-facing message types
//!
//! Transports (Telegram, console, tests) speak to the engine exclusively through
//! [`InboundMessage`] and [`RenderInstruction`].

use serde::{Deserialize, Serialize};

/// Chat user identifier. Telegram chat ids fit in an i64.
pub type UserId = i64;

/// A slash command extracted from the raw text of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotCommand {
    /// Command name without the leading slash, lowercased (`start`, `cancel`, ...)
    pub name: String,
    /// Remaining text after the command, trimmed
    pub argument: Option<String>,
}

impl BotCommand {
    /// Parse `/name[@bot] [argument]`. Returns `None` for plain text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, tail) = match rest.split_once(char::is_whitespace) {
            Some((head, tail)) => (head, tail.trim()),
            None => (rest, ""),
        };
        // Telegram appends the bot name in group chats: /start@tasks_bot
        let name = head.split('@').next().unwrap_or_default().to_lowercase();
        if name.is_empty() {
            return None;
        }

        Some(Self {
            name,
            argument: (!tail.is_empty()).then(|| tail.to_string()),
        })
    }
}

/// One inbound unit of work handed over by a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub user_id: UserId,
    pub text: String,
    pub command: Option<BotCommand>,
}

impl InboundMessage {
    /// Build a message from raw text, detecting a leading slash command.
    pub fn new(user_id: UserId, text: impl Into<String>) -> Self {
        let text = text.into();
        let command = BotCommand::parse(&text);
        Self {
            user_id,
            text,
            command,
        }
    }
}

/// A selectable option rendered as a button (Telegram) or numbered line (console).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuOption {
    pub label: String,
    /// Text the transport feeds back to the engine when the option is chosen
    pub payload: String,
}

impl MenuOption {
    pub fn new(label: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            payload: payload.into(),
        }
    }
}

/// What a handled message resulted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// A new prompt or menu after a successful transition
    Prompt,
    /// The input was rejected; the same step is asked again
    Reprompt,
    /// A task was committed
    Completed { task_id: String },
    /// A policy rule blocked the commit
    Rejected { field: String },
    /// The user cancelled the active flow
    Cancelled,
    /// The previous flow timed out and was discarded
    Expired,
    /// The task could not be stored; the flow was closed
    CommitFailed,
}

/// Description of what the transport should show to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderInstruction {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<MenuOption>,
    pub outcome: Outcome,
}

impl RenderInstruction {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: Vec::new(),
            outcome: Outcome::Prompt,
        }
    }

    pub fn reprompt(text: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Reprompt,
            ..Self::prompt(text)
        }
    }

    pub fn with_options(mut self, options: Vec<MenuOption>) -> Self {
        self.options = options;
        self
    }

    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = outcome;
        self
    }

    /// Prepend a notice line (e.g. "previous flow expired") to the text.
    pub fn with_notice(mut self, notice: &str) -> Self {
        self.text = format!("{}\n\n{}", notice, self.text);
        self
    }
}
