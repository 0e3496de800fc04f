//! TasksBot SDK
//!
//! Shared library providing the error taxonomy and the transport-facing message
//! types. This crate is used by the engine and by transports.

/// Error types and handling
pub mod errors;

/// Inbound message and render instruction types
pub mod types;

// Re-export commonly used types
pub use errors::{EngineError, TasksbotErrorExt};
pub use types::{BotCommand, InboundMessage, MenuOption, Outcome, RenderInstruction, UserId};
