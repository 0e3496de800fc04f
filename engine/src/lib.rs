//! TasksBot Engine Library
//!
//! This library provides the core functionality of TasksBot: the direction
//! registry, the conversation state machine and the task commit pipeline.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Time source used by the engine
pub mod clock;

/// Direction definitions and registry
pub mod direction;

/// Field value validation
pub mod validator;

/// Direction policy rules
pub mod policy;

/// Committed tasks
pub mod task;

/// User roles and what they may do
pub mod permissions;

/// Conversation state and storage traits
pub mod state;

/// Database persistence module
pub mod db;

/// Task commit pipeline
pub mod commit;

/// Conversation engine
pub mod conversation;

/// Chat transports (Telegram, console)
pub mod transport;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
