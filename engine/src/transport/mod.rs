//! Chat transports
//!
//! Transports only translate between a chat surface and
//! [`crate::conversation::ConversationEngine`]; no conversation logic lives here.

pub mod console;
pub mod telegram;

pub use console::run_console;
pub use telegram::{TelegramApi, TelegramBot};
