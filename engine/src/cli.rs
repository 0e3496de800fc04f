//! CLI interface for TasksBot
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags for running the bot.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::task::TaskStatus;

/// TasksBot
///
/// A chat bot that walks users through direction-specific forms and turns the
/// answers into tasks.
#[derive(Parser, Debug)]
#[command(name = "tasksbot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the Telegram transport until Ctrl-C
    Serve,

    /// Chat with the engine from the terminal
    Chat {
        /// User id the console speaks as
        #[arg(short, long, default_value = "1")]
        user: i64,
    },

    /// List registered directions and their templates
    Directions,

    /// Validate the configuration and the directions file
    Check,

    /// Show tasks committed by a user
    Tasks {
        /// Author user id
        #[arg(short, long)]
        user: i64,

        /// Only tasks of this direction
        #[arg(short, long)]
        direction: Option<String>,

        /// Number of tasks to show (default: 10)
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Change the status of a committed task
    Status {
        /// Task ID
        task_id: String,

        /// New status (open, accepted, closed)
        status: TaskStatus,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["tasksbot", "serve"]);
        assert!(matches!(cli.command, Command::Serve));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["tasksbot", "--json", "--log", "debug", "check"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert!(matches!(cli.command, Command::Check));
    }

    #[test]
    fn test_chat_defaults_to_user_one() {
        let cli = Cli::parse_from(["tasksbot", "chat"]);
        assert!(matches!(cli.command, Command::Chat { user: 1 }));

        let cli = Cli::parse_from(["tasksbot", "chat", "--user", "42"]);
        assert!(matches!(cli.command, Command::Chat { user: 42 }));
    }

    #[test]
    fn test_tasks_command() {
        let cli = Cli::parse_from([
            "tasksbot", "tasks", "--user", "7", "--direction", "coffee", "--limit", "3",
        ]);
        if let Command::Tasks {
            user,
            direction,
            limit,
        } = cli.command
        {
            assert_eq!(user, 7);
            assert_eq!(direction.as_deref(), Some("coffee"));
            assert_eq!(limit, 3);
        } else {
            panic!("Expected Tasks command");
        }
    }

    #[test]
    fn test_status_command() {
        let cli = Cli::parse_from(["tasksbot", "status", "3f2a9c1e", "closed"]);
        if let Command::Status { task_id, status } = cli.command {
            assert_eq!(task_id, "3f2a9c1e");
            assert_eq!(status, TaskStatus::Closed);
        } else {
            panic!("Expected Status command");
        }

        assert!(Cli::try_parse_from(["tasksbot", "status", "3f2a9c1e", "done"]).is_err());
    }

    #[test]
    fn test_tasks_requires_user() {
        assert!(Cli::try_parse_from(["tasksbot", "tasks"]).is_err());
    }
}
