// TasksBot
// Main entry point for the tasksbot binary

use clap::Parser;
use tasksbot_engine::cli::{Cli, Command};
use tasksbot_engine::config::Config;
use tasksbot_engine::handlers::{
    handle_chat, handle_check, handle_directions, handle_serve, handle_set_status, handle_tasks,
    OutputFormat,
};
use tasksbot_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config; RUST_LOG wins over both
    init_telemetry_with_level(cli.log.as_deref().unwrap_or(&config.core.log_level));

    tracing::info!("TasksBot v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Serve => {
            tracing::info!("Starting Telegram transport...");
            handle_serve(&config).await
        }

        Command::Chat { user } => handle_chat(&config, user, format).await,

        Command::Directions => handle_directions(&config, format),

        Command::Check => handle_check(&config, format).await,

        Command::Tasks {
            user,
            direction,
            limit,
        } => handle_tasks(&config, user, direction.as_deref(), limit, format).await,

        Command::Status { task_id, status } => {
            handle_set_status(&config, &task_id, status, format).await
        }
    }
}
