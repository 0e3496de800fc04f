//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - serve: Run the Telegram transport
//! - chat: Console REPL against the engine
//! - directions: List the direction registry
//! - check: Validate configuration and directions
//! - tasks: Show committed tasks of a user
//! - status: Change the status of a task

use anyhow::{Context, Result};
use serde_json::json;
use std::sync::Arc;

use crate::clock::SystemClock;
use crate::config::Config;
use crate::conversation::{ConversationEngine, Stores};
use crate::db::Database;
use crate::direction::DirectionRegistry;
use crate::state::TaskRepository;
use crate::task::TaskStatus;
use crate::transport::{run_console, TelegramBot};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Load and seal the configured directions.
pub fn build_registry(config: &Config) -> Result<DirectionRegistry> {
    let directions = config
        .load_directions()
        .context("Failed to load directions")?;
    Ok(DirectionRegistry::from_directions(directions)?)
}

/// Open the database and wire the engine.
pub async fn build_engine(config: &Config) -> Result<(ConversationEngine, Database)> {
    let registry = build_registry(config)?;

    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;

    let engine = ConversationEngine::new(
        Arc::new(registry),
        Stores::sqlite(&database),
        Arc::new(SystemClock),
        config.engine_options(),
    )?;

    Ok((engine, database))
}

/// Run the Telegram long-polling transport until Ctrl-C
pub async fn handle_serve(config: &Config) -> Result<()> {
    if !config.telegram.enabled {
        anyhow::bail!("Telegram transport is disabled. Set telegram.enabled = true in config.toml");
    }

    let (engine, database) = build_engine(config).await?;
    let bot = TelegramBot::new(&config.telegram, Arc::new(engine))?;

    bot.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    })
    .await?;

    database.flush_wal().await.ok();
    database.close().await
}

/// Interactive console session for one user
pub async fn handle_chat(config: &Config, user_id: i64, format: OutputFormat) -> Result<()> {
    let (engine, database) = build_engine(config).await?;

    if matches!(format, OutputFormat::Text) {
        println!("TasksBot console as user {}. Type /help for commands, /quit to exit.", user_id);
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    run_console(
        &engine,
        user_id,
        stdin,
        tokio::io::stdout(),
        matches!(format, OutputFormat::Json),
    )
    .await?;

    database.close().await
}

/// List the registered directions
pub fn handle_directions(config: &Config, format: OutputFormat) -> Result<()> {
    let registry = build_registry(config)?;

    match format {
        OutputFormat::Text => {
            println!("Directions ({}):", registry.len());
            println!();
            for direction in registry.list() {
                println!("{} ({})", direction.display_name, direction.key);
                for template in &direction.templates {
                    let fields: Vec<&str> =
                        template.fields.iter().map(|f| f.name.as_str()).collect();
                    println!("  {:<12} {} [{}]", template.name, template.title, fields.join(", "));
                }
                if !direction.policies.is_empty() {
                    println!("  policies: {}", direction.policies.len());
                }
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "directions": registry.list().map(|d| {
                    json!({
                        "key": d.key,
                        "display_name": d.display_name,
                        "templates": d.templates.iter().map(|t| &t.name).collect::<Vec<_>>(),
                        "policies": d.policies.len(),
                    })
                }).collect::<Vec<_>>(),
                "count": registry.len(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Validate configuration and directions without starting anything
pub async fn handle_check(config: &Config, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut warnings = Vec::new();
    let mut checks = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration", "Valid".to_string()));

    match build_registry(config) {
        Ok(registry) => checks.push(("Directions", format!("{} loaded", registry.len()))),
        Err(e) => {
            checks.push(("Directions", "Invalid".to_string()));
            issues.push(format!("{:#}", e));
        }
    }

    match Database::new(&config.database_path()).await {
        Ok(db) => {
            checks.push(("Database", "OK".to_string()));
            db.close().await.ok();
        }
        Err(e) => {
            checks.push(("Database", "Failed".to_string()));
            issues.push(format!("Cannot open database: {:#}", e));
        }
    }

    if config.telegram.enabled {
        checks.push(("Telegram", "Enabled".to_string()));
        if config.telegram.allowed_users.is_empty() {
            warnings.push(
                "telegram.allowed_users is empty; every Telegram user may use the bot".to_string(),
            );
        }
    } else {
        checks.push(("Telegram", "Disabled".to_string()));
    }

    match format {
        OutputFormat::Text => {
            println!("TasksBot Configuration Check");
            println!("============================");
            println!();
            for (check, status) in &checks {
                println!("  {:<25} {}", format!("{}:", check), status);
            }
            println!();

            for warning in &warnings {
                println!("  note: {}", warning);
            }
            if issues.is_empty() {
                println!("✓ All checks passed!");
            } else {
                println!("⚠ Issues found:");
                println!();
                for (i, issue) in issues.iter().enumerate() {
                    println!("  {}. {}", i + 1, issue);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "checks": checks.iter().map(|(name, status)| {
                    json!({
                        "name": name,
                        "status": status
                    })
                }).collect::<Vec<_>>(),
                "issues": issues,
                "warnings": warnings,
                "healthy": issues.is_empty()
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if !issues.is_empty() {
        anyhow::bail!("Configuration check failed");
    }
    Ok(())
}

/// Show the most recent tasks of a user
pub async fn handle_tasks(
    config: &Config,
    user_id: i64,
    direction: Option<&str>,
    limit: u32,
    format: OutputFormat,
) -> Result<()> {
    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;

    let tasks = database
        .tasks()
        .list_by_author(user_id, direction, limit)
        .await
        .context("Failed to fetch tasks")?;

    match format {
        OutputFormat::Text => {
            if tasks.is_empty() {
                println!("No tasks for user {}", user_id);
                return Ok(());
            }

            println!("Tasks of user {} (last {}):", user_id, limit);
            println!();

            for task in &tasks {
                println!("Task ID: {}", task.id);
                println!("  Direction: {} / {}", task.direction_key, task.template_name);
                println!("  Status: {} (escalation: {})", task.status, task.escalation);
                for answer in task.fields.iter() {
                    println!("  {}: {}", answer.field, answer.value);
                }
                if let Some(at) = task.reminder_at {
                    println!("  Reminder: {}", at.format("%Y-%m-%d %H:%M UTC"));
                }
                println!("  Created: {}", task.created_at.format("%Y-%m-%d %H:%M:%S"));
                println!();
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "tasks": tasks,
                "count": tasks.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    database.close().await
}

/// Set the status of a committed task
pub async fn handle_set_status(
    config: &Config,
    task_id: &str,
    status: TaskStatus,
    format: OutputFormat,
) -> Result<()> {
    let database = Database::new(&config.database_path())
        .await
        .context("Failed to open database")?;

    let updated = database
        .tasks()
        .set_status(task_id, status)
        .await
        .context("Failed to update task status")?;
    database.close().await?;

    match format {
        OutputFormat::Text if updated => println!("Task {} is now {}", task_id, status),
        OutputFormat::Text => {}
        OutputFormat::Json => {
            let output = json!({
                "task_id": task_id,
                "status": status,
                "updated": updated
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    if !updated {
        anyhow::bail!("No task with id {}", task_id);
    }
    Ok(())
}
