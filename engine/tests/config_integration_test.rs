//! Integration tests for configuration management
//!
//! These tests verify that a config file on disk is loaded, validated and
//! turned into a working direction registry.

use sdk::errors::EngineError;
use std::fs;
use tasksbot_engine::config::Config;
use tasksbot_engine::conversation::PolicyRollback;
use tasksbot_engine::handlers::build_registry;
use tempfile::TempDir;

fn write_config(dir: &TempDir, extra: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    let contents = format!(
        r#"
[core]
data_dir = "{}"
log_level = "debug"
{}
"#,
        dir.path().join("data").display(),
        extra
    );
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_builtin_directions_without_file() {
    let dir = TempDir::new().unwrap();
    let config = Config::load_from_path(&write_config(&dir, "")).unwrap();

    assert_eq!(config.core.log_level, "debug");
    assert!(config.core.directions_file.is_none());

    let registry = build_registry(&config).unwrap();
    assert_eq!(registry.len(), 4);
    assert!(registry.get("coffee").is_ok());
}

#[test]
fn test_custom_directions_file() {
    let dir = TempDir::new().unwrap();
    let directions = dir.path().join("directions.toml");
    fs::write(
        &directions,
        r#"
[[directions]]
key = "bakery"
display_name = "Пекарня"
policies = []
menu = [{ label = "Выпечка", flow = "batch" }]

[[directions.templates]]
name = "batch"
title = "Партия"
fields = [{ name = "loaves", label = "Буханок", type = "number" }]
"#,
    )
    .unwrap();

    let config = Config::load_from_path(&write_config(
        &dir,
        &format!(
            "directions_file = \"{}\"\n\n[conversation]\npolicy_rollback = \"discard\"\nreport_limit = 5",
            directions.display()
        ),
    ))
    .unwrap();
    assert_eq!(config.conversation.policy_rollback, PolicyRollback::Discard);
    assert_eq!(config.engine_options().report_limit, 5);

    let registry = build_registry(&config).unwrap();
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("bakery").unwrap().display_name, "Пекарня");
}

#[test]
fn test_direction_missing_policies_fails() {
    let dir = TempDir::new().unwrap();
    let directions = dir.path().join("directions.toml");
    fs::write(
        &directions,
        r#"
[[directions]]
key = "bakery"
display_name = "Пекарня"
menu = [{ label = "Выпечка", flow = "batch" }]

[[directions.templates]]
name = "batch"
fields = [{ name = "loaves", type = "number" }]
"#,
    )
    .unwrap();

    let config = Config::load_from_path(&write_config(
        &dir,
        &format!("directions_file = \"{}\"", directions.display()),
    ))
    .unwrap();

    let err = config.load_directions().unwrap_err();
    assert!(matches!(err, EngineError::InvalidDirectionConfig(ref msg) if msg.contains("policies")));
    assert!(build_registry(&config).is_err());
}

#[test]
fn test_unknown_rollback_mode_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "\n[conversation]\npolicy_rollback = \"retry\"");
    assert!(matches!(
        Config::load_from_path(&path),
        Err(EngineError::Config(_))
    ));
}
