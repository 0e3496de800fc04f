//! Configuration management
//!
//! This module handles loading, validation, and management of the TasksBot configuration.
//! Configuration is stored in TOML format at ~/.tasksbot/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Data directory, log level, database file, directions file
//! - **conversation**: Idle timeout, storage timeout, policy rollback, report size
//! - **telegram**: Long-polling transport settings (optional)
//! - **roles**: Default role and per-user role assignments
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Creates the data directory if it doesn't exist
//!
//! # Environment
//!
//! `TASKSBOT_TELEGRAM_TOKEN` overrides `telegram.token`, so the token does not
//! have to be written to disk.
//!
//! # Examples
//!
//! ```no_run
//! use tasksbot_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! println!("Database: {:?}", config.database_path());
//! println!("Idle timeout: {}s", config.conversation.idle_timeout_secs);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conversation::{EngineOptions, PolicyRollback};
use crate::direction::{self, Direction};
use crate::permissions::{Role, RoleMap};

/// Environment variable holding the Telegram bot token
pub const TOKEN_ENV: &str = "TASKSBOT_TELEGRAM_TOKEN";

/// 30 days
const MAX_IDLE_TIMEOUT_SECS: u64 = 30 * 24 * 3600;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// Conversation engine settings
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Telegram transport (optional)
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// User roles
    #[serde(default)]
    pub roles: RolesConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// SQLite file name inside `data_dir`
    #[serde(default = "default_database")]
    pub database: String,

    /// Directions definition file; the built-in directions are used when unset
    #[serde(default)]
    pub directions_file: Option<PathBuf>,
}

/// Conversation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// A flow untouched for longer than this is discarded on the next message
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Upper bound for a single storage call
    #[serde(default = "default_storage_timeout_ms")]
    pub storage_timeout_ms: u64,

    /// What a `require_field` rejection does to the flow
    #[serde(default)]
    pub policy_rollback: PolicyRollback,

    /// Number of tasks shown in a report
    #[serde(default = "default_report_limit")]
    pub report_limit: u32,
}

/// Telegram transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Bot token; prefer the TASKSBOT_TELEGRAM_TOKEN environment variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Telegram user ids allowed to talk to the bot; empty allows everyone
    #[serde(default)]
    pub allowed_users: Vec<i64>,

    /// Long-poll timeout passed to getUpdates
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,

    /// Bot API base URL
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Secret for signing inline keyboard callbacks; the token is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_secret: Option<String>,
}

/// Role configuration
///
/// ```toml
/// [roles]
/// default_role = "barista"
///
/// [[roles.users]]
/// id = 123456789
/// role = "admin"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolesConfig {
    /// Role of users without an entry in `users`
    #[serde(default)]
    pub default_role: Role,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<RoleAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleAssignment {
    /// Chat user id
    pub id: i64,
    pub role: Role,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            storage_timeout_ms: default_storage_timeout_ms(),
            policy_rollback: PolicyRollback::default(),
            report_limit: default_report_limit(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            allowed_users: Vec::new(),
            poll_timeout_secs: default_poll_timeout_secs(),
            api_base: default_api_base(),
            callback_secret: None,
        }
    }
}

impl TelegramConfig {
    /// Secret used to sign callback payloads
    pub fn signing_secret(&self) -> Option<&str> {
        self.callback_secret.as_deref().or(self.token.as_deref())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.tasksbot/data")
}

fn default_database() -> String {
    "tasksbot.db".to_string()
}

fn default_idle_timeout_secs() -> u64 {
    1800
}

fn default_storage_timeout_ms() -> u64 {
    5000
}

fn default_report_limit() -> u32 {
    10
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

impl Config {
    /// Load configuration from the default location (~/.tasksbot/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Like [`Config::load_or_create`] for an explicit path
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.apply_token_override(std::env::var(TOKEN_ENV).ok());
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        // after writing, so an environment token never lands on disk
        config.apply_token_override(std::env::var(TOKEN_ENV).ok());

        Ok(config)
    }

    /// Get the default configuration file path (~/.tasksbot/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".tasksbot").join("config.toml"))
    }

    /// Create a default configuration
    fn default_config() -> Self {
        Self {
            core: CoreConfig {
                data_dir: default_data_dir(),
                log_level: default_log_level(),
                database: default_database(),
                directions_file: None,
            },
            conversation: ConversationConfig::default(),
            telegram: TelegramConfig::default(),
            roles: RolesConfig::default(),
        }
    }

    fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.telegram.token = Some(token);
        }
    }

    /// Validate configuration and process paths
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.core.database.trim().is_empty() {
            return Err(EngineError::Config("database must not be empty".to_string()));
        }

        if self.conversation.idle_timeout_secs == 0
            || self.conversation.idle_timeout_secs > MAX_IDLE_TIMEOUT_SECS
        {
            return Err(EngineError::Config(format!(
                "idle_timeout_secs must be between 1 and {}",
                MAX_IDLE_TIMEOUT_SECS
            )));
        }
        if self.conversation.storage_timeout_ms == 0 {
            return Err(EngineError::Config(
                "storage_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !(1..=100).contains(&self.conversation.report_limit) {
            return Err(EngineError::Config(
                "report_limit must be between 1 and 100".to_string(),
            ));
        }

        if self.telegram.enabled {
            if self.telegram.token.is_none() {
                return Err(EngineError::Config(format!(
                    "telegram.enabled requires a token (set telegram.token or {})",
                    TOKEN_ENV
                )));
            }
            if self.telegram.poll_timeout_secs == 0 || self.telegram.poll_timeout_secs > 50 {
                return Err(EngineError::Config(
                    "poll_timeout_secs must be between 1 and 50".to_string(),
                ));
            }
        }

        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.roles.users.iter().find(|a| !seen.insert(a.id)) {
            return Err(EngineError::Config(format!(
                "user {} has more than one role assignment",
                dup.id
            )));
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                EngineError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        if let Some(file) = &self.core.directions_file {
            self.core.directions_file = Some(expand_path(file)?);
        }

        Ok(())
    }

    /// Full path of the SQLite database
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join(&self.core.database)
    }

    /// Load the configured directions, or the built-in set.
    pub fn load_directions(&self) -> Result<Vec<Direction>, EngineError> {
        match &self.core.directions_file {
            Some(path) => direction::load_directions_file(path),
            None => direction::builtin_directions(),
        }
    }

    /// Engine tunables from the `[conversation]` section
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            idle_timeout: chrono::Duration::seconds(
                self.conversation.idle_timeout_secs.min(MAX_IDLE_TIMEOUT_SECS) as i64,
            ),
            storage_timeout: Duration::from_millis(self.conversation.storage_timeout_ms),
            rollback: self.conversation.policy_rollback,
            report_limit: self.conversation.report_limit,
            roles: self.role_map(),
        }
    }

    /// Roles from the `[roles]` section
    pub fn role_map(&self) -> RoleMap {
        self.roles
            .users
            .iter()
            .fold(RoleMap::new(self.roles.default_role), |map, a| {
                map.assign(a.id, a.role)
            })
    }
}

/// Expand ~ to home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default_config();
        config.core.data_dir = dir.path().join("data");
        config
    }

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.core.database, "tasksbot.db");
        assert_eq!(config.conversation.idle_timeout_secs, 1800);
        assert_eq!(config.conversation.policy_rollback, PolicyRollback::OffendingField);
        assert!(!config.telegram.enabled);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(
            config.conversation.policy_rollback,
            deserialized.conversation.policy_rollback
        );
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            format!(
                "[core]\ndata_dir = {:?}\n\n[conversation]\npolicy_rollback = \"restart\"\n",
                dir.path().join("data").to_str().unwrap()
            ),
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.conversation.policy_rollback, PolicyRollback::Restart);
        assert_eq!(config.conversation.report_limit, 10);
        assert!(config.core.data_dir.is_dir());
        assert_eq!(config.database_path(), dir.path().join("data").join("tasksbot.db"));
    }

    #[test]
    fn test_load_or_create_at_reads_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default_config();
        config.core.data_dir = dir.path().join("data");

        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = Config::load_or_create_at(&path).unwrap();
        assert_eq!(loaded.core.database, "tasksbot.db");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let dir = TempDir::new().unwrap();

        let mut config = config_in(&dir);
        config.core.log_level = "loud".into();
        assert!(matches!(config.validate_and_process(), Err(EngineError::Config(_))));

        let mut config = config_in(&dir);
        config.conversation.idle_timeout_secs = 0;
        assert!(config.validate_and_process().is_err());

        let mut config = config_in(&dir);
        config.conversation.report_limit = 0;
        assert!(config.validate_and_process().is_err());
    }

    #[test]
    fn test_telegram_requires_token() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.telegram.enabled = true;
        assert!(config.validate_and_process().is_err());

        config.apply_token_override(Some("123:abc".into()));
        assert!(config.validate_and_process().is_ok());
        assert_eq!(config.telegram.signing_secret(), Some("123:abc"));

        config.telegram.callback_secret = Some("s3cret".into());
        assert_eq!(config.telegram.signing_secret(), Some("s3cret"));
    }

    #[test]
    fn test_blank_env_token_is_ignored() {
        let mut config = Config::default_config();
        config.telegram.token = Some("from-file".into());
        config.apply_token_override(Some("  ".into()));
        assert_eq!(config.telegram.token.as_deref(), Some("from-file"));
    }

    #[test]
    fn test_engine_options_follow_config() {
        let mut config = Config::default_config();
        config.conversation.idle_timeout_secs = 60;
        config.conversation.storage_timeout_ms = 250;
        let options = config.engine_options();
        assert_eq!(options.idle_timeout, chrono::Duration::seconds(60));
        assert_eq!(options.storage_timeout, Duration::from_millis(250));
    }

    #[test]
    fn test_roles_section() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            format!(
                "[core]\ndata_dir = {:?}\n\n[roles]\ndefault_role = \"barista\"\n\n[[roles.users]]\nid = 42\nrole = \"senior_barista\"\n",
                dir.path().join("data").to_str().unwrap()
            ),
        )
        .unwrap();

        let config = Config::load_from_path(&path).unwrap();
        let roles = config.engine_options().roles;
        assert_eq!(roles.role_of(42), Role::SeniorBarista);
        assert_eq!(roles.role_of(43), Role::Barista);
        assert_eq!(Config::default_config().role_map().role_of(1), Role::Seller);
    }

    #[test]
    fn test_duplicate_role_assignment_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.roles.users = vec![
            RoleAssignment { id: 5, role: Role::Admin },
            RoleAssignment { id: 5, role: Role::Seller },
        ];
        assert!(matches!(config.validate_and_process(), Err(EngineError::Config(_))));
    }
}
