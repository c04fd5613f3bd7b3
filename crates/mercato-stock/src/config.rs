//! # Ledger Configuration
//!
//! Where the lots live and how hard the ledger retries.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     MERCATO_DB_PATH=/var/lib/mercato/stock.db                          │
//! │     MERCATO_RETRY_MAX_ATTEMPTS=5                                       │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/mercato/ledger.toml (Linux)                              │
//! │     ~/Library/Application Support/com.mercato.pos/ledger.toml (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     mercato.db, 3 attempts, 100ms initial backoff                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "mercato.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 100
//! multiplier = 2
//! max_delay_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use mercato_core::RetryPolicy;
use mercato_db::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits on another writer's lock before the attempt
    /// counts as a conflict.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mercato.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Retry Settings
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub multiplier: u32,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> u64 {
    100
}

fn default_multiplier() -> u32 {
    2
}

fn default_max_delay() -> u64 {
    1000
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetrySettings {
    /// Builds the ledger's retry schedule.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

// =============================================================================
// Ledger Configuration
// =============================================================================

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub retry: RetrySettings,
}

impl LedgerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Loading Order
    /// 1. Start with defaults
    /// 2. Load from TOML file (if exists)
    /// 3. Override with environment variables
    /// 4. Validate
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load ledger config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> ConfigResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or(ConfigError::NoPath)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Ledger config saved");
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be at least 1".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.initial_delay_ms".into(),
            ));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup. Unparsable numbers are
    /// ignored with a warning.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("MERCATO_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(value) = lookup("MERCATO_DB_MAX_CONNECTIONS") {
            match value.parse() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %value, "Ignoring invalid MERCATO_DB_MAX_CONNECTIONS"),
            }
        }

        if let Some(value) = lookup("MERCATO_RETRY_MAX_ATTEMPTS") {
            match value.parse() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => warn!(value = %value, "Ignoring invalid MERCATO_RETRY_MAX_ATTEMPTS"),
            }
        }

        if let Some(value) = lookup("MERCATO_RETRY_INITIAL_DELAY_MS") {
            match value.parse() {
                Ok(ms) => self.retry.initial_delay_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid MERCATO_RETRY_INITIAL_DELAY_MS"),
            }
        }
    }

    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "mercato", "pos")
            .map(|dirs| dirs.config_dir().join("ledger.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Database settings as a pool configuration.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry.policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_ledger_policy() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.database.path, PathBuf::from("mercato.db"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: LedgerConfig = toml::from_str(
            r#"
            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.initial_delay_ms, 100);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_overrides_win_over_file_values() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MERCATO_DB_PATH", "/tmp/other.db"),
            ("MERCATO_RETRY_MAX_ATTEMPTS", "4"),
            ("MERCATO_RETRY_INITIAL_DELAY_MS", "not-a-number"),
        ]);

        let mut config = LedgerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(config.retry.max_attempts, 4);
        // Invalid value leaves the previous one in place
        assert_eq!(config.retry.initial_delay_ms, 100);
    }

    #[test]
    fn test_validation_rejects_zero_attempts() {
        let mut config = LedgerConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = LedgerConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.retry.max_delay_ms = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("mercato-ledger-{}.toml", std::process::id()));

        let mut config = LedgerConfig::default();
        config.retry.max_attempts = 7;
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let loaded: LedgerConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded, config);

        std::fs::remove_file(&path).unwrap();
    }
}
