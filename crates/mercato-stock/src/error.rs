//! # Configuration Error Types
//!
//! Ledger and sale outcomes use `mercato_core::StockError`; this module only
//! covers loading and validating the ledger configuration.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    /// A value is out of its allowed range.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Config file could not be read or written.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for the expected shape.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No path given and no platform config directory available.
    #[error("No config path available")]
    NoPath,
}
