//! Configuration management for query-guard.
//!
//! Configuration is loaded from environment variables following the 12-factor app pattern.

use crate::constants::{
    DEFAULT_LOG_VALUE_LENGTH, DEFAULT_MAX_STRING_LENGTH, ENV_CATALOG, ENV_LOG_VALUE_LENGTH,
    ENV_MAX_STRING_LENGTH, ENV_VALUE_AUDIT,
};
use crate::error::EngineError;
use crate::security::InjectionDetector;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Path to the endpoint catalog
    pub catalog_path: Option<PathBuf>,

    /// Limit applied to bounded strings declared without one
    pub max_string_length: usize,

    /// Log accepted values that look like injection attempts
    pub value_audit: bool,

    /// Maximum characters of a value written to logs
    pub log_value_length: usize,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `QUERY_GUARD_CATALOG`: Path to the endpoint catalog (required by the CLI)
    /// - `QUERY_GUARD_MAX_STRING_LENGTH`: Default bounded string limit (default: 255)
    /// - `QUERY_GUARD_VALUE_AUDIT`: Log suspicious accepted values (default: true)
    /// - `QUERY_GUARD_LOG_VALUE_LENGTH`: Redaction length for logged values (default: 64)
    pub fn from_env() -> Result<Self, EngineError> {
        let catalog_path = std::env::var(ENV_CATALOG)
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let max_string_length = parse_usize(ENV_MAX_STRING_LENGTH)?
            .unwrap_or(DEFAULT_MAX_STRING_LENGTH);

        if max_string_length == 0 {
            return Err(EngineError::config(format!(
                "{} must be greater than zero",
                ENV_MAX_STRING_LENGTH
            )));
        }

        let value_audit = std::env::var(ENV_VALUE_AUDIT)
            .map(|v| v.to_lowercase() != "false" && v != "0")
            .unwrap_or(true);

        let log_value_length =
            parse_usize(ENV_LOG_VALUE_LENGTH)?.unwrap_or(DEFAULT_LOG_VALUE_LENGTH);

        Ok(Config {
            catalog_path,
            max_string_length,
            value_audit,
            log_value_length,
        })
    }

    /// Catalog path, or an error naming the variable to set.
    pub fn require_catalog_path(&self) -> Result<&PathBuf, EngineError> {
        self.catalog_path.as_ref().ok_or_else(|| {
            EngineError::config(format!("{} environment variable is required", ENV_CATALOG))
        })
    }

    /// Value detector built from this configuration.
    pub fn injection_detector(&self) -> InjectionDetector {
        InjectionDetector::new(self.value_audit)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: None,
            max_string_length: DEFAULT_MAX_STRING_LENGTH,
            value_audit: true,
            log_value_length: DEFAULT_LOG_VALUE_LENGTH,
        }
    }
}

fn parse_usize(name: &str) -> Result<Option<usize>, EngineError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| EngineError::config(format!("{} must be a non-negative integer", name))),
        Err(_) => Ok(None),
    }
}
