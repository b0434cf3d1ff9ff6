//! Error types for the query guard engine.
//!
//! Two layers of errors exist:
//!
//! - [`ErrorKind`]: the per-request taxonomy carried by a `Deny` decision.
//!   These are expected, frequent and always recovered into a decision.
//! - [`EngineError`]: programmer errors raised while declaring schemas,
//!   templates and endpoints (or loading them from a catalog). These are
//!   bugs to fix at development time and are returned from startup APIs.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Stable reason code for a rejected value or a denied request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Value has the wrong shape for its declared kind.
    InvalidType,
    /// Value exceeds the declared maximum length.
    TooLong,
    /// Numeric value is outside the representable or declared range.
    OutOfRange,
    /// Value does not match the declared pattern, enum or format.
    PatternMismatch,
    /// Value would be used as a property key and names a reserved key.
    UnsafeKey,
    /// Template placeholders and bindings do not correspond 1:1.
    PlaceholderMismatch,
    /// Grammar tag is not one of the supported grammars.
    UnknownGrammar,
    /// A required field is absent from the request.
    Missing,
}

impl ErrorKind {
    /// Get the reason code as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidType => "invalid_type",
            ErrorKind::TooLong => "too_long",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::PatternMismatch => "pattern_mismatch",
            ErrorKind::UnsafeKey => "unsafe_key",
            ErrorKind::PlaceholderMismatch => "placeholder_mismatch",
            ErrorKind::UnknownGrammar => "unknown_grammar",
            ErrorKind::Missing => "missing",
        }
    }

    /// HTTP status a thin request layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidType
            | ErrorKind::TooLong
            | ErrorKind::OutOfRange
            | ErrorKind::PatternMismatch
            | ErrorKind::Missing => 400,
            ErrorKind::UnsafeKey => 403,
            // These indicate a broken endpoint declaration, not a bad request.
            ErrorKind::PlaceholderMismatch | ErrorKind::UnknownGrammar => 500,
        }
    }

    /// Generic, client-safe message for this reason.
    ///
    /// Never includes the offending value or any internal detail.
    pub fn public_message(&self) -> &'static str {
        match self.http_status() {
            400 => "Invalid request parameters",
            403 => "Forbidden",
            _ => "Internal server error",
        }
    }

    /// Check if this reason comes from a developer mistake rather than input.
    pub fn is_programmer_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::PlaceholderMismatch | ErrorKind::UnknownGrammar
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Programmer errors raised while declaring or loading the engine's inputs.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A field schema is malformed (bad regex, empty enum, zero length...).
    #[error("Invalid schema for field '{field}': {message}")]
    InvalidSchema { field: String, message: String },

    /// A query template is malformed.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    /// Schemas and template placeholders do not correspond.
    #[error("Schema/template mismatch: {0}")]
    SchemaMismatch(String),

    /// Grammar name is not supported.
    #[error("Unknown grammar: {0}")]
    UnknownGrammar(String),

    /// Endpoint catalog error.
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error while reading a catalog.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parse error while reading a catalog.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Create an invalid schema error.
    pub fn invalid_schema(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidSchema {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Create an invalid template error.
    pub fn invalid_template(msg: impl Into<String>) -> Self {
        Self::InvalidTemplate(msg.into())
    }

    /// Create a schema mismatch error.
    pub fn schema_mismatch(msg: impl Into<String>) -> Self {
        Self::SchemaMismatch(msg.into())
    }

    /// Create a catalog error.
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Get a developer-facing suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::InvalidSchema { .. } => Some("Check the field kind parameters in the declaration"),
            Self::InvalidTemplate(_) => {
                Some("Use $1..$n or :name placeholders and keep data out of template text")
            }
            Self::SchemaMismatch(_) => {
                Some("Declare exactly one field per placeholder, named after it")
            }
            Self::UnknownGrammar(_) => Some("Supported grammars are: sql, xpath, shell"),
            Self::Config(_) => Some("Check your environment variables and configuration"),
            _ => None,
        }
    }
}
