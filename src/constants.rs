//! Centralized constants for the query guard engine.
//!
//! The reserved key list and the supported grammars are fixed at build
//! time; nothing here is configurable per request.

// =============================================================================
// Key Safety
// =============================================================================

/// Property names that must never be used as keys for untrusted data.
///
/// Compared case-insensitively.
pub const RESERVED_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Reserved names that are also rejected when they appear anywhere inside a key.
pub const RESERVED_KEY_FRAGMENTS: &[&str] = &["__proto__", "constructor"];

/// Maximum length of a key accepted by the `SafeKey` field kind.
pub const MAX_KEY_LENGTH: usize = 128;

// =============================================================================
// Classification Limits
// =============================================================================

/// Largest integer magnitude representable without precision loss in an
/// IEEE 754 double (2^53 - 1).
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

/// Maximum number of characters in an integer literal (sign included).
pub const MAX_INTEGER_DIGITS: usize = 20;

/// Maximum length of an email address (RFC 5321 path limit).
pub const MAX_EMAIL_LENGTH: usize = 254;

/// Maximum number of integer digits in a currency amount.
pub const MAX_CURRENCY_INTEGER_DIGITS: usize = 15;

/// Default maximum length for bounded strings declared without a limit.
pub const DEFAULT_MAX_STRING_LENGTH: usize = 255;

// =============================================================================
// Logging
// =============================================================================

/// Default number of characters of an untrusted value that may reach a log line.
pub const DEFAULT_LOG_VALUE_LENGTH: usize = 64;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn,query_guard=info";

// =============================================================================
// Environment Variables
// =============================================================================

/// Path to the endpoint catalog JSON file.
pub const ENV_CATALOG: &str = "QUERY_GUARD_CATALOG";

/// Default maximum length applied to bounded strings without an explicit limit.
pub const ENV_MAX_STRING_LENGTH: &str = "QUERY_GUARD_MAX_STRING_LENGTH";

/// Enable logging of accepted values that resemble injection attempts.
pub const ENV_VALUE_AUDIT: &str = "QUERY_GUARD_VALUE_AUDIT";

/// Number of characters of an untrusted value allowed in log lines.
pub const ENV_LOG_VALUE_LENGTH: &str = "QUERY_GUARD_LOG_VALUE_LENGTH";
