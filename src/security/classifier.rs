//! Input classification against declared field shapes.
//!
//! Classification is pure: it inspects a raw JSON value and either accepts
//! it with a normalized (possibly re-typed) value or rejects it with one
//! [`ErrorKind`]. It never panics on malformed input; malformed *schemas*
//! are caught when the [`FieldSchema`] is declared.

use crate::constants::{
    MAX_CURRENCY_INTEGER_DIGITS, MAX_EMAIL_LENGTH, MAX_INTEGER_DIGITS, MAX_SAFE_INTEGER,
};
use crate::error::{EngineError, ErrorKind};
use crate::security::keys::SafeKey;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Compiled patterns for the built-in field kinds.
///
/// These are hardcoded constants that have been verified to be valid regex.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("Internal error: invalid regex pattern '{}': {}", pattern, e))
}

static INTEGER_PATTERN: Lazy<Regex> = Lazy::new(|| compile(r"^-?[0-9]+$"));

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| compile(r"^[^\s@]+@[^\s@]+\.[^\s@]+$"));

static CURRENCY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    compile(&format!(
        r"^-?[0-9]{{1,{}}}(\.[0-9]{{1,2}})?$",
        MAX_CURRENCY_INTEGER_DIGITS
    ))
});

static FIELD_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| compile(r"^[A-Za-z_][A-Za-z0-9_]*$"));

/// A developer-authored regex, always matched against the whole value.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    source: String,
    anchored: Regex,
}

impl FieldPattern {
    /// Compile a pattern. Anchors are added so only full-string matches count.
    ///
    /// The source must compile on its own first; a source with unbalanced
    /// groups such as `a)|(?:b` would otherwise close the anchoring group.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Regex::new(source)?;
        let anchored = Regex::new(&format!("^(?:{})$", source))?;
        Ok(Self {
            source: source.to_string(),
            anchored,
        })
    }

    /// The pattern as declared.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Check for a full-string match.
    pub fn is_full_match(&self, value: &str) -> bool {
        self.anchored.is_match(value)
    }
}

/// Expected shape of a field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Decimal integer, within ±(2^53 - 1) and the optional bounds.
    Integer { min: Option<i64>, max: Option<i64> },
    /// Non-empty string of at most `max_len` characters.
    BoundedString { max_len: usize },
    /// One of a fixed set of strings.
    Enum {
        allowed: Vec<String>,
        case_sensitive: bool,
    },
    /// String fully matching a developer-authored regex.
    Pattern(FieldPattern),
    /// Conservatively shaped email address.
    Email,
    /// String that will be used as a property key.
    SafeKey,
    /// Non-negative amount with at most two fractional digits.
    Currency,
}

impl FieldKind {
    /// Unbounded integer kind.
    pub fn integer() -> Self {
        FieldKind::Integer {
            min: None,
            max: None,
        }
    }

    /// Case-sensitive enum kind.
    pub fn one_of<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FieldKind::Enum {
            allowed: allowed.into_iter().map(Into::into).collect(),
            case_sensitive: true,
        }
    }

    /// Pattern kind from a regex source.
    pub fn pattern(source: &str) -> Result<Self, regex::Error> {
        FieldPattern::new(source).map(FieldKind::Pattern)
    }

    /// Short name of this kind, for logs and catalogs.
    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Integer { .. } => "integer",
            FieldKind::BoundedString { .. } => "bounded_string",
            FieldKind::Enum { .. } => "enum",
            FieldKind::Pattern(_) => "pattern",
            FieldKind::Email => "email",
            FieldKind::SafeKey => "safe_key",
            FieldKind::Currency => "currency",
        }
    }
}

/// Declaration of one untrusted request field.
///
/// Immutable once declared: there are no setters that could invalidate the
/// checks done in [`FieldSchema::new`].
#[derive(Debug, Clone)]
pub struct FieldSchema {
    name: String,
    kind: FieldKind,
    required: bool,
    used_as_key: bool,
}

impl FieldSchema {
    /// Declare a required field.
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Result<Self, EngineError> {
        let name = name.into();

        if !FIELD_NAME_PATTERN.is_match(&name) {
            return Err(EngineError::invalid_schema(
                name,
                "field names must be identifiers ([A-Za-z_][A-Za-z0-9_]*)",
            ));
        }

        match &kind {
            FieldKind::Integer {
                min: Some(min),
                max: Some(max),
            } if min > max => {
                return Err(EngineError::invalid_schema(name, "min is greater than max"));
            }
            FieldKind::BoundedString { max_len: 0 } => {
                return Err(EngineError::invalid_schema(name, "max_len must be positive"));
            }
            FieldKind::Enum { allowed, .. } if allowed.is_empty() => {
                return Err(EngineError::invalid_schema(name, "enum has no allowed values"));
            }
            _ => {}
        }

        Ok(Self {
            name,
            kind,
            required: true,
            used_as_key: false,
        })
    }

    /// Mark the field optional. Absent optional fields bind as null.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Mark the field as also used for a property key.
    pub fn used_as_key(mut self) -> Self {
        self.used_as_key = true;
        self
    }

    /// Field name (also the named placeholder it binds to).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind.
    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    /// Whether the field must be present.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Whether the accepted value must pass the key safety guard.
    pub fn is_key(&self) -> bool {
        self.used_as_key || matches!(self.kind, FieldKind::SafeKey)
    }
}

/// A value that passed classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ClassifiedValue {
    Null,
    Integer(i64),
    Decimal(Decimal),
    Text(String),
}

impl ClassifiedValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, ClassifiedValue::Null)
    }

    /// Get the value as text, if it is a string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ClassifiedValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// String form used when the value must be embedded as a literal.
    ///
    /// Null renders as the empty string.
    pub fn to_literal_text(&self) -> String {
        match self {
            ClassifiedValue::Null => String::new(),
            ClassifiedValue::Integer(v) => v.to_string(),
            ClassifiedValue::Decimal(v) => v.to_string(),
            ClassifiedValue::Text(v) => v.clone(),
        }
    }
}

impl fmt::Display for ClassifiedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClassifiedValue::Null => f.write_str("NULL"),
            other => f.write_str(&other.to_literal_text()),
        }
    }
}

/// Outcome of classifying one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Accepted(ClassifiedValue),
    Rejected(ErrorKind),
}

impl ValidationResult {
    /// Check if the value was accepted.
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationResult::Accepted(_))
    }

    /// Convert into a `Result` for `?` propagation.
    pub fn into_result(self) -> Result<ClassifiedValue, ErrorKind> {
        match self {
            ValidationResult::Accepted(value) => Ok(value),
            ValidationResult::Rejected(kind) => Err(kind),
        }
    }
}

impl From<Result<ClassifiedValue, ErrorKind>> for ValidationResult {
    fn from(result: Result<ClassifiedValue, ErrorKind>) -> Self {
        match result {
            Ok(value) => ValidationResult::Accepted(value),
            Err(kind) => ValidationResult::Rejected(kind),
        }
    }
}

/// Classify a raw value against a field schema.
///
/// `null` is treated as an absent value.
pub fn classify(raw: &Value, schema: &FieldSchema) -> ValidationResult {
    if raw.is_null() {
        return if schema.required {
            ValidationResult::Rejected(ErrorKind::Missing)
        } else {
            ValidationResult::Accepted(ClassifiedValue::Null)
        };
    }

    let result = match &schema.kind {
        FieldKind::Integer { min, max } => classify_integer(raw, *min, *max),
        FieldKind::BoundedString { max_len } => classify_bounded(raw, *max_len),
        FieldKind::Enum {
            allowed,
            case_sensitive,
        } => classify_enum(raw, allowed, *case_sensitive),
        FieldKind::Pattern(pattern) => classify_pattern(raw, pattern),
        FieldKind::Email => classify_email(raw),
        FieldKind::SafeKey => classify_safe_key(raw),
        FieldKind::Currency => classify_currency(raw),
    };

    result.into()
}

/// Look a field up by its declared name and classify it.
pub fn classify_field(fields: &Map<String, Value>, schema: &FieldSchema) -> ValidationResult {
    classify(fields.get(&schema.name).unwrap_or(&Value::Null), schema)
}

fn as_string(raw: &Value) -> Result<&str, ErrorKind> {
    raw.as_str().ok_or(ErrorKind::InvalidType)
}

fn classify_integer(
    raw: &Value,
    min: Option<i64>,
    max: Option<i64>,
) -> Result<ClassifiedValue, ErrorKind> {
    let value = match raw {
        Value::Number(n) => match n.as_i64() {
            Some(v) => v,
            // u64 beyond i64, or any float
            None if n.is_u64() => return Err(ErrorKind::OutOfRange),
            None => return Err(ErrorKind::InvalidType),
        },
        Value::String(s) => {
            if !INTEGER_PATTERN.is_match(s) {
                return Err(ErrorKind::InvalidType);
            }
            if s.len() > MAX_INTEGER_DIGITS {
                return Err(ErrorKind::OutOfRange);
            }
            s.parse::<i64>().map_err(|_| ErrorKind::OutOfRange)?
        }
        _ => return Err(ErrorKind::InvalidType),
    };

    if value.unsigned_abs() > MAX_SAFE_INTEGER.unsigned_abs() {
        return Err(ErrorKind::OutOfRange);
    }
    if min.is_some_and(|min| value < min) || max.is_some_and(|max| value > max) {
        return Err(ErrorKind::OutOfRange);
    }

    Ok(ClassifiedValue::Integer(value))
}

fn classify_bounded(raw: &Value, max_len: usize) -> Result<ClassifiedValue, ErrorKind> {
    let s = as_string(raw)?;
    if s.is_empty() {
        return Err(ErrorKind::InvalidType);
    }
    if s.chars().count() > max_len {
        return Err(ErrorKind::TooLong);
    }
    Ok(ClassifiedValue::Text(s.to_string()))
}

fn classify_enum(
    raw: &Value,
    allowed: &[String],
    case_sensitive: bool,
) -> Result<ClassifiedValue, ErrorKind> {
    let s = as_string(raw)?;
    let found = if case_sensitive {
        allowed.iter().find(|a| a.as_str() == s)
    } else {
        let lower = s.to_lowercase();
        allowed.iter().find(|a| a.to_lowercase() == lower)
    };

    found
        .map(|a| ClassifiedValue::Text(a.clone()))
        .ok_or(ErrorKind::PatternMismatch)
}

fn classify_pattern(raw: &Value, pattern: &FieldPattern) -> Result<ClassifiedValue, ErrorKind> {
    let s = as_string(raw)?;
    if !pattern.is_full_match(s) {
        return Err(ErrorKind::PatternMismatch);
    }
    Ok(ClassifiedValue::Text(s.to_string()))
}

fn classify_email(raw: &Value) -> Result<ClassifiedValue, ErrorKind> {
    let s = as_string(raw)?;
    if s.chars().count() > MAX_EMAIL_LENGTH {
        return Err(ErrorKind::TooLong);
    }
    if s.chars().any(char::is_control) || !EMAIL_PATTERN.is_match(s) {
        return Err(ErrorKind::PatternMismatch);
    }
    Ok(ClassifiedValue::Text(s.to_string()))
}

fn classify_safe_key(raw: &Value) -> Result<ClassifiedValue, ErrorKind> {
    let s = as_string(raw)?;
    SafeKey::new(s).map(|key| ClassifiedValue::Text(key.into()))
}

fn classify_currency(raw: &Value) -> Result<ClassifiedValue, ErrorKind> {
    let text = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return Err(ErrorKind::InvalidType),
    };

    if !CURRENCY_PATTERN.is_match(&text) {
        return Err(ErrorKind::PatternMismatch);
    }

    let mut amount = Decimal::from_str(&text).map_err(|_| ErrorKind::PatternMismatch)?;
    if amount.is_sign_negative() {
        if !amount.is_zero() {
            return Err(ErrorKind::OutOfRange);
        }
        amount.set_sign_positive(true);
    }

    Ok(ClassifiedValue::Decimal(amount))
}
