//! Statement-kind policy for SQL templates.
//!
//! Each SQL endpoint declares which kinds of statements its template may
//! be. The check runs once, when the template is attached to an endpoint.

use crate::error::EngineError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Statement kinds an endpoint template may have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatementPolicy {
    /// Only SELECT (and CTE) templates.
    ReadOnly,

    /// SELECT, INSERT, UPDATE, DELETE, MERGE.
    /// Blocks DDL, permission changes and EXEC.
    #[default]
    Standard,

    /// Any statement kind.
    Unrestricted,
}

/// Leading keyword of a SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Merge,
    Create,
    Alter,
    Drop,
    Truncate,
    Execute,
    Grant,
    Revoke,
    Other,
}

impl StatementKind {
    /// Check if this statement only reads.
    pub fn is_read(&self) -> bool {
        matches!(self, StatementKind::Select)
    }

    /// Check if this statement modifies data but not schema.
    pub fn is_dml(&self) -> bool {
        matches!(
            self,
            StatementKind::Select
                | StatementKind::Insert
                | StatementKind::Update
                | StatementKind::Delete
                | StatementKind::Merge
        )
    }
}

static LEADING_KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z]+)\b")
        .unwrap_or_else(|e| panic!("Internal error: invalid leading keyword pattern: {}", e))
});

impl StatementPolicy {
    /// Check a SQL template against this policy, returning its kind.
    pub fn check(&self, text: &str) -> Result<StatementKind, EngineError> {
        let kind = detect_statement_kind(text);

        let allowed = match self {
            StatementPolicy::ReadOnly => kind.is_read(),
            StatementPolicy::Standard => kind.is_dml(),
            StatementPolicy::Unrestricted => true,
        };

        if allowed {
            Ok(kind)
        } else {
            Err(EngineError::invalid_template(format!(
                "{:?} statements are not allowed under the {:?} policy",
                kind, self
            )))
        }
    }
}

/// Detect the kind of a SQL statement from its first keyword.
pub fn detect_statement_kind(text: &str) -> StatementKind {
    let body = skip_leading_comments(text);

    let Some(keyword) = LEADING_KEYWORD
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_uppercase())
    else {
        return StatementKind::Other;
    };

    match keyword.as_str() {
        "SELECT" | "WITH" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "MERGE" => StatementKind::Merge,
        "CREATE" => StatementKind::Create,
        "ALTER" => StatementKind::Alter,
        "DROP" => StatementKind::Drop,
        "TRUNCATE" => StatementKind::Truncate,
        "EXEC" | "EXECUTE" | "CALL" => StatementKind::Execute,
        "GRANT" => StatementKind::Grant,
        "REVOKE" => StatementKind::Revoke,
        _ => StatementKind::Other,
    }
}

fn skip_leading_comments(text: &str) -> &str {
    let mut rest = text;

    loop {
        let trimmed = rest.trim_start();

        if let Some(after) = trimmed.strip_prefix("--") {
            match after.find('\n') {
                Some(pos) => rest = &after[pos + 1..],
                None => return "",
            }
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            match after.find("*/") {
                Some(pos) => rest = &after[pos + 2..],
                None => return "",
            }
        } else {
            return trimmed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_statement_kind() {
        assert_eq!(detect_statement_kind("SELECT * FROM t"), StatementKind::Select);
        assert_eq!(
            detect_statement_kind("  with cte AS (SELECT 1) SELECT * FROM cte"),
            StatementKind::Select
        );
        assert_eq!(detect_statement_kind("INSERT INTO t VALUES ($1)"), StatementKind::Insert);
        assert_eq!(detect_statement_kind("DROP TABLE t"), StatementKind::Drop);
        assert_eq!(detect_statement_kind("EXEC sp_who"), StatementKind::Execute);
        assert_eq!(detect_statement_kind(""), StatementKind::Other);
    }

    #[test]
    fn test_detect_with_comments() {
        assert_eq!(
            detect_statement_kind("-- lookup\nSELECT * FROM t"),
            StatementKind::Select
        );
        assert_eq!(
            detect_statement_kind("/* lookup */ DELETE FROM t WHERE id = $1"),
            StatementKind::Delete
        );
        assert_eq!(detect_statement_kind("/* unclosed SELECT"), StatementKind::Other);
    }

    #[test]
    fn test_read_only_policy() {
        let policy = StatementPolicy::ReadOnly;
        assert!(policy.check("SELECT * FROM t WHERE id = $1").is_ok());
        assert!(policy.check("UPDATE t SET a = $1").is_err());
    }

    #[test]
    fn test_standard_policy() {
        let policy = StatementPolicy::default();
        assert!(policy.check("UPDATE t SET a = $1 WHERE id = $2").is_ok());
        assert!(policy.check("DELETE FROM t WHERE id = $1").is_ok());
        assert!(policy.check("TRUNCATE TABLE t").is_err());
        assert!(policy.check("GRANT ALL ON t TO $1").is_err());
        assert!(policy.check("EXEC proc $1").is_err());
    }

    #[test]
    fn test_unrestricted_policy() {
        assert!(StatementPolicy::Unrestricted.check("CREATE TABLE t (id INT)").is_ok());
    }
}
