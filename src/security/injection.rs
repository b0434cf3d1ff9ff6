//! Template auditing and suspicious-value detection.
//!
//! Templates are developer-authored, but the most common way injection gets
//! back in is a template that was assembled from data at some point:
//! quoted placeholders, stacked statements, leftover tautologies. Those are
//! rejected when the template is declared.
//!
//! Values are never rejected here. An accepted value that *looks* like an
//! injection attempt is still bound as data; the detector only lets the
//! caller log it.

use crate::error::EngineError;
use crate::security::lexer::{lex_regions, mask_literals};
use crate::security::literal::Grammar;
use once_cell::sync::Lazy;
use regex::Regex;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("Internal error: invalid regex pattern '{}': {}", pattern, e))
}

/// A placeholder wrapped in quotes is a string literal, not a parameter.
static QUOTED_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| compile(r#"['"]\s*(\$[0-9]+|:[A-Za-z_][A-Za-z0-9_]*)\s*['"]"#));

/// Patterns that never belong in a SQL template.
static SQL_TEMPLATE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (compile(r";\s*\S"), "multiple statements in one template"),
        (compile(r"--[^\n]*$"), "trailing line comment"),
        (compile(r"(?i)'\s*OR\s+'[^']*'\s*=\s*'"), "OR tautology"),
        (compile(r"(?i)\bOR\s+1\s*=\s*1\b"), "OR 1=1 tautology"),
        (compile(r"(?i)\bWAITFOR\s+DELAY\b"), "WAITFOR DELAY"),
        (compile(r"(?i)\bxp_cmdshell\b"), "xp_cmdshell"),
    ]
});

/// Shell operators do nothing without a shell, so their presence means the
/// template was written for one.
static SHELL_TEMPLATE_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (compile(r"[;&|]"), "shell control operator"),
        (compile(r"[<>]"), "shell redirection"),
        (compile(r"\$\(|`"), "command substitution"),
        (compile(r#"['"]"#), "shell quoting"),
    ]
});

/// Value fragments that suggest an injection attempt, checked upper-cased.
const SUSPICIOUS_FRAGMENTS: &[(&str, &str)] = &[
    ("'--", "comment injection"),
    ("';", "statement terminator"),
    ("' OR ", "OR injection"),
    ("' AND ", "AND injection"),
    ("UNION SELECT", "UNION injection"),
    ("$(", "command substitution"),
    ("`", "command substitution"),
    ("__PROTO__", "prototype key"),
    ("CONSTRUCTOR.PROTOTYPE", "prototype key"),
];

/// Audit a developer-authored template for embedded data or foreign syntax.
pub fn audit_template(text: &str, grammar: Grammar) -> Result<(), EngineError> {
    if text.contains('\0') {
        return Err(EngineError::invalid_template("template contains a NUL byte"));
    }

    if matches!(grammar, Grammar::Sql | Grammar::XPath) && QUOTED_PLACEHOLDER.is_match(text) {
        return Err(EngineError::invalid_template(
            "placeholder wrapped in quotes is a literal, not a parameter",
        ));
    }

    let patterns = match grammar {
        Grammar::Sql => SQL_TEMPLATE_PATTERNS.iter(),
        Grammar::Shell => SHELL_TEMPLATE_PATTERNS.iter(),
        Grammar::XPath => return lex_regions(text, grammar).map(|_| ()),
    };

    // Literal content is data, not structure.
    let masked = mask_literals(text, &lex_regions(text, grammar)?);

    for (pattern, description) in patterns {
        if pattern.is_match(&masked) {
            return Err(EngineError::invalid_template(format!(
                "{} template contains {}",
                grammar, description
            )));
        }
    }

    Ok(())
}

/// Heuristic detector for values that resemble injection payloads.
#[derive(Debug, Clone, Default)]
pub struct InjectionDetector {
    /// Whether detection is enabled
    enabled: bool,
}

impl InjectionDetector {
    /// Create a new injection detector.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Check whether detection is enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Describe why a value looks like an injection attempt, if it does.
    pub fn check_value(&self, value: &str) -> Option<&'static str> {
        if !self.enabled {
            return None;
        }

        let upper = value.to_uppercase();
        SUSPICIOUS_FRAGMENTS
            .iter()
            .find(|(fragment, _)| upper.contains(fragment))
            .map(|(_, description)| *description)
    }
}

/// Make an untrusted value safe to put in a log line.
///
/// Control characters are escaped so a value cannot forge log records, and
/// the output is truncated to `max_chars` characters.
pub fn redact_for_log(value: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(value.len().min(max_chars) + 3);
    for (count, ch) in value.chars().enumerate() {
        if count >= max_chars {
            out.push_str("...");
            break;
        }
        if ch.is_control() {
            out.extend(ch.escape_default());
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_sql_templates() {
        for text in [
            "SELECT * FROM products WHERE code = $1",
            "SELECT name FROM users WHERE id = :userId AND tenant = :tenant;",
            "SELECT * FROM logs WHERE msg LIKE '%' || $1 || '%'",
            "SELECT id::text FROM t WHERE created > '10:30'",
        ] {
            assert!(audit_template(text, Grammar::Sql).is_ok(), "{text}");
        }
    }

    #[test]
    fn test_sql_template_rejections() {
        for text in [
            "SELECT * FROM users WHERE name = '$1'",
            "SELECT * FROM users WHERE name = ':name'",
            "SELECT * FROM users WHERE id = $1; DROP TABLE users",
            "SELECT * FROM users WHERE id = $1 --",
            "SELECT * FROM users WHERE id = $1 OR 1=1",
            "SELECT * FROM users WHERE a = '' OR 'x'='x'",
        ] {
            assert!(audit_template(text, Grammar::Sql).is_err(), "{text}");
        }
    }

    #[test]
    fn test_literal_content_is_not_structure() {
        for text in [
            "SELECT * FROM t WHERE sep = ';x' AND id = $1",
            "SELECT * FROM t WHERE marker = '--' AND id = $1",
            "SELECT * FROM t WHERE note = 'a'' OR ''1''=''1' AND id = :id",
        ] {
            assert!(audit_template(text, Grammar::Sql).is_ok(), "{text}");
        }

        // Structure outside the literal is still caught.
        assert!(audit_template("SELECT ';x'; DROP TABLE t", Grammar::Sql).is_err());
        assert!(audit_template("SELECT * FROM t WHERE a = ';x' --", Grammar::Sql).is_err());
    }

    #[test]
    fn test_xpath_templates() {
        assert!(audit_template("//user[name=:name and pass=:pass]", Grammar::XPath).is_ok());
        assert!(audit_template("//user[name=':name']", Grammar::XPath).is_err());
    }

    #[test]
    fn test_shell_templates() {
        assert!(audit_template("ping -c 1 :host", Grammar::Shell).is_ok());
        assert!(audit_template("ping -c 1 :host; ls", Grammar::Shell).is_err());
        assert!(audit_template("cat :file | grep x", Grammar::Shell).is_err());
        assert!(audit_template("echo \":msg\"", Grammar::Shell).is_err());
        assert!(audit_template("ls > out.txt", Grammar::Shell).is_err());
    }

    #[test]
    fn test_value_injection() {
        let d = InjectionDetector::new(true);
        assert!(d.check_value("normal value").is_none());
        assert!(d.check_value("John's value").is_none());
        assert_eq!(d.check_value("value'--"), Some("comment injection"));
        assert_eq!(d.check_value("x' or '1'='1"), Some("OR injection"));
        assert_eq!(d.check_value("$(whoami)"), Some("command substitution"));
        assert_eq!(d.check_value("a.__proto__.b"), Some("prototype key"));
    }

    #[test]
    fn test_disabled_detector() {
        let d = InjectionDetector::new(false);
        assert!(!d.is_enabled());
        assert!(d.check_value("x' OR '1'='1").is_none());
    }

    #[test]
    fn test_redact_for_log() {
        assert_eq!(redact_for_log("short", 10), "short");
        assert_eq!(redact_for_log("this is a long string", 10), "this is a ...");
        assert_eq!(
            redact_for_log("admin\n[INFO] forged", 64),
            "admin\\n[INFO] forged"
        );
        assert_eq!(redact_for_log("tab\there", 64), "tab\\there");
    }
}
