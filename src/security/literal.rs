//! Literal escaping for SQL, XPath and shell grammars.
//!
//! A [`SafeLiteral<G>`] is text proven safe to embed as a single literal in
//! grammar `G`. The grammar is a type parameter, so a literal escaped for
//! XPath cannot be passed where a SQL literal is expected:
//!
//! ```compile_fail
//! use query_guard::security::{SafeLiteral, Sql, XPath};
//!
//! fn embed_sql(_literal: &SafeLiteral<Sql>) {}
//!
//! let literal = SafeLiteral::<XPath>::escape("O'Brien");
//! embed_sql(&literal);
//! ```

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

/// Target grammar for literal embedding and template building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grammar {
    /// SQL with driver-level parameter binding.
    Sql,
    /// XPath 1.0 expressions (no native parameter binding).
    #[serde(rename = "xpath")]
    XPath,
    /// Command lines, executed as an argument vector.
    Shell,
}

impl Grammar {
    /// Get the grammar name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Grammar::Sql => "sql",
            Grammar::XPath => "xpath",
            Grammar::Shell => "shell",
        }
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Grammar {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sql" => Ok(Grammar::Sql),
            "xpath" => Ok(Grammar::XPath),
            "shell" | "command" => Ok(Grammar::Shell),
            _ => Err(EngineError::UnknownGrammar(s.to_string())),
        }
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level grammar marker.
///
/// Sealed: the set of grammars is fixed at build time.
pub trait GrammarKind: sealed::Sealed {
    /// Runtime tag for this grammar.
    const GRAMMAR: Grammar;

    /// Quote a raw string as one literal of this grammar.
    fn quote(value: &str) -> String;
}

/// SQL string literal grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sql;

/// XPath 1.0 string literal grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XPath;

/// POSIX shell double-quoted word grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shell;

impl sealed::Sealed for Sql {}
impl sealed::Sealed for XPath {}
impl sealed::Sealed for Shell {}

impl GrammarKind for Sql {
    const GRAMMAR: Grammar = Grammar::Sql;

    /// Doubles embedded single quotes and wraps the result in single quotes.
    fn quote(value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('\'');
        for ch in value.chars() {
            if ch == '\'' {
                out.push('\'');
            }
            out.push(ch);
        }
        out.push('\'');
        out
    }
}

impl GrammarKind for XPath {
    const GRAMMAR: Grammar = Grammar::XPath;

    /// XPath 1.0 string literals have no escape mechanism, so the delimiter
    /// is chosen to avoid the content, falling back to `concat()`.
    fn quote(value: &str) -> String {
        if !value.contains('\'') {
            return format!("'{}'", value);
        }
        if !value.contains('"') {
            return format!("\"{}\"", value);
        }

        let mut args: Vec<String> = Vec::new();
        for (idx, part) in value.split('\'').enumerate() {
            if idx > 0 {
                args.push("\"'\"".to_string());
            }
            if !part.is_empty() {
                args.push(format!("'{}'", part));
            }
        }

        format!("concat({})", args.join(", "))
    }
}

impl GrammarKind for Shell {
    const GRAMMAR: Grammar = Grammar::Shell;

    /// Double-quoted word with `"`, `\`, `$` and `` ` `` backslash-escaped.
    fn quote(value: &str) -> String {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('"');
        for ch in value.chars() {
            if matches!(ch, '"' | '\\' | '$' | '`') {
                out.push('\\');
            }
            out.push(ch);
        }
        out.push('"');
        out
    }
}

/// Text that is safe to embed as one literal in grammar `G`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeLiteral<G: GrammarKind> {
    text: String,
    _grammar: PhantomData<G>,
}

impl<G: GrammarKind> SafeLiteral<G> {
    /// Escape a raw string for grammar `G`.
    ///
    /// Never fails: every string is escapable by construction.
    pub fn escape(value: &str) -> Self {
        Self {
            text: G::quote(value),
            _grammar: PhantomData,
        }
    }

    /// Grammar this literal was escaped for.
    pub fn grammar(&self) -> Grammar {
        G::GRAMMAR
    }

    /// Get the escaped literal text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Consume the literal and return its text.
    pub fn into_string(self) -> String {
        self.text
    }
}

impl<G: GrammarKind> fmt::Display for SafeLiteral<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A literal escaped for a grammar chosen at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaggedLiteral {
    Sql(SafeLiteral<Sql>),
    XPath(SafeLiteral<XPath>),
    Shell(SafeLiteral<Shell>),
}

impl TaggedLiteral {
    /// Grammar this literal was escaped for.
    pub fn grammar(&self) -> Grammar {
        match self {
            TaggedLiteral::Sql(l) => l.grammar(),
            TaggedLiteral::XPath(l) => l.grammar(),
            TaggedLiteral::Shell(l) => l.grammar(),
        }
    }

    /// Get the escaped literal text.
    pub fn as_str(&self) -> &str {
        match self {
            TaggedLiteral::Sql(l) => l.as_str(),
            TaggedLiteral::XPath(l) => l.as_str(),
            TaggedLiteral::Shell(l) => l.as_str(),
        }
    }
}

/// Escape a raw string for a grammar chosen at runtime.
///
/// # Examples
///
/// ```
/// use query_guard::security::{escape_literal, Grammar};
///
/// assert_eq!(escape_literal("O'Brien", Grammar::Sql).as_str(), "'O''Brien'");
/// assert_eq!(escape_literal("O'Brien", Grammar::XPath).as_str(), "\"O'Brien\"");
/// ```
pub fn escape_literal(value: &str, grammar: Grammar) -> TaggedLiteral {
    match grammar {
        Grammar::Sql => TaggedLiteral::Sql(SafeLiteral::escape(value)),
        Grammar::XPath => TaggedLiteral::XPath(SafeLiteral::escape(value)),
        Grammar::Shell => TaggedLiteral::Shell(SafeLiteral::escape(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tokenize with sqlparser, expecting exactly one string token.
    ///
    /// ANSI rules: a backslash is ordinary content.
    fn sql_untokenize(literal: &str) -> Option<String> {
        use sqlparser::dialect::AnsiDialect;
        use sqlparser::tokenizer::{Token, Tokenizer};

        let tokens = Tokenizer::new(&AnsiDialect {}, literal).tokenize().ok()?;
        match tokens.as_slice() {
            [Token::SingleQuotedString(content)] => Some(content.clone()),
            _ => None,
        }
    }

    #[test]
    fn test_sql_quote_doubling() {
        assert_eq!(SafeLiteral::<Sql>::escape("abc").as_str(), "'abc'");
        assert_eq!(SafeLiteral::<Sql>::escape("O'Brien").as_str(), "'O''Brien'");
        assert_eq!(SafeLiteral::<Sql>::escape("").as_str(), "''");
    }

    #[test]
    fn test_sql_round_trip() {
        for s in [
            "'",
            "''",
            "PROD001' OR '1'='1",
            "'; DROP TABLE users; --",
            "it's a 'quoted' value",
            "trailing\\'",
        ] {
            let literal = SafeLiteral::<Sql>::escape(s);
            assert_eq!(sql_untokenize(literal.as_str()).as_deref(), Some(s));
        }
    }

    #[test]
    fn test_xpath_delimiter_choice() {
        assert_eq!(SafeLiteral::<XPath>::escape("alice").as_str(), "'alice'");
        assert_eq!(SafeLiteral::<XPath>::escape("O'Brien").as_str(), "\"O'Brien\"");
        assert_eq!(
            SafeLiteral::<XPath>::escape("say \"hi\"").as_str(),
            "'say \"hi\"'"
        );
    }

    #[test]
    fn test_xpath_concat_for_both_quotes() {
        assert_eq!(
            SafeLiteral::<XPath>::escape("a'b\"c").as_str(),
            "concat('a', \"'\", 'b\"c')"
        );
        assert_eq!(
            SafeLiteral::<XPath>::escape("'\"").as_str(),
            "concat(\"'\", '\"')"
        );
        assert_eq!(
            SafeLiteral::<XPath>::escape("\"''").as_str(),
            "concat('\"', \"'\", \"'\")"
        );
    }

    #[test]
    fn test_shell_quoting() {
        assert_eq!(SafeLiteral::<Shell>::escape("file.txt").as_str(), "\"file.txt\"");
        assert_eq!(
            SafeLiteral::<Shell>::escape("a\"b\\c").as_str(),
            "\"a\\\"b\\\\c\""
        );
        assert_eq!(
            SafeLiteral::<Shell>::escape("$(rm -rf /)`id`").as_str(),
            "\"\\$(rm -rf /)\\`id\\`\""
        );
    }

    #[test]
    fn test_tagged_literal_grammar() {
        let literal = escape_literal("x", Grammar::Shell);
        assert_eq!(literal.grammar(), Grammar::Shell);
        assert_eq!(SafeLiteral::<XPath>::escape("x").grammar(), Grammar::XPath);
    }

    #[test]
    fn test_grammar_parsing() {
        assert_eq!("SQL".parse::<Grammar>().unwrap(), Grammar::Sql);
        assert_eq!("xpath".parse::<Grammar>().unwrap(), Grammar::XPath);
        assert_eq!("command".parse::<Grammar>().unwrap(), Grammar::Shell);
        assert!(matches!(
            "ldap".parse::<Grammar>(),
            Err(EngineError::UnknownGrammar(_))
        ));
    }
}
