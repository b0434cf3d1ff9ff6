//! Static query templates and placeholder parsing.

use crate::error::EngineError;
use crate::security::{audit_template, lex_regions, Grammar, Region};
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;

/// A parameter slot in a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Placeholder {
    /// `$1`, `$2`, ... (1-based).
    Positional(usize),
    /// `:name`.
    Named(String),
}

impl Placeholder {
    /// Create a named placeholder.
    pub fn named(name: impl Into<String>) -> Self {
        Placeholder::Named(name.into())
    }
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placeholder::Positional(n) => write!(f, "${}", n),
            Placeholder::Named(name) => write!(f, ":{}", name),
        }
    }
}

impl Serialize for Placeholder {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Placeholder style used by a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    Positional,
    Named,
}

/// One placeholder occurrence and its byte span in the template text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Occurrence {
    pub(crate) placeholder: Placeholder,
    pub(crate) start: usize,
    pub(crate) end: usize,
}

/// A developer-authored query with placeholders.
///
/// The text is fixed when the template is declared; only bindings vary per
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryTemplate {
    grammar: Grammar,
    text: String,
    #[serde(skip)]
    occurrences: Vec<Occurrence>,
    #[serde(skip)]
    placeholders: Vec<Placeholder>,
}

impl QueryTemplate {
    /// Parse and audit a template.
    pub fn new(grammar: Grammar, text: impl Into<String>) -> Result<Self, EngineError> {
        let text = text.into();

        if text.trim().is_empty() {
            return Err(EngineError::invalid_template("template is empty"));
        }

        audit_template(&text, grammar)?;

        let regions = lex_regions(&text, grammar)?;
        let occurrences = scan_placeholders(&text, &regions)?;
        let placeholders = canonical_order(&occurrences)?;

        if grammar == Grammar::Shell {
            check_shell_arguments(&text, &occurrences)?;
        }

        Ok(Self {
            grammar,
            text,
            occurrences,
            placeholders,
        })
    }

    /// Declare a SQL template.
    pub fn sql(text: impl Into<String>) -> Result<Self, EngineError> {
        Self::new(Grammar::Sql, text)
    }

    /// Declare an XPath template.
    pub fn xpath(text: impl Into<String>) -> Result<Self, EngineError> {
        Self::new(Grammar::XPath, text)
    }

    /// Declare a command template (program followed by arguments).
    pub fn shell(text: impl Into<String>) -> Result<Self, EngineError> {
        Self::new(Grammar::Shell, text)
    }

    /// Target grammar.
    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    /// Template text as declared.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct placeholders in binding order.
    ///
    /// Positional placeholders are ordered by index, named ones by first
    /// appearance.
    pub fn placeholders(&self) -> &[Placeholder] {
        &self.placeholders
    }

    /// Placeholder style, or `None` for a template without placeholders.
    pub fn style(&self) -> Option<PlaceholderStyle> {
        self.placeholders.first().map(|p| match p {
            Placeholder::Positional(_) => PlaceholderStyle::Positional,
            Placeholder::Named(_) => PlaceholderStyle::Named,
        })
    }

    pub(crate) fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Find `$N` and `:name` occurrences in code regions.
///
/// Quoted literals and SQL comments are skipped. `::` (casts, XPath axes)
/// and `ns:name` (prefixed names) are not placeholders.
fn scan_placeholders(text: &str, regions: &[Region]) -> Result<Vec<Occurrence>, EngineError> {
    let bytes = text.as_bytes();
    let mut occurrences = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        if regions[i] != Region::Code {
            i += 1;
            continue;
        }

        match bytes[i] {
            b'$' if bytes.get(i + 1).is_some_and(u8::is_ascii_digit) => {
                let start = i;
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let index: usize = text[start + 1..i].parse().map_err(|_| {
                    EngineError::invalid_template(format!(
                        "placeholder index too large: {}",
                        &text[start..i]
                    ))
                })?;
                if index == 0 {
                    return Err(EngineError::invalid_template(
                        "positional placeholders start at $1",
                    ));
                }
                occurrences.push(Occurrence {
                    placeholder: Placeholder::Positional(index),
                    start,
                    end: i,
                });
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
            }
            b':' if bytes.get(i + 1).copied().is_some_and(is_ident_start)
                && !(i > 0 && is_ident_continue(bytes[i - 1])) =>
            {
                let start = i;
                i += 1;
                while i < bytes.len() && is_ident_continue(bytes[i]) {
                    i += 1;
                }
                occurrences.push(Occurrence {
                    placeholder: Placeholder::Named(text[start + 1..i].to_string()),
                    start,
                    end: i,
                });
            }
            _ => i += 1,
        }
    }

    Ok(occurrences)
}

/// Distinct placeholders in binding order, checking style consistency.
fn canonical_order(occurrences: &[Occurrence]) -> Result<Vec<Placeholder>, EngineError> {
    let positional: BTreeSet<usize> = occurrences
        .iter()
        .filter_map(|o| match o.placeholder {
            Placeholder::Positional(n) => Some(n),
            Placeholder::Named(_) => None,
        })
        .collect();

    let mut named: Vec<Placeholder> = Vec::new();
    for occurrence in occurrences {
        if matches!(occurrence.placeholder, Placeholder::Named(_))
            && !named.contains(&occurrence.placeholder)
        {
            named.push(occurrence.placeholder.clone());
        }
    }

    match (positional.is_empty(), named.is_empty()) {
        (false, false) => Err(EngineError::invalid_template(
            "template mixes positional and named placeholders",
        )),
        (false, true) => {
            let max = positional.iter().next_back().copied().unwrap_or(0);
            if max != positional.len() {
                return Err(EngineError::invalid_template(format!(
                    "positional placeholders must run $1..${} without gaps",
                    max
                )));
            }
            Ok(positional.into_iter().map(Placeholder::Positional).collect())
        }
        _ => Ok(named),
    }
}

/// Byte spans of whitespace-separated tokens.
pub(crate) fn token_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        match (ch.is_whitespace(), start) {
            (true, Some(s)) => {
                spans.push((s, idx));
                start = None;
            }
            (false, None) => start = Some(idx),
            _ => {}
        }
    }
    if let Some(s) = start {
        spans.push((s, text.len()));
    }

    spans
}

/// Command placeholders must be whole arguments and never the program.
fn check_shell_arguments(text: &str, occurrences: &[Occurrence]) -> Result<(), EngineError> {
    let spans = token_spans(text);

    for (idx, occurrence) in occurrences.iter().enumerate() {
        let position = spans
            .iter()
            .position(|&(start, end)| start == occurrence.start && end == occurrence.end);

        match position {
            Some(0) => {
                return Err(EngineError::invalid_template(
                    "the program of a command template cannot be a placeholder",
                ))
            }
            Some(_) => {}
            None => {
                return Err(EngineError::invalid_template(format!(
                    "placeholder #{} ({}) must be a whole argument",
                    idx + 1,
                    occurrence.placeholder
                )))
            }
        }
    }

    Ok(())
}
