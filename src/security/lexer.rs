//! Lexical regions of a template.
//!
//! Placeholder scanning and template auditing must agree on what is code,
//! what is inside a quoted literal and what is a comment. Both read the
//! regions computed here.

use crate::error::EngineError;
use crate::security::literal::Grammar;

/// What a template byte belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Region {
    Code,
    /// Opening or closing quote of a literal.
    Delimiter,
    /// Inside a quoted literal.
    Quoted,
    /// SQL `-- ...` or `/* ... */`, delimiters included.
    Comment,
}

/// Classify every byte of `text`.
///
/// Quotes are `'` and `"` in every grammar. Comments are only recognized
/// in SQL. A doubled SQL quote (`''`) closes and reopens the literal, which
/// leaves its content in the quoted region.
pub(crate) fn lex_regions(text: &str, grammar: Grammar) -> Result<Vec<Region>, EngineError> {
    let bytes = text.as_bytes();
    let mut regions = vec![Region::Code; bytes.len()];
    let sql = grammar == Grammar::Sql;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                regions[i] = Region::Delimiter;
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => {
                            return Err(EngineError::invalid_template(
                                "unterminated quoted region",
                            ))
                        }
                        Some(&b) if b == quote => {
                            regions[i] = Region::Delimiter;
                            i += 1;
                            break;
                        }
                        Some(_) => {
                            regions[i] = Region::Quoted;
                            i += 1;
                        }
                    }
                }
            }
            b'-' if sql && bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    regions[i] = Region::Comment;
                    i += 1;
                }
            }
            b'/' if sql && bytes.get(i + 1) == Some(&b'*') => {
                let end = text[i + 2..]
                    .find("*/")
                    .map(|offset| i + 2 + offset + 2)
                    .ok_or_else(|| EngineError::invalid_template("unterminated block comment"))?;
                regions[i..end].fill(Region::Comment);
                i = end;
            }
            _ => i += 1,
        }
    }

    Ok(regions)
}

/// Template text with the content of quoted literals blanked out.
///
/// Delimiters and comments are kept, so structural checks still see where
/// literals and comments are, but never what a literal contains.
pub(crate) fn mask_literals(text: &str, regions: &[Region]) -> String {
    text.char_indices()
        .map(|(idx, ch)| match regions.get(idx) {
            Some(Region::Quoted) => ' ',
            _ => ch,
        })
        .collect()
}
