//! Input classification, key safety, literal escaping and template auditing.

mod classifier;
mod injection;
mod keys;
mod lexer;
mod literal;
mod statement;

pub use classifier::{
    classify, classify_field, ClassifiedValue, FieldKind, FieldPattern, FieldSchema,
    ValidationResult,
};
pub use injection::{audit_template, redact_for_log, InjectionDetector};
pub(crate) use lexer::{lex_regions, Region};
pub use keys::{is_safe_key, is_safe_key_value, screen_json_keys, SafeKey, SafeKeyMap};
pub use literal::{
    escape_literal, Grammar, GrammarKind, SafeLiteral, Shell, Sql, TaggedLiteral, XPath,
};
pub use statement::{detect_statement_kind, StatementKind, StatementPolicy};
