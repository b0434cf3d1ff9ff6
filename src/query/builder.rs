//! Parameterized query building.
//!
//! Values are never interpolated into template text as raw strings:
//!
//! - SQL keeps data out of the text entirely and returns an ordered
//!   parameter list for driver-level binding.
//! - XPath 1.0 has no parameter binding, so every value is inlined as a
//!   [`SafeLiteral<XPath>`].
//! - Commands become an argument vector; each value is exactly one argument
//!   and no shell is involved.

use crate::error::ErrorKind;
use crate::query::template::{token_spans, Occurrence, Placeholder, QueryTemplate};
use crate::security::{ClassifiedValue, Grammar, SafeLiteral, Shell, Sql, XPath};
use serde::Serialize;
use std::collections::BTreeMap;

/// Values for a template's placeholders.
pub type Bindings = BTreeMap<Placeholder, ClassifiedValue>;

/// Build positional bindings (`$1..$n`) from an ordered list of values.
pub fn positional_bindings<I>(values: I) -> Bindings
where
    I: IntoIterator<Item = ClassifiedValue>,
{
    values
        .into_iter()
        .enumerate()
        .map(|(idx, value)| (Placeholder::Positional(idx + 1), value))
        .collect()
}

/// Executable form of a bound query, handed to an external executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum RenderedQuery {
    /// Query text plus parameters in `$1..$n` order.
    #[serde(rename = "sql")]
    Sql {
        text: String,
        params: Vec<ClassifiedValue>,
    },
    /// XPath expression with every value inlined as a safe literal.
    #[serde(rename = "xpath")]
    XPath { expression: String },
    /// Program and argument vector for direct process invocation.
    #[serde(rename = "command")]
    Command { program: String, args: Vec<String> },
}

/// A template together with the values bound to it for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundQuery {
    template: QueryTemplate,
    bindings: Vec<(Placeholder, ClassifiedValue)>,
    rendered: RenderedQuery,
}

impl BoundQuery {
    /// The template this query was built from.
    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }

    /// Bindings in the template's binding order.
    pub fn bindings(&self) -> &[(Placeholder, ClassifiedValue)] {
        &self.bindings
    }

    /// Executable form.
    pub fn rendered(&self) -> &RenderedQuery {
        &self.rendered
    }

    /// SQL text and parameters, for SQL templates.
    pub fn sql(&self) -> Option<(&str, &[ClassifiedValue])> {
        match &self.rendered {
            RenderedQuery::Sql { text, params } => Some((text, params)),
            _ => None,
        }
    }

    /// XPath expression, for XPath templates.
    pub fn xpath(&self) -> Option<&str> {
        match &self.rendered {
            RenderedQuery::XPath { expression } => Some(expression),
            _ => None,
        }
    }

    /// Program and arguments, for command templates.
    pub fn command(&self) -> Option<(&str, &[String])> {
        match &self.rendered {
            RenderedQuery::Command { program, args } => Some((program, args)),
            _ => None,
        }
    }

    /// SQL with values inlined as escaped literals.
    ///
    /// Only for executors that cannot bind parameters; prefer [`sql`](Self::sql).
    pub fn to_inline_sql(&self) -> Option<String> {
        if self.template.grammar() != Grammar::Sql {
            return None;
        }

        Some(substitute(&self.template, |placeholder| {
            match self.value_of(placeholder) {
                None | Some(ClassifiedValue::Null) => "NULL".to_string(),
                Some(ClassifiedValue::Integer(v)) => inline_number(v.to_string()),
                Some(ClassifiedValue::Decimal(v)) => inline_number(v.to_string()),
                Some(ClassifiedValue::Text(v)) => SafeLiteral::<Sql>::escape(v).into_string(),
            }
        }))
    }

    /// Display form of a command, each argument shell-quoted.
    ///
    /// Meant for logs and audit trails; execution uses [`command`](Self::command).
    pub fn shell_line(&self) -> Option<String> {
        let (program, args) = self.command()?;
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            line.push_str(SafeLiteral::<Shell>::escape(arg).as_str());
        }
        Some(line)
    }

    fn value_of(&self, placeholder: &Placeholder) -> Option<&ClassifiedValue> {
        self.bindings
            .iter()
            .find(|(p, _)| p == placeholder)
            .map(|(_, v)| v)
    }
}

/// Bind values to a template.
///
/// Every template placeholder must have a binding and every binding must
/// name a template placeholder; otherwise the result is
/// [`ErrorKind::PlaceholderMismatch`]. Building is deterministic: equal
/// inputs give equal outputs.
pub fn build(template: &QueryTemplate, bindings: &Bindings) -> Result<BoundQuery, ErrorKind> {
    let expected = template.placeholders();

    if expected.len() != bindings.len() || expected.iter().any(|p| !bindings.contains_key(p)) {
        return Err(ErrorKind::PlaceholderMismatch);
    }

    let ordered: Vec<(Placeholder, ClassifiedValue)> = expected
        .iter()
        .map(|p| (p.clone(), bindings[p].clone()))
        .collect();

    let rendered = match template.grammar() {
        Grammar::Sql => render_sql(template, &ordered),
        Grammar::XPath => render_xpath(template, bindings),
        Grammar::Shell => render_command(template, bindings)?,
    };

    Ok(BoundQuery {
        template: template.clone(),
        bindings: ordered,
        rendered,
    })
}

/// A negative number next to a `-` in the template would open a line comment.
fn inline_number(text: String) -> String {
    if text.starts_with('-') {
        format!("({})", text)
    } else {
        text
    }
}

/// Rebuild the template text, replacing each placeholder occurrence.
fn substitute<F>(template: &QueryTemplate, mut replacement: F) -> String
where
    F: FnMut(&Placeholder) -> String,
{
    let text = template.text();
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;

    for Occurrence {
        placeholder,
        start,
        end,
    } in template.occurrences()
    {
        out.push_str(&text[cursor..*start]);
        out.push_str(&replacement(placeholder));
        cursor = *end;
    }
    out.push_str(&text[cursor..]);

    out
}

fn render_sql(template: &QueryTemplate, ordered: &[(Placeholder, ClassifiedValue)]) -> RenderedQuery {
    let params: Vec<ClassifiedValue> = ordered.iter().map(|(_, v)| v.clone()).collect();

    // Positional templates are already in driver form.
    let text = match ordered.first() {
        Some((Placeholder::Named(_), _)) => substitute(template, |placeholder| {
            let index = ordered
                .iter()
                .position(|(p, _)| p == placeholder)
                .unwrap_or_default();
            format!("${}", index + 1)
        }),
        _ => template.text().to_string(),
    };

    RenderedQuery::Sql { text, params }
}

fn render_xpath(template: &QueryTemplate, bindings: &Bindings) -> RenderedQuery {
    let expression = substitute(template, |placeholder| {
        let text = bindings
            .get(placeholder)
            .map(ClassifiedValue::to_literal_text)
            .unwrap_or_default();
        SafeLiteral::<XPath>::escape(&text).into_string()
    });

    RenderedQuery::XPath { expression }
}

/// Values are never read as options: one starting with `-` is only accepted
/// after a literal `--` argument.
fn render_command(
    template: &QueryTemplate,
    bindings: &Bindings,
) -> Result<RenderedQuery, ErrorKind> {
    let text = template.text();
    let mut tokens = token_spans(text).into_iter();

    let program = tokens
        .next()
        .map(|(start, end)| text[start..end].to_string())
        .unwrap_or_default();

    let mut args = Vec::new();
    let mut options_ended = false;
    for (start, end) in tokens {
        let slot = template
            .occurrences()
            .iter()
            .find(|o| o.start == start && o.end == end);

        match slot.and_then(|o| bindings.get(&o.placeholder)) {
            // Absent optional arguments are left out.
            Some(ClassifiedValue::Null) => {}
            Some(value) => {
                let arg = value.to_literal_text();
                if arg.starts_with('-') && !options_ended {
                    return Err(ErrorKind::PatternMismatch);
                }
                args.push(arg);
            }
            None => {
                let literal = &text[start..end];
                options_ended |= literal == "--";
                args.push(literal.to_string());
            }
        }
    }

    Ok(RenderedQuery::Command { program, args })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> ClassifiedValue {
        ClassifiedValue::Text(s.to_string())
    }

    fn named(pairs: &[(&str, ClassifiedValue)]) -> Bindings {
        pairs
            .iter()
            .map(|(name, value)| (Placeholder::named(*name), value.clone()))
            .collect()
    }

    #[test]
    fn test_sql_positional_text_unchanged() {
        let template = QueryTemplate::sql("SELECT * FROM products WHERE code = $1").unwrap();
        let bound = build(&template, &positional_bindings([text("PROD001")])).unwrap();

        let (sql, params) = bound.sql().unwrap();
        assert_eq!(sql, "SELECT * FROM products WHERE code = $1");
        assert_eq!(params, &[text("PROD001")]);
    }

    #[test]
    fn test_sql_named_rewritten_to_positional() {
        let template =
            QueryTemplate::sql("SELECT * FROM t WHERE a = :a AND b = :b OR a2 = :a").unwrap();
        let bound = build(
            &template,
            &named(&[("b", ClassifiedValue::Integer(2)), ("a", text("x"))]),
        )
        .unwrap();

        let (sql, params) = bound.sql().unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE a = $1 AND b = $2 OR a2 = $1");
        assert_eq!(params, &[text("x"), ClassifiedValue::Integer(2)]);
    }

    #[test]
    fn test_placeholder_mismatch_both_directions() {
        let template = QueryTemplate::sql("SELECT * FROM t WHERE a = :a AND b = :b").unwrap();

        // Missing binding
        assert_eq!(
            build(&template, &named(&[("a", text("x"))])),
            Err(ErrorKind::PlaceholderMismatch)
        );
        // Extra binding
        assert_eq!(
            build(
                &template,
                &named(&[("a", text("x")), ("b", text("y")), ("c", text("z"))])
            ),
            Err(ErrorKind::PlaceholderMismatch)
        );
        // Same count, wrong name
        assert_eq!(
            build(&template, &named(&[("a", text("x")), ("z", text("y"))])),
            Err(ErrorKind::PlaceholderMismatch)
        );
        // Wrong style
        assert_eq!(
            build(&template, &positional_bindings([text("x"), text("y")])),
            Err(ErrorKind::PlaceholderMismatch)
        );
    }

    #[test]
    fn test_build_is_idempotent() {
        let template = QueryTemplate::xpath("//user[name=:name and role=:role]").unwrap();
        let bindings = named(&[("name", text("O'Brien")), ("role", text("admin"))]);
        assert_eq!(
            build(&template, &bindings).unwrap(),
            build(&template, &bindings).unwrap()
        );
    }

    #[test]
    fn test_xpath_values_are_literals() {
        let template = QueryTemplate::xpath("//email[sender=:sender]").unwrap();
        let bound = build(&template, &named(&[("sender", text("a'b\"c"))])).unwrap();
        assert_eq!(
            bound.xpath().unwrap(),
            "//email[sender=concat('a', \"'\", 'b\"c')]"
        );

        let bound = build(&template, &named(&[("sender", ClassifiedValue::Null)])).unwrap();
        assert_eq!(bound.xpath().unwrap(), "//email[sender='']");
    }

    #[test]
    fn test_command_arguments() {
        let template = QueryTemplate::shell("ping -c :count :host").unwrap();
        let bound = build(
            &template,
            &named(&[
                ("count", ClassifiedValue::Integer(3)),
                ("host", text("example.com; rm -rf /")),
            ]),
        )
        .unwrap();

        let (program, args) = bound.command().unwrap();
        assert_eq!(program, "ping");
        assert_eq!(args, &["-c", "3", "example.com; rm -rf /"]);
        assert_eq!(
            bound.shell_line().unwrap(),
            "ping \"-c\" \"3\" \"example.com; rm -rf /\""
        );
    }

    #[test]
    fn test_command_optional_argument_omitted() {
        let template = QueryTemplate::shell("ls -l :dir").unwrap();
        let bound = build(&template, &named(&[("dir", ClassifiedValue::Null)])).unwrap();
        assert_eq!(bound.command().unwrap().1, &["-l"]);
    }

    #[test]
    fn test_command_values_are_not_options() {
        let template = QueryTemplate::shell("ping -c 1 :host").unwrap();
        assert_eq!(
            build(&template, &named(&[("host", text("-f"))])),
            Err(ErrorKind::PatternMismatch)
        );

        let template = QueryTemplate::shell("grep -n -- :pattern notes.txt").unwrap();
        let bound = build(&template, &named(&[("pattern", text("-v"))])).unwrap();
        assert_eq!(bound.command().unwrap().1, &["-n", "--", "-v", "notes.txt"]);
    }

    #[test]
    fn test_inline_sql_negative_numbers() {
        let template =
            QueryTemplate::sql("SELECT * FROM accounts WHERE balance > 100-:delta AND owner = :owner")
                .unwrap();
        let bound = build(
            &template,
            &named(&[
                ("delta", ClassifiedValue::Integer(-5)),
                ("owner", text("alice")),
            ]),
        )
        .unwrap();

        let inline = bound.to_inline_sql().unwrap();
        assert_eq!(
            inline,
            "SELECT * FROM accounts WHERE balance > 100-(-5) AND owner = 'alice'"
        );
        assert!(!inline.contains("--"));

        let bound = build(
            &template,
            &named(&[
                ("delta", ClassifiedValue::Decimal("-0.50".parse().unwrap())),
                ("owner", text("alice")),
            ]),
        )
        .unwrap();
        assert!(bound.to_inline_sql().unwrap().contains("100-(-0.50) AND"));
    }

    #[test]
    fn test_inline_sql_fallback() {
        let template = QueryTemplate::sql("UPDATE t SET note = :note, qty = :qty WHERE id = :id")
            .unwrap();
        let bound = build(
            &template,
            &named(&[
                ("note", text("it's")),
                ("qty", ClassifiedValue::Null),
                ("id", ClassifiedValue::Integer(7)),
            ]),
        )
        .unwrap();
        assert_eq!(
            bound.to_inline_sql().unwrap(),
            "UPDATE t SET note = 'it''s', qty = NULL WHERE id = 7"
        );
        assert!(bound.xpath().is_none());
        assert!(bound.shell_line().is_none());
    }

    #[test]
    fn test_template_without_placeholders() {
        let template = QueryTemplate::sql("SELECT count(*) FROM t").unwrap();
        let bound = build(&template, &Bindings::new()).unwrap();
        assert!(bound.bindings().is_empty());
        assert_eq!(
            build(&template, &positional_bindings([text("x")])),
            Err(ErrorKind::PlaceholderMismatch)
        );
    }

    #[test]
    fn test_serialized_shape() {
        let template = QueryTemplate::sql("SELECT * FROM t WHERE id = $1").unwrap();
        let bound = build(&template, &positional_bindings([ClassifiedValue::Integer(5)])).unwrap();
        let json = serde_json::to_value(&bound).unwrap();
        assert_eq!(json["rendered"]["kind"], "sql");
        assert_eq!(json["rendered"]["params"][0], 5);
        assert_eq!(json["template"]["grammar"], "sql");
        assert_eq!(json["bindings"][0][0], "$1");
    }
}
