//! Policy decision point.
//!
//! Combines classification, key checking and query building into a single
//! allow/deny decision:
//!
//! ```text
//! Start -> Classifying -> KeyChecking -> Building -> Allow
//!              |              |             |
//!              +--------------+-------------+--> Deny(reason)
//! ```
//!
//! Stages always run in this order. A value that is harmless as a string
//! can still be dangerous as a key, so key checking only ever sees values
//! that classification accepted, and building only ever sees values that
//! passed both.

use crate::constants::DEFAULT_LOG_VALUE_LENGTH;
use crate::error::{EngineError, ErrorKind};
use crate::query::{build, Bindings, BoundQuery, Placeholder, PlaceholderStyle, QueryTemplate};
use crate::security::{
    classify_field, is_safe_key, redact_for_log, ClassifiedValue, FieldSchema, Grammar,
    InjectionDetector, StatementPolicy, ValidationResult,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Final outcome of a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Allow,
    Deny,
}

/// Stage at which a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classifying,
    KeyChecking,
    Building,
    Complete,
}

/// Result of evaluating one request against an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub outcome: Outcome,
    pub query: Option<BoundQuery>,
    pub reason: Option<ErrorKind>,
    /// Declared name of the field that caused a deny. Never the value.
    pub field: Option<String>,
    pub stage: Stage,
}

/// Client-facing rendering of a deny decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DenyResponse {
    pub status: u16,
    pub error: &'static str,
}

impl PolicyDecision {
    fn allow(query: BoundQuery) -> Self {
        Self {
            outcome: Outcome::Allow,
            query: Some(query),
            reason: None,
            field: None,
            stage: Stage::Complete,
        }
    }

    fn deny(stage: Stage, reason: ErrorKind, field: Option<&str>) -> Self {
        Self {
            outcome: Outcome::Deny,
            query: None,
            reason: Some(reason),
            field: field.map(str::to_string),
            stage,
        }
    }

    /// Check if the request was allowed.
    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }

    /// Status and generic message for a denied request.
    pub fn deny_response(&self) -> Option<DenyResponse> {
        self.reason.map(|reason| DenyResponse {
            status: reason.http_status(),
            error: reason.public_message(),
        })
    }
}

/// One endpoint: declared fields plus the template they bind to.
///
/// Consistency between fields and placeholders is checked once, here, so
/// [`Endpoint::decide`] cannot fail on a developer mistake.
#[derive(Debug, Clone)]
pub struct Endpoint {
    name: String,
    schemas: Vec<FieldSchema>,
    template: QueryTemplate,
    detector: InjectionDetector,
    log_value_length: usize,
}

impl Endpoint {
    /// Declare an endpoint under the default statement policy.
    pub fn new(
        name: impl Into<String>,
        schemas: Vec<FieldSchema>,
        template: QueryTemplate,
    ) -> Result<Self, EngineError> {
        Self::with_policy(name, schemas, template, StatementPolicy::default())
    }

    /// Declare an endpoint whose SQL template must satisfy `policy`.
    ///
    /// The policy is ignored for XPath and command templates.
    pub fn with_policy(
        name: impl Into<String>,
        schemas: Vec<FieldSchema>,
        template: QueryTemplate,
        policy: StatementPolicy,
    ) -> Result<Self, EngineError> {
        check_consistency(&schemas, &template)?;

        if template.grammar() == Grammar::Sql {
            policy.check(template.text())?;
        }

        Ok(Self {
            name: name.into(),
            schemas,
            template,
            detector: InjectionDetector::new(true),
            log_value_length: DEFAULT_LOG_VALUE_LENGTH,
        })
    }

    /// Configure suspicious-value logging.
    pub fn with_value_audit(mut self, detector: InjectionDetector, log_value_length: usize) -> Self {
        self.detector = detector;
        self.log_value_length = log_value_length;
        self
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields.
    pub fn schemas(&self) -> &[FieldSchema] {
        &self.schemas
    }

    /// Declared template.
    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }

    /// Evaluate one request's untrusted fields.
    pub fn decide(&self, fields: &Map<String, Value>) -> PolicyDecision {
        Evaluation {
            endpoint: &self.name,
            schemas: &self.schemas,
            template: &self.template,
            detector: &self.detector,
            log_value_length: self.log_value_length,
        }
        .run(fields)
    }
}

/// Evaluate request fields against schemas and a template.
///
/// The pairing is checked on every call; an inconsistent pair is a
/// programmer error. Declare an [`Endpoint`] to check once at startup.
pub fn decide(
    fields: &Map<String, Value>,
    schemas: &[FieldSchema],
    template: &QueryTemplate,
) -> Result<PolicyDecision, EngineError> {
    check_consistency(schemas, template)?;

    let detector = InjectionDetector::new(true);
    Ok(Evaluation {
        endpoint: "<inline>",
        schemas,
        template,
        detector: &detector,
        log_value_length: DEFAULT_LOG_VALUE_LENGTH,
    }
    .run(fields))
}

/// Check that fields and placeholders correspond 1:1.
///
/// Named placeholders bind to the field of the same name; positional `$i`
/// binds to the i-th field.
pub fn check_consistency(
    schemas: &[FieldSchema],
    template: &QueryTemplate,
) -> Result<(), EngineError> {
    let mut seen = HashSet::new();
    for schema in schemas {
        if !seen.insert(schema.name()) {
            return Err(EngineError::schema_mismatch(format!(
                "field '{}' is declared twice",
                schema.name()
            )));
        }
    }

    let placeholders = template.placeholders();

    match template.style() {
        None if schemas.is_empty() => Ok(()),
        None => Err(EngineError::schema_mismatch(
            "template has no placeholders but fields are declared",
        )),
        Some(PlaceholderStyle::Positional) => {
            if placeholders.len() == schemas.len() {
                Ok(())
            } else {
                Err(EngineError::schema_mismatch(format!(
                    "template has {} positional placeholders but {} fields are declared",
                    placeholders.len(),
                    schemas.len()
                )))
            }
        }
        Some(PlaceholderStyle::Named) => {
            for placeholder in placeholders {
                if let Placeholder::Named(name) = placeholder {
                    if !seen.contains(name.as_str()) {
                        return Err(EngineError::schema_mismatch(format!(
                            "placeholder {} has no declared field",
                            placeholder
                        )));
                    }
                }
            }
            if placeholders.len() != schemas.len() {
                return Err(EngineError::schema_mismatch(
                    "a declared field has no placeholder in the template",
                ));
            }
            Ok(())
        }
    }
}

struct Evaluation<'a> {
    endpoint: &'a str,
    schemas: &'a [FieldSchema],
    template: &'a QueryTemplate,
    detector: &'a InjectionDetector,
    log_value_length: usize,
}

impl Evaluation<'_> {
    fn run(&self, fields: &Map<String, Value>) -> PolicyDecision {
        debug!(endpoint = self.endpoint, "Classifying {} field(s)", self.schemas.len());

        let mut accepted: Vec<(&FieldSchema, ClassifiedValue)> =
            Vec::with_capacity(self.schemas.len());

        for schema in self.schemas {
            match classify_field(fields, schema) {
                ValidationResult::Accepted(value) => {
                    self.audit_value(schema, &value);
                    accepted.push((schema, value));
                }
                ValidationResult::Rejected(reason) => {
                    return self.deny(Stage::Classifying, reason, Some(schema.name()));
                }
            }
        }

        debug!(endpoint = self.endpoint, "Checking key fields");

        for (schema, value) in &accepted {
            if schema.is_key() && !value.is_null() && !is_safe_key(&value.to_literal_text()) {
                return self.deny(Stage::KeyChecking, ErrorKind::UnsafeKey, Some(schema.name()));
            }
        }

        debug!(endpoint = self.endpoint, "Building {} query", self.template.grammar());

        let style = self.template.style();
        let bindings: Bindings = accepted
            .into_iter()
            .enumerate()
            .map(|(idx, (schema, value))| {
                let placeholder = match style {
                    Some(PlaceholderStyle::Positional) => Placeholder::Positional(idx + 1),
                    _ => Placeholder::named(schema.name()),
                };
                (placeholder, value)
            })
            .collect();

        match build(self.template, &bindings) {
            Ok(query) => {
                debug!(endpoint = self.endpoint, "Request allowed");
                PolicyDecision::allow(query)
            }
            Err(reason) => self.deny(Stage::Building, reason, None),
        }
    }

    fn deny(&self, stage: Stage, reason: ErrorKind, field: Option<&str>) -> PolicyDecision {
        warn!(
            endpoint = self.endpoint,
            field = field.unwrap_or("-"),
            reason = %reason,
            stage = ?stage,
            "Request denied"
        );
        PolicyDecision::deny(stage, reason, field)
    }

    fn audit_value(&self, schema: &FieldSchema, value: &ClassifiedValue) {
        let Some(text) = value.as_text() else {
            return;
        };
        if let Some(description) = self.detector.check_value(text) {
            warn!(
                endpoint = self.endpoint,
                field = schema.name(),
                value = %redact_for_log(text, self.log_value_length),
                "Accepted value resembles {}; bound as data",
                description
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::FieldKind;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    fn product_endpoint() -> Endpoint {
        Endpoint::new(
            "product_lookup",
            vec![FieldSchema::new("productCode", FieldKind::pattern(r"PROD\d{3}").unwrap()).unwrap()],
            QueryTemplate::sql("SELECT * FROM products WHERE code = $1").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_allow_binds_value() {
        let decision = product_endpoint().decide(&fields(json!({"productCode": "PROD001"})));
        assert!(decision.is_allowed());
        assert_eq!(decision.stage, Stage::Complete);
        let query = decision.query.unwrap();
        let (sql, params) = query.sql().unwrap();
        assert_eq!(sql, "SELECT * FROM products WHERE code = $1");
        assert_eq!(params, &[ClassifiedValue::Text("PROD001".to_string())]);
    }

    #[test]
    fn test_deny_on_classification() {
        let decision =
            product_endpoint().decide(&fields(json!({"productCode": "PROD001' OR '1'='1"})));
        assert_eq!(decision.outcome, Outcome::Deny);
        assert_eq!(decision.reason, Some(ErrorKind::PatternMismatch));
        assert_eq!(decision.field.as_deref(), Some("productCode"));
        assert_eq!(decision.stage, Stage::Classifying);
        assert!(decision.query.is_none());
    }

    #[test]
    fn test_missing_field() {
        let decision = product_endpoint().decide(&Map::new());
        assert_eq!(decision.reason, Some(ErrorKind::Missing));
    }

    #[test]
    fn test_undeclared_fields_are_ignored() {
        let decision = product_endpoint()
            .decide(&fields(json!({"productCode": "PROD002", "__proto__": {"admin": true}})));
        assert!(decision.is_allowed());
        assert_eq!(decision.query.unwrap().bindings().len(), 1);
    }

    #[test]
    fn test_key_checking_stage() {
        let endpoint = Endpoint::new(
            "preference",
            vec![FieldSchema::new("pref", FieldKind::BoundedString { max_len: 64 })
                .unwrap()
                .used_as_key()],
            QueryTemplate::sql("SELECT value FROM prefs WHERE name = :pref").unwrap(),
        )
        .unwrap();

        let decision = endpoint.decide(&fields(json!({"pref": "constructor.prototype"})));
        assert_eq!(decision.reason, Some(ErrorKind::UnsafeKey));
        assert_eq!(decision.stage, Stage::KeyChecking);

        // Classification failures win over key failures.
        let decision = endpoint.decide(&fields(json!({"pref": 7})));
        assert_eq!(decision.reason, Some(ErrorKind::InvalidType));
        assert_eq!(decision.stage, Stage::Classifying);
    }

    #[test]
    fn test_deny_response_is_generic() {
        let decision =
            product_endpoint().decide(&fields(json!({"productCode": "<script>alert(1)</script>"})));
        let response = decision.deny_response().unwrap();
        assert_eq!(response.status, 400);
        assert!(!response.error.contains("script"));

        let serialized = serde_json::to_string(&decision).unwrap();
        assert!(!serialized.contains("script"));
    }

    #[test]
    fn test_consistency_checks() {
        let email = || FieldSchema::new("sender", FieldKind::Email).unwrap();
        let named = QueryTemplate::xpath("//email[sender=:sender]").unwrap();
        let positional = QueryTemplate::sql("SELECT * FROM t WHERE a = $1 AND b = $2").unwrap();

        assert!(check_consistency(&[email()], &named).is_ok());
        assert!(check_consistency(&[], &named).is_err());
        assert!(check_consistency(&[email(), email()], &named).is_err());
        assert!(check_consistency(
            &[FieldSchema::new("other", FieldKind::Email).unwrap()],
            &named
        )
        .is_err());
        assert!(check_consistency(&[email()], &positional).is_err());
        assert!(check_consistency(
            &[email()],
            &QueryTemplate::sql("SELECT 1").unwrap()
        )
        .is_err());
    }

    #[test]
    fn test_free_decide_reports_programmer_errors() {
        let template = QueryTemplate::sql("SELECT * FROM t WHERE id = :id").unwrap();
        let result = decide(&Map::new(), &[], &template);
        assert!(matches!(result, Err(EngineError::SchemaMismatch(_))));

        let schemas = [FieldSchema::new("id", FieldKind::integer()).unwrap()];
        let decision = decide(&fields(json!({"id": "42"})), &schemas, &template).unwrap();
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_statement_policy() {
        let template = QueryTemplate::sql("DELETE FROM notes WHERE id = $1").unwrap();
        let schemas = vec![FieldSchema::new("id", FieldKind::integer()).unwrap()];

        assert!(Endpoint::new("delete_note", schemas.clone(), template.clone()).is_ok());
        assert!(Endpoint::with_policy(
            "delete_note",
            schemas,
            template,
            StatementPolicy::ReadOnly
        )
        .is_err());

        let ddl = QueryTemplate::sql("DROP TABLE notes").unwrap();
        assert!(Endpoint::new("drop", vec![], ddl.clone()).is_err());
        assert!(Endpoint::with_policy("drop", vec![], ddl, StatementPolicy::Unrestricted).is_ok());
    }
}
