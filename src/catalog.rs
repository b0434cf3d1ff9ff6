//! Endpoint catalog loaded from JSON.
//!
//! A catalog declares every endpoint the process serves. It is validated
//! once, at load: bad regexes, malformed templates and field/placeholder
//! mismatches all fail here rather than on a request.
//!
//! ```json
//! {
//!   "endpoints": [
//!     {
//!       "name": "product_lookup",
//!       "grammar": "sql",
//!       "template": "SELECT * FROM products WHERE code = $1",
//!       "fields": [
//!         { "name": "productCode", "kind": { "type": "pattern", "pattern": "PROD\\d{3}" } }
//!       ]
//!     }
//!   ]
//! }
//! ```

use crate::config::Config;
use crate::error::EngineError;
use crate::policy::Endpoint;
use crate::query::QueryTemplate;
use crate::security::{FieldKind, FieldPattern, FieldSchema, Grammar, StatementPolicy};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CatalogDocument {
    endpoints: Vec<EndpointSpec>,
}

/// One endpoint as written in the catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    pub name: String,
    pub grammar: String,
    pub template: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub statement_policy: StatementPolicy,
}

/// One field as written in the catalog.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldSpec {
    pub name: String,
    pub kind: KindSpec,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub used_as_key: bool,
}

/// Field kind as written in the catalog, tagged by `type`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KindSpec {
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    BoundedString {
        #[serde(default)]
        max_len: Option<usize>,
    },
    Enum {
        allowed: Vec<String>,
        #[serde(default = "default_true")]
        case_sensitive: bool,
    },
    Pattern {
        pattern: String,
    },
    Email,
    SafeKey,
    Currency,
}

fn default_true() -> bool {
    true
}

impl KindSpec {
    fn into_kind(self, field: &str, config: &Config) -> Result<FieldKind, EngineError> {
        Ok(match self {
            KindSpec::Integer { min, max } => FieldKind::Integer { min, max },
            KindSpec::BoundedString { max_len } => FieldKind::BoundedString {
                max_len: max_len.unwrap_or(config.max_string_length),
            },
            KindSpec::Enum {
                allowed,
                case_sensitive,
            } => FieldKind::Enum {
                allowed,
                case_sensitive,
            },
            KindSpec::Pattern { pattern } => FieldPattern::new(&pattern)
                .map(FieldKind::Pattern)
                .map_err(|e| EngineError::invalid_schema(field, format!("invalid pattern: {}", e)))?,
            KindSpec::Email => FieldKind::Email,
            KindSpec::SafeKey => FieldKind::SafeKey,
            KindSpec::Currency => FieldKind::Currency,
        })
    }
}

impl FieldSpec {
    fn into_schema(self, config: &Config) -> Result<FieldSchema, EngineError> {
        let kind = self.kind.into_kind(&self.name, config)?;
        let mut schema = FieldSchema::new(self.name, kind)?;
        if !self.required {
            schema = schema.optional();
        }
        if self.used_as_key {
            schema = schema.used_as_key();
        }
        Ok(schema)
    }
}

impl EndpointSpec {
    fn into_endpoint(self, config: &Config) -> Result<Endpoint, EngineError> {
        let grammar: Grammar = self.grammar.parse()?;
        let template = QueryTemplate::new(grammar, self.template)?;

        let schemas = self
            .fields
            .into_iter()
            .map(|f| f.into_schema(config))
            .collect::<Result<Vec<_>, _>>()?;

        let endpoint = Endpoint::with_policy(self.name, schemas, template, self.statement_policy)?;
        Ok(endpoint.with_value_audit(config.injection_detector(), config.log_value_length))
    }
}

/// Validated set of endpoints.
#[derive(Debug, Clone)]
pub struct Catalog {
    endpoints: Vec<Endpoint>,
}

impl Catalog {
    /// Parse and validate a catalog document.
    pub fn from_json(text: &str, config: &Config) -> Result<Self, EngineError> {
        let document: CatalogDocument = serde_json::from_str(text)?;
        Self::from_specs(document.endpoints, config)
    }

    /// Read, parse and validate a catalog file.
    pub fn load(path: impl AsRef<Path>, config: &Config) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let catalog = Self::from_json(&text, config)?;
        info!(
            "Loaded {} endpoint(s) from {}",
            catalog.len(),
            path.display()
        );
        Ok(catalog)
    }

    /// Validate endpoint declarations.
    pub fn from_specs(specs: Vec<EndpointSpec>, config: &Config) -> Result<Self, EngineError> {
        let mut names = HashSet::new();
        let mut endpoints = Vec::with_capacity(specs.len());

        for spec in specs {
            if spec.name.trim().is_empty() {
                return Err(EngineError::catalog("endpoint name cannot be empty"));
            }
            if !names.insert(spec.name.clone()) {
                return Err(EngineError::catalog(format!(
                    "endpoint '{}' is declared twice",
                    spec.name
                )));
            }

            let name = spec.name.clone();
            let endpoint = spec.into_endpoint(config).map_err(|e| match e {
                EngineError::Json(_) | EngineError::Io(_) => e,
                other => EngineError::catalog(format!("endpoint '{}': {}", name, other)),
            })?;
            endpoints.push(endpoint);
        }

        Ok(Self { endpoints })
    }

    /// Look up an endpoint by name.
    pub fn get(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.name() == name)
    }

    /// Endpoint names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(Endpoint::name)
    }

    /// Iterate over endpoints.
    pub fn iter(&self) -> std::slice::Iter<'_, Endpoint> {
        self.endpoints.iter()
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Check if the catalog declares no endpoints.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
