//! # query-guard
//!
//! Safe query construction for untrusted input.
//!
//! Every request field is declared with an expected shape. A request is
//! classified field by field, fields used as property keys are screened,
//! and only then are the values bound into a developer-authored template:
//!
//! - **SQL**: values go to driver parameters, never into the text
//! - **XPath**: values are inlined as grammar-typed literals
//! - **Commands**: values become whole arguments of an argv vector
//!
//! ## Architecture
//!
//! - [`security`]: classifier, key guard, literal escaping, template auditing
//! - [`query`]: templates and parameterized building
//! - [`policy`]: allow/deny decisions per endpoint
//! - [`catalog`]: endpoint declarations loaded from JSON
//! - [`store`]: record store keyed by screened names
//!
//! ```
//! use query_guard::{Endpoint, FieldKind, FieldSchema, QueryTemplate};
//! use serde_json::json;
//!
//! let endpoint = Endpoint::new(
//!     "product_lookup",
//!     vec![FieldSchema::new("productCode", FieldKind::pattern(r"PROD\d{3}").unwrap()).unwrap()],
//!     QueryTemplate::sql("SELECT * FROM products WHERE code = $1").unwrap(),
//! )
//! .unwrap();
//!
//! let request = json!({"productCode": "PROD001' OR '1'='1"});
//! let decision = endpoint.decide(request.as_object().unwrap());
//! assert!(!decision.is_allowed());
//! ```

pub mod catalog;
pub mod config;
pub mod constants;
pub mod error;
pub mod policy;
pub mod query;
pub mod security;
pub mod store;

pub use catalog::Catalog;
pub use config::Config;
pub use error::{EngineError, ErrorKind};
pub use policy::{decide, Endpoint, Outcome, PolicyDecision};
pub use query::{build, BoundQuery, Placeholder, QueryTemplate};
pub use security::{
    classify, escape_literal, is_safe_key, ClassifiedValue, FieldKind, FieldSchema, Grammar,
    SafeLiteral, ValidationResult,
};
pub use store::RecordStore;
