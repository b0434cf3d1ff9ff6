//! Query templates and parameterized building.

mod builder;
mod template;

pub use builder::{build, positional_bindings, Bindings, BoundQuery, RenderedQuery};
pub use template::{Placeholder, PlaceholderStyle, QueryTemplate};
