//! Core expression engine: values, template/expression parsing, and the
//! masked evaluator. No knowledge of the state store or module lifecycle
//! lives here.

pub mod errors;
pub mod models;
pub mod parser;
pub mod services;

pub use errors::{EvalResult, ExpressionError};
pub use models::{Scope, Value};
pub use parser::{LIST_ITEM_PREFIX, TemplateNode, parse_template};
pub use services::{
    EvalOptions, FallbackFn, MaskedEvaluator, PathSegment, map_values_deep, references_scope,
};
