//! Masked evaluation services for bound template strings.
//!
//! This module provides the evaluator that component implementations and the
//! module renderer use to resolve bound properties: template strings are
//! split into literal and expression segments, expression bodies are executed
//! against a composed scope, and every failure is contained at this boundary
//! as an [`ExpressionError`] value. A deep value mapper applies the evaluator
//! across entire property/handler trees in one pass.

use tracing::warn;

use super::errors::{EvalResult, ExpressionError};
use super::models::{Scope, Value};
use super::parser::{ExpressionInterpreter, Parser, TemplateNode, parse_template};

/// Maps the failing expression text to a substitute value instead of
/// surfacing an error.
pub type FallbackFn = fn(&str) -> Value;

/// Options controlling a single masked evaluation.
#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    /// Extra bindings merged into (or replacing) the ambient scope.
    pub scope_object: Scope,
    /// When true, `scope_object` fully replaces the ambient scope instead of
    /// extending it.
    pub override_scope: bool,
    /// When true, `$listItem`-prefixed expressions are parsed and resolved;
    /// when false they are returned as their original literal text.
    pub eval_list_item: bool,
    /// Invoked with the original expression text when evaluation fails,
    /// substituting its return value for the error.
    pub fallback_when_error: Option<FallbackFn>,
    /// Suppresses the diagnostic log entry on failure. Does not change the
    /// returned value.
    pub no_log_error: bool,
}

/// Evaluator resolving `{{ ... }}` template strings against a scope.
///
/// A string with no markers is returned unchanged. A string that is exactly
/// one marker evaluates to the native result value (boolean, number, array,
/// object). Mixed literal/expression strings evaluate each expression
/// segment, stringify the results, and concatenate. Nested markers resolve
/// inside-out: inner results splice into the outer expression's source text
/// before the outer expression is parsed.
///
/// # Examples
///
/// ```
/// use bindstate::domain::{EvalOptions, MaskedEvaluator, Scope, Value};
///
/// let mut scope = Scope::new();
/// scope.insert("value".to_string(), Value::from("Hello"));
/// let evaluator = MaskedEvaluator::new(&scope);
/// let options = EvalOptions::default();
///
/// // No markers: the string passes through unchanged.
/// assert_eq!(
///     evaluator.evaluate("value", &options).unwrap(),
///     Value::from("value")
/// );
/// // A single marker returns the native value.
/// assert_eq!(
///     evaluator.evaluate("{{ [1,2,3] }}", &options).unwrap().to_display_string(),
///     "[1,2,3]"
/// );
/// // Mixed segments concatenate.
/// assert_eq!(
///     evaluator.evaluate("{{ value }}, world!", &options).unwrap(),
///     Value::from("Hello, world!")
/// );
/// ```
pub struct MaskedEvaluator<'a> {
    /// Ambient scope, usually a snapshot of the state store.
    scope: &'a Scope,
}

impl<'a> MaskedEvaluator<'a> {
    /// Creates a new evaluator over the given ambient scope.
    pub fn new(scope: &'a Scope) -> Self {
        Self { scope }
    }

    /// Resolves a bound template string to a value.
    ///
    /// All failures (lex/parse errors, undefined references, runtime errors
    /// in the expression body) are returned as [`ExpressionError`] values
    /// carrying the original input text; nothing panics across this
    /// boundary.
    pub fn evaluate(&self, input: &str, options: &EvalOptions) -> EvalResult {
        if !input.contains("{{") {
            return Ok(Value::String(input.to_string()));
        }

        let scope = self.compose_scope(options);
        let nodes = parse_template(input, options.eval_list_item);

        match eval_nodes(&nodes, &scope) {
            Ok(value) => Ok(value),
            Err(reason) => {
                if !options.no_log_error {
                    warn!(expression = input, %reason, "expression evaluation failed");
                }
                if let Some(fallback) = options.fallback_when_error {
                    return Ok(fallback(input));
                }
                Err(ExpressionError::new(input, reason))
            }
        }
    }

    /// Resolves every string leaf of a nested plain-data structure.
    ///
    /// A leaf whose evaluation fails keeps its original text so a component
    /// renders the unresolved literal instead of crashing; the failure is
    /// still logged (or recovered by `fallback_when_error`) per leaf.
    pub fn evaluate_deep(&self, root: &Value, options: &EvalOptions) -> Value {
        map_values_deep(root, &mut |leaf, _path| match leaf {
            Value::String(s) => self
                .evaluate(s, options)
                .unwrap_or_else(|_| leaf.clone()),
            other => other.clone(),
        })
    }

    /// Like [`evaluate_deep`](Self::evaluate_deep), but only evaluates string
    /// leaves that plausibly reference a binding in `options.scope_object`: a
    /// string with no `{{` or no scope-key substring passes through
    /// untouched.
    pub fn evaluate_deep_scoped(&self, root: &Value, options: &EvalOptions) -> Value {
        map_values_deep(root, &mut |leaf, _path| match leaf {
            Value::String(s) if references_scope(s, &options.scope_object) => self
                .evaluate(s, options)
                .unwrap_or_else(|_| leaf.clone()),
            other => other.clone(),
        })
    }

    fn compose_scope(&self, options: &EvalOptions) -> Scope {
        if options.override_scope {
            return options.scope_object.clone();
        }
        let mut scope = self.scope.clone();
        scope.extend(
            options
                .scope_object
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        scope
    }
}

/// True when `input` contains an expression marker and mentions at least one
/// key of `scope` — the pre-check used before deep-evaluating module
/// templates and state maps.
pub fn references_scope(input: &str, scope: &Scope) -> bool {
    input.contains("{{") && scope.keys().any(|key| input.contains(key.as_str()))
}

fn eval_nodes(nodes: &[TemplateNode], scope: &Scope) -> Result<Value, String> {
    // A single segment keeps its native type: one opaque literal stays a
    // string, one expression returns whatever it evaluates to.
    if let [node] = nodes {
        return match node {
            TemplateNode::Literal(s) => Ok(Value::String(s.clone())),
            TemplateNode::Expression(body) => eval_expression_body(body, scope),
        };
    }

    let mut out = String::new();
    for node in nodes {
        match node {
            TemplateNode::Literal(s) => out.push_str(s),
            TemplateNode::Expression(body) => {
                out.push_str(&eval_expression_body(body, scope)?.to_display_string());
            }
        }
    }
    Ok(Value::String(out))
}

/// Evaluates one expression body, resolving nested markers inside-out and
/// splicing their stringified results into the outer source text.
fn eval_expression_body(body: &[TemplateNode], scope: &Scope) -> Result<Value, String> {
    let mut source = String::new();
    for node in body {
        match node {
            TemplateNode::Literal(s) => source.push_str(s),
            TemplateNode::Expression(inner) => {
                source.push_str(&eval_expression_body(inner, scope)?.to_display_string());
            }
        }
    }

    // `{{}}` and nested-empty bodies evaluate to undefined.
    if source.trim().is_empty() {
        return Ok(Value::Undefined);
    }

    let mut parser = Parser::new(&source)?;
    let ast = parser.parse()?;
    ExpressionInterpreter::new(scope).evaluate(&ast)
}

/// One step of a path into a nested value.
#[derive(Debug, Clone, PartialEq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Structurally clones `root`, recursing into arrays and objects and
/// replacing every non-container leaf with the visitor's return value. The
/// visitor receives the leaf and its path from the root.
pub fn map_values_deep<F>(root: &Value, visit: &mut F) -> Value
where
    F: FnMut(&Value, &[PathSegment]) -> Value,
{
    let mut path = Vec::new();
    map_values_deep_at(root, visit, &mut path)
}

fn map_values_deep_at<F>(value: &Value, visit: &mut F, path: &mut Vec<PathSegment>) -> Value
where
    F: FnMut(&Value, &[PathSegment]) -> Value,
{
    match value {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    path.push(PathSegment::Index(index));
                    let mapped = map_values_deep_at(item, visit, path);
                    path.pop();
                    mapped
                })
                .collect(),
        ),
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, field)| {
                    path.push(PathSegment::Key(key.clone()));
                    let mapped = map_values_deep_at(field, visit, path);
                    path.pop();
                    (key.clone(), mapped)
                })
                .collect(),
        ),
        leaf => visit(leaf, path),
    }
}
