use thiserror::Error;

/// Evaluation of an expression's inner text failed.
///
/// Carries the original expression text so callers (or a
/// `fallback_when_error` hook) can render the unresolved literal instead of
/// crashing the UI. Returned as a value; the evaluator never panics across
/// its boundary. Scope-resolution failures (undefined identifiers) fold into
/// this type as well.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("failed to evaluate expression `{expression}`: {reason}")]
pub struct ExpressionError {
    /// The original expression text as passed to the evaluator.
    pub expression: String,
    /// Human-readable failure description (syntax error, undefined
    /// reference, runtime failure in the expression body).
    pub reason: String,
}

impl ExpressionError {
    pub fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

pub type EvalResult = Result<crate::domain::Value, ExpressionError>;
