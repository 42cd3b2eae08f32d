use thiserror::Error;

use crate::core::context::RequestContext;

/// Error type for expression resolution
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResolveError {
    /// The expression references a source the resolver does not know
    #[error("Unknown expression: {0}")]
    UnknownExpression(String),

    /// The expression could not be parsed
    #[error("Invalid expression '{expression}': {message}")]
    InvalidExpression { expression: String, message: String },
}

/// Result type for expression resolution
pub type ResolveResult<T> = Result<T, ResolveError>;

/// ExpressionResolver defines the port (interface) turning configured
/// stylesheet and parameter templates into concrete strings
///
/// Resolution happens once per message, before the body is buffered.
pub trait ExpressionResolver: Send + Sync + 'static {
    /// Resolve `template` against the current request
    ///
    /// # Arguments
    /// * `template` - The configured text, possibly containing expressions
    /// * `context` - The request the message belongs to
    ///
    /// # Returns
    /// The resolved text or an error
    fn resolve(&self, template: &str, context: &RequestContext) -> ResolveResult<String>;
}
