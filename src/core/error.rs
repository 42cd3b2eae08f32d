//! Error taxonomy for the XSLT transformation pipeline.
//!
//! Every failure inside the pipeline is expressed as a value: the cache yields
//! [`CompileError`], the secure source builder yields [`SecurityViolation`],
//! and the executor normalizes all of them into a single [`TransformError`]
//! carrying a human readable cause. The interceptor wraps that again into
//! [`PolicyError`] which also knows how to render itself as an HTTP response.
use axum::response::{IntoResponse, Response as AxumResponse};
use http::StatusCode;
use thiserror::Error;

/// A construct in an XML document that the secure parser refuses to process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityViolation {
    #[error("external entity '{name}' is not allowed")]
    ExternalEntity { name: String },

    #[error("external DTD subset is not allowed")]
    ExternalDtd,

    #[error("parameter entity '{name}' is not allowed")]
    ParameterEntity { name: String },

    #[error("entity '{name}' references another entity")]
    NestedEntityExpansion { name: String },

    #[error("entity references expand to {size} bytes, limit is {limit}")]
    ExcessiveExpansion { size: usize, limit: usize },

    #[error("document declares {count} entities, limit is {limit}")]
    TooManyEntities { count: usize, limit: usize },

    #[error("access to external resource '{0}' is disabled")]
    ExternalResource(String),
}

impl SecurityViolation {
    /// Short machine readable tag used in logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityViolation::ExternalEntity { .. } => "external_entity",
            SecurityViolation::ExternalDtd => "external_dtd",
            SecurityViolation::ParameterEntity { .. } => "parameter_entity",
            SecurityViolation::NestedEntityExpansion { .. } => "nested_entity_expansion",
            SecurityViolation::ExcessiveExpansion { .. } => "excessive_entity_expansion",
            SecurityViolation::TooManyEntities { .. } => "too_many_entities",
            SecurityViolation::ExternalResource(_) => "external_resource",
        }
    }
}

/// Stylesheet text could not be turned into a compiled template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("malformed stylesheet: {0}")]
    Malformed(String),

    #[error("document root '{0}' is not an XSLT stylesheet")]
    NotAStylesheet(String),

    #[error("stylesheet rejected: {0}")]
    Rejected(#[from] SecurityViolation),
}

/// The single error type returned at the transform executor boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("stylesheet compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("security violation: {0}")]
    Security(#[from] SecurityViolation),

    #[error("input is not valid UTF-8: {0}")]
    Encoding(String),

    #[error("malformed input document: {0}")]
    MalformedInput(String),

    #[error("transformation failed: {0}")]
    Execution(String),

    #[error("failed to serialize transformation result: {0}")]
    Serialization(String),

    #[error("failed to resolve stylesheet: {0}")]
    Resolve(String),
}

impl TransformError {
    /// Short machine readable tag used in logs and error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            TransformError::Compile(_) => "stylesheet_compile_error",
            TransformError::Security(_) => "security_violation",
            TransformError::Encoding(_) | TransformError::MalformedInput(_) => "malformed_input",
            TransformError::Execution(_) => "transformation_error",
            TransformError::Serialization(_) => "serialization_error",
            TransformError::Resolve(_) => "stylesheet_resolution_error",
        }
    }

    /// Whether the failure was caused by a blocked construct, either in the
    /// input document or in the stylesheet.
    pub fn is_security_violation(&self) -> bool {
        matches!(
            self,
            TransformError::Security(_) | TransformError::Compile(CompileError::Rejected(_))
        )
    }
}

/// Failure surfaced by the body interceptor to the host pipeline.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error("body exceeds maximum size of {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("body stream already finished")]
    StreamClosed,

    #[error("failed to read body: {0}")]
    BodyRead(String),

    #[error("downstream body sink failed: {0}")]
    Downstream(String),
}

impl PolicyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PolicyError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            PolicyError::BodyRead(_) => StatusCode::BAD_REQUEST,
            PolicyError::Transform(_) | PolicyError::StreamClosed | PolicyError::Downstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            PolicyError::Transform(e) => e.code(),
            PolicyError::BodyTooLarge { .. } => "payload_too_large",
            PolicyError::StreamClosed => "stream_closed",
            PolicyError::BodyRead(_) => "body_read_error",
            PolicyError::Downstream(_) => "downstream_error",
        }
    }
}

impl IntoResponse for PolicyError {
    fn into_response(self) -> AxumResponse {
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status_code(), axum::Json(body)).into_response()
    }
}
