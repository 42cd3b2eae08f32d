use bytes::Bytes;
use thiserror::Error;

/// Error type for body sink operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BodySinkError {
    /// The sink was already ended
    #[error("Body sink is closed")]
    Closed,

    /// The downstream consumer failed
    #[error("Downstream error: {0}")]
    Downstream(String),
}

/// Result type for body sink operations
pub type BodySinkResult<T> = Result<T, BodySinkError>;

/// BodySink defines the port (interface) receiving a message body chunk by chunk
///
/// The host pipeline provides the sink; the body interceptor forwards either the
/// untouched chunks (pass-through) or the single transformed body to it.
pub trait BodySink: Send {
    /// Deliver the next body chunk
    fn write(&mut self, chunk: Bytes) -> BodySinkResult<()>;

    /// Signal that the body is complete; no further writes follow
    fn end(&mut self) -> BodySinkResult<()>;
}
