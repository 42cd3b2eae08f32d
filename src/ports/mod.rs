pub mod body_stream;
pub mod expression;

pub use body_stream::{BodySink, BodySinkError, BodySinkResult};
pub use expression::{ExpressionResolver, ResolveError};
