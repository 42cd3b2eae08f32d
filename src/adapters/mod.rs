pub mod buffered_body;
pub mod expression;
pub mod middleware;

/// Re-export commonly used types from adapters
pub use buffered_body::BufferedBody;
pub use expression::{LiteralResolver, PlaceholderResolver};
pub use middleware::xslt_middleware;
