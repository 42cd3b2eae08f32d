pub mod cache;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod interceptor;
pub mod policy;
pub mod secure_source;

pub use cache::{CacheStats, Fingerprint, StylesheetCache, StylesheetSource};
pub use context::RequestContext;
pub use engine::{CompiledTemplate, OutputSettings, XsltEngine};
pub use error::{CompileError, PolicyError, SecurityViolation, TransformError};
pub use executor::{TransformExecutor, TransformParameter};
pub use interceptor::{BodyInterceptor, InterceptorState, MessageHead};
pub use policy::XsltPolicy;
pub use secure_source::{SecureSource, SecureSourceBuilder};
