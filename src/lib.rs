//! Axon XSLT - XML body transformation policy for the Axon API gateway.
//!
//! The policy rewrites request or response bodies by applying an XSLT
//! stylesheet, optionally parameterized per request, and fixes the framing
//! headers of the rewritten message.
//!
//! # Features
//! - Compiled-stylesheet cache keyed by the SHA-1 fingerprint of the stylesheet
//!   text, safe for concurrent lookups and first-time compilations, with an
//!   optional least-recently-used bound
//! - XXE-hardened parsing of both the message body and the stylesheet
//!   (external entities, external DTDs, parameter entities and nested entity
//!   expansion are refused)
//! - Dynamic stylesheet text and parameter values through `{#...}` expressions
//! - Axum middleware for request or response scope, with typed error
//!   propagation or the legacy inline 500 failure mode
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use axon_xslt::{XsltPolicy, adapters::xslt_middleware, config::loader::load_config};
//! use axum::{Router, middleware, routing::post};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = load_config("xslt.yaml").await?;
//! let policy = Arc::new(XsltPolicy::new(config)?);
//! let app: Router = Router::new()
//!     .route("/orders", post(|body: String| async move { body }))
//!     .layer(middleware::from_fn_with_state(policy, xslt_middleware));
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits for the body stream and the
//! expression resolver) from **adapters** (their implementations plus the axum
//! integration) while keeping the transformation logic inside `core`.
//!
//! # Error Handling
//! The library returns domain error types built with `thiserror`
//! ([`TransformError`] at the executor boundary, [`PolicyError`] at the
//! interceptor boundary). Configuration loading returns `eyre::Result<T>`.
//!
//! # Concurrency & Data Structures
//! The stylesheet cache is the only shared mutable state and uses
//! `scc::HashMap`. Each message gets its own interceptor.
pub mod config;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

pub use crate::{
    core::{
        CompileError, PolicyError, RequestContext, SecurityViolation, StylesheetCache,
        TransformError, TransformExecutor, TransformParameter, XsltPolicy,
    },
    ports::{body_stream::BodySink, expression::ExpressionResolver},
};
