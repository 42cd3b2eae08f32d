//! A loaded XSLT policy.
//!
//! Holds everything that lives from policy load to unload: the validated
//! configuration, the stylesheet cache (through the executor) and the
//! expression resolver. Per-message work goes through [`XsltPolicy::intercept`].
use std::sync::Arc;

use bytes::Bytes;
use http::HeaderValue;

use crate::{
    adapters::expression::PlaceholderResolver,
    config::{FailureMode, PolicyScope, ValidationError, XsltPolicyConfig, XsltPolicyConfigValidator},
    core::{
        context::RequestContext,
        error::TransformError,
        executor::{TransformExecutor, TransformParameter},
        interceptor::BodyInterceptor,
    },
    ports::{body_stream::BodySink, expression::ExpressionResolver},
};

pub struct XsltPolicy {
    config: XsltPolicyConfig,
    executor: TransformExecutor,
    resolver: Arc<dyn ExpressionResolver>,
    content_type: Option<HeaderValue>,
}

impl XsltPolicy {
    /// Validate `config` and create the policy with a fresh stylesheet cache.
    pub fn new(config: XsltPolicyConfig) -> Result<Self, ValidationError> {
        XsltPolicyConfigValidator::validate(&config)?;

        let content_type = config
            .output
            .content_type
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|e| ValidationError::InvalidField {
                field: "output.content_type".to_string(),
                message: e.to_string(),
            })?;

        tracing::info!(
            scope = %config.scope,
            failure_mode = ?config.failure_mode,
            parameters = config.parameters.len(),
            max_cache_entries = ?config.cache.max_entries,
            "Loaded XSLT policy"
        );

        Ok(Self {
            executor: TransformExecutor::from_config(&config),
            resolver: Arc::new(PlaceholderResolver),
            content_type,
            config,
        })
    }

    /// Replace the expression resolver.
    pub fn with_resolver(mut self, resolver: impl ExpressionResolver) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    pub fn config(&self) -> &XsltPolicyConfig {
        &self.config
    }

    pub fn executor(&self) -> &TransformExecutor {
        &self.executor
    }

    pub fn scope(&self) -> PolicyScope {
        self.config.scope
    }

    pub fn applies_to(&self, phase: PolicyScope) -> bool {
        self.config.scope == phase
    }

    pub fn failure_mode(&self) -> FailureMode {
        self.config.failure_mode
    }

    pub fn max_body_size(&self) -> usize {
        self.config.max_body_size
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    /// The concrete stylesheet text for this request.
    pub fn resolve_stylesheet(&self, context: &RequestContext) -> Result<String, TransformError> {
        self.resolver
            .resolve(&self.config.stylesheet, context)
            .map_err(|e| TransformError::Resolve(e.to_string()))
    }

    /// Configured parameters with their values resolved for this request.
    pub fn parameters(
        &self,
        context: &RequestContext,
    ) -> Result<Vec<TransformParameter>, TransformError> {
        self.config
            .parameters
            .iter()
            .map(|configured| {
                let mut parameter = TransformParameter::from(configured);
                if let Some(value) = &parameter.value {
                    parameter.value = Some(
                        self.resolver
                            .resolve(value, context)
                            .map_err(|e| TransformError::Resolve(e.to_string()))?,
                    );
                }
                Ok(parameter)
            })
            .collect()
    }

    /// Resolve the stylesheet and parameters, then transform `body`.
    pub fn transform(&self, context: &RequestContext, body: &[u8]) -> Result<Bytes, TransformError> {
        let stylesheet = self.resolve_stylesheet(context)?;
        let parameters = self.parameters(context)?;
        self.executor.apply(&stylesheet, &parameters, body)
    }

    /// Start intercepting the body of a message in `phase`.
    pub fn intercept<S: BodySink>(
        self: &Arc<Self>,
        phase: PolicyScope,
        context: RequestContext,
        sink: S,
    ) -> BodyInterceptor<S> {
        BodyInterceptor::new(self.clone(), phase, context, sink)
    }
}

impl std::fmt::Debug for XsltPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XsltPolicy")
            .field("scope", &self.config.scope)
            .field("failure_mode", &self.config.failure_mode)
            .field("cache", self.executor.cache())
            .finish()
    }
}
