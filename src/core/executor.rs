//! Stylesheet execution against a fully buffered message body.
use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;

use crate::{
    config::{ParameterConfig, XsltPolicyConfig},
    core::{
        cache::{CacheStats, StylesheetCache},
        engine::{OutputSettings, XsltEngine},
        error::TransformError,
        secure_source::SecureSourceBuilder,
    },
};

/// A named value bound to a top-level stylesheet parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformParameter {
    pub name: Option<String>,
    pub value: Option<String>,
}

impl TransformParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            value: Some(value.into()),
        }
    }

    /// The trimmed name, or `None` when the parameter must be skipped.
    pub fn binding_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

impl From<&ParameterConfig> for TransformParameter {
    fn from(config: &ParameterConfig) -> Self {
        Self {
            name: config.name.clone(),
            value: config.value.clone(),
        }
    }
}

/// Collapse parameters into bindings: blank names are skipped, a missing
/// value binds the empty string and the last occurrence of a name wins.
pub fn normalize_parameters(parameters: &[TransformParameter]) -> Vec<(String, String)> {
    let mut bindings = BTreeMap::new();
    for parameter in parameters {
        if let Some(name) = parameter.binding_name() {
            bindings.insert(
                name.to_string(),
                parameter.value.clone().unwrap_or_default(),
            );
        }
    }
    bindings.into_iter().collect()
}

/// Applies stylesheets to message bodies, compiling through a shared cache.
#[derive(Debug, Clone)]
pub struct TransformExecutor {
    cache: Arc<StylesheetCache>,
}

impl TransformExecutor {
    pub fn new(cache: Arc<StylesheetCache>) -> Self {
        Self { cache }
    }

    /// Executor with its own cache, configured from a policy definition.
    pub fn from_config(config: &XsltPolicyConfig) -> Self {
        let engine = XsltEngine::new(
            SecureSourceBuilder::new(&config.security),
            OutputSettings::from(&config.output),
        );
        Self::new(Arc::new(StylesheetCache::with_capacity(
            engine,
            config.cache.max_entries,
        )))
    }

    pub fn cache(&self) -> &StylesheetCache {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Transform `input` with `stylesheet` and return the serialized result.
    ///
    /// The whole body must be present; the result is complete or an error, never partial.
    pub fn apply(
        &self,
        stylesheet: &str,
        parameters: &[TransformParameter],
        input: &[u8],
    ) -> Result<Bytes, TransformError> {
        let template = self.cache.get_or_compile(stylesheet)?;
        tracing::Span::current().record(
            "xslt.stylesheet",
            tracing::field::display(template.fingerprint()),
        );
        let bindings = normalize_parameters(parameters);
        let input =
            std::str::from_utf8(input).map_err(|e| TransformError::Encoding(e.to_string()))?;

        match self.cache.transform(&template, &bindings, input) {
            Ok(output) => {
                tracing::debug!(
                    fingerprint = %template.fingerprint(),
                    input_bytes = input.len(),
                    output_bytes = output.len(),
                    "Applied stylesheet"
                );
                Ok(Bytes::from(output))
            }
            Err(e) => {
                tracing::warn!(
                    fingerprint = %template.fingerprint(),
                    error = %e,
                    "An error occurred while executing XSLT transformation"
                );
                Err(e)
            }
        }
    }
}
