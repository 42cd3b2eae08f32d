//! Configuration data structures for the XSLT transformation policy.
//!
//! These types map directly to YAML (also JSON / TOML) configuration files. They are
//! serde‑friendly and include defaults so that a minimal config only needs a stylesheet.
use serde::{Deserialize, Serialize};

/// Default maximum number of body bytes buffered before the transform gives up.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

fn default_max_body_size() -> usize {
    DEFAULT_MAX_BODY_SIZE
}

fn default_indent() -> bool {
    true
}

fn default_indent_width() -> usize {
    3
}

fn default_max_entity_declarations() -> usize {
    64
}

/// Default cap on the text entity references in one document may expand to.
pub const DEFAULT_MAX_ENTITY_EXPANSION: usize = 1024 * 1024;

fn default_max_entity_expansion() -> usize {
    DEFAULT_MAX_ENTITY_EXPANSION
}

/// Which message body the policy transforms.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyScope {
    Request,
    #[default]
    Response,
}

impl std::fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PolicyScope::Request => write!(f, "request"),
            PolicyScope::Response => write!(f, "response"),
        }
    }
}

/// What happens to the message when the transformation fails.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Surface a typed error to the host pipeline, which decides the response.
    #[default]
    Propagate,
    /// Legacy behaviour: respond 500 with the error text as body and close the connection.
    Inline,
}

/// How references to external entities are treated by the secure parser.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExternalEntityPolicy {
    /// Fail the transformation with a security violation.
    #[default]
    Reject,
    /// Resolve every external entity to empty content.
    Blank,
}

/// A single stylesheet parameter as written in configuration.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ParameterConfig {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

/// Serialization options applied to the transformation output.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct OutputConfig {
    /// Pretty-print markup output
    pub indent: bool,
    /// Number of spaces per nesting level when `indent` is set
    pub indent_width: usize,
    /// Content-Type forced onto the transformed message (e.g. "application/xml")
    pub content_type: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            indent: default_indent(),
            indent_width: default_indent_width(),
            content_type: None,
        }
    }
}

/// Compiled stylesheet cache sizing.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of compiled stylesheets kept; `None` keeps everything.
    pub max_entries: Option<usize>,
}

/// Hardening options for XML parsing.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SecurityConfig {
    pub external_entities: ExternalEntityPolicy,
    pub max_entity_declarations: usize,
    /// Bytes of replacement text all entity references together may produce.
    pub max_entity_expansion: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            external_entities: ExternalEntityPolicy::Reject,
            max_entity_declarations: default_max_entity_declarations(),
            max_entity_expansion: default_max_entity_expansion(),
        }
    }
}

/// Top level policy configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct XsltPolicyConfig {
    #[serde(default)]
    pub scope: PolicyScope,
    /// Inline stylesheet text; may contain `{#...}` expressions
    #[serde(default)]
    pub stylesheet: String,
    /// Stylesheet loaded from disk by the config loader
    #[serde(default)]
    pub stylesheet_file: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterConfig>,
    #[serde(default)]
    pub failure_mode: FailureMode,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl XsltPolicyConfig {
    /// Create a new policy configuration builder
    pub fn builder() -> XsltPolicyConfigBuilder {
        XsltPolicyConfigBuilder::default()
    }
}

impl Default for XsltPolicyConfig {
    fn default() -> Self {
        Self {
            scope: PolicyScope::default(),
            stylesheet: String::new(),
            stylesheet_file: None,
            parameters: Vec::new(),
            failure_mode: FailureMode::default(),
            output: OutputConfig::default(),
            cache: CacheConfig::default(),
            security: SecurityConfig::default(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// Builder for XsltPolicyConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct XsltPolicyConfigBuilder {
    config: XsltPolicyConfig,
}

impl XsltPolicyConfigBuilder {
    /// Set the message body the policy applies to
    pub fn scope(mut self, scope: PolicyScope) -> Self {
        self.config.scope = scope;
        self
    }

    /// Set the inline stylesheet text
    pub fn stylesheet(mut self, stylesheet: impl Into<String>) -> Self {
        self.config.stylesheet = stylesheet.into();
        self
    }

    /// Append a stylesheet parameter
    pub fn parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.parameters.push(ParameterConfig {
            name: Some(name.into()),
            value: Some(value.into()),
        });
        self
    }

    /// Choose the failure policy
    pub fn failure_mode(mut self, mode: FailureMode) -> Self {
        self.config.failure_mode = mode;
        self
    }

    /// Set output serialization options
    pub fn output(mut self, output: OutputConfig) -> Self {
        self.config.output = output;
        self
    }

    /// Bound the compiled stylesheet cache
    pub fn max_cache_entries(mut self, max_entries: usize) -> Self {
        self.config.cache.max_entries = Some(max_entries);
        self
    }

    /// Set parser hardening options
    pub fn security(mut self, security: SecurityConfig) -> Self {
        self.config.security = security;
        self
    }

    /// Set the maximum buffered body size
    pub fn max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.max_body_size = max_body_size;
        self
    }

    /// Build the final XsltPolicyConfig
    pub fn build(self) -> Result<XsltPolicyConfig, String> {
        if self.config.stylesheet.trim().is_empty() && self.config.stylesheet_file.is_none() {
            return Err("stylesheet is required".to_string());
        }
        Ok(self.config)
    }
}
