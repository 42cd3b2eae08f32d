use http::HeaderValue;

use crate::config::models::{
    CacheConfig, OutputConfig, ParameterConfig, SecurityConfig, XsltPolicyConfig,
};

/// Upper bound for `output.indent_width`.
const MAX_INDENT_WIDTH: usize = 16;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Policy configuration validator
pub struct XsltPolicyConfigValidator;

impl XsltPolicyConfigValidator {
    /// Validate the entire policy configuration
    pub fn validate(config: &XsltPolicyConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if config.stylesheet.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "stylesheet".to_string(),
            });
        }

        if config.max_body_size == 0 {
            errors.push(ValidationError::InvalidField {
                field: "max_body_size".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Err(mut output_errors) = Self::validate_output(&config.output) {
            errors.append(&mut output_errors);
        }
        if let Err(e) = Self::validate_cache(&config.cache) {
            errors.push(e);
        }
        if let Err(e) = Self::validate_security(&config.security) {
            errors.push(e);
        }

        for warning in Self::parameter_warnings(&config.parameters) {
            tracing::warn!("{}", warning);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_output(output: &OutputConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if output.indent_width > MAX_INDENT_WIDTH {
            errors.push(ValidationError::InvalidField {
                field: "output.indent_width".to_string(),
                message: format!("Must be at most {MAX_INDENT_WIDTH}"),
            });
        }

        if let Some(content_type) = &output.content_type {
            if content_type.trim().is_empty() {
                errors.push(ValidationError::InvalidField {
                    field: "output.content_type".to_string(),
                    message: "Must not be blank".to_string(),
                });
            } else if HeaderValue::from_str(content_type).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: "output.content_type".to_string(),
                    message: format!("'{content_type}' is not a valid header value"),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_cache(cache: &CacheConfig) -> ValidationResult<()> {
        if cache.max_entries == Some(0) {
            return Err(ValidationError::InvalidField {
                field: "cache.max_entries".to_string(),
                message: "Must be greater than 0 (omit it for an unbounded cache)".to_string(),
            });
        }
        Ok(())
    }

    fn validate_security(security: &SecurityConfig) -> ValidationResult<()> {
        if security.max_entity_declarations == 0 {
            return Err(ValidationError::InvalidField {
                field: "security.max_entity_declarations".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if security.max_entity_expansion == 0 {
            return Err(ValidationError::InvalidField {
                field: "security.max_entity_expansion".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Parameters with blank names are skipped at runtime, so they only warrant a warning.
    fn parameter_warnings(parameters: &[ParameterConfig]) -> Vec<String> {
        let mut warnings = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for (i, parameter) in parameters.iter().enumerate() {
            match parameter.name.as_deref().map(str::trim) {
                None | Some("") => {
                    warnings.push(format!("Parameter {} has a blank name and is ignored", i + 1))
                }
                Some(name) => {
                    if !seen.insert(name.to_string()) {
                        warnings.push(format!(
                            "Parameter '{name}' is defined more than once; the last value wins"
                        ));
                    }
                }
            }
        }
        warnings
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
