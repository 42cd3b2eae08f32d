use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::XsltPolicyConfig;

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<XsltPolicyConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously.
///
/// A `stylesheet_file` entry is read into `stylesheet`; relative paths are
/// resolved against the directory of the configuration file.
pub fn load_config_sync(config_path: &str) -> Result<XsltPolicyConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        _ => FileFormat::Yaml, // Default to YAML
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let mut policy_config: XsltPolicyConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    if let Some(stylesheet_file) = &policy_config.stylesheet_file {
        let stylesheet_path = match config_path.parent() {
            Some(dir) if Path::new(stylesheet_file).is_relative() => dir.join(stylesheet_file),
            _ => Path::new(stylesheet_file).to_path_buf(),
        };
        if !policy_config.stylesheet.trim().is_empty() {
            eyre::bail!(
                "{}: 'stylesheet' and 'stylesheet_file' are mutually exclusive",
                config_path.display()
            );
        }
        policy_config.stylesheet = std::fs::read_to_string(&stylesheet_path)
            .with_context(|| format!("Failed to read stylesheet {}", stylesheet_path.display()))?;
    }

    Ok(policy_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;
    use crate::config::models::{FailureMode, PolicyScope};

    #[tokio::test]
    async fn test_load_yaml_config() {
        let yaml_content = r#"
scope: request
failure_mode: inline
stylesheet: |
  <xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"/>
parameters:
  - name: "region"
    value: "eu"
cache:
  max_entries: 16
"#;

        let mut temp_file = NamedTempFile::with_suffix(".yaml").unwrap();
        write!(temp_file, "{}", yaml_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.scope, PolicyScope::Request);
        assert_eq!(config.failure_mode, FailureMode::Inline);
        assert_eq!(config.parameters.len(), 1);
        assert_eq!(config.cache.max_entries, Some(16));
        assert!(config.stylesheet.contains("xsl:stylesheet"));
    }

    #[tokio::test]
    async fn test_load_json_config() {
        let json_content = r#"
{
  "stylesheet": "<xsl:stylesheet version=\"1.0\" xmlns:xsl=\"http://www.w3.org/1999/XSL/Transform\"/>",
  "output": { "indent": false, "content_type": "application/xml" }
}
"#;

        let mut temp_file = NamedTempFile::with_suffix(".json").unwrap();
        write!(temp_file, "{}", json_content).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(config.scope, PolicyScope::Response);
        assert!(!config.output.indent);
        assert_eq!(config.output.content_type.as_deref(), Some("application/xml"));
    }

    #[test]
    fn test_stylesheet_file_is_resolved_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.xsl"), "<xsl:stylesheet/>").unwrap();
        let config_path = dir.path().join("policy.yaml");
        std::fs::write(&config_path, "stylesheet_file: style.xsl\n").unwrap();

        let config = load_config_sync(config_path.to_str().unwrap()).unwrap();
        assert_eq!(config.stylesheet, "<xsl:stylesheet/>");
    }

    #[test]
    fn test_inline_and_file_stylesheet_conflict() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("style.xsl"), "<xsl:stylesheet/>").unwrap();
        let config_path = dir.path().join("policy.yaml");
        std::fs::write(
            &config_path,
            "stylesheet: \"<xsl:stylesheet/>\"\nstylesheet_file: style.xsl\n",
        )
        .unwrap();

        assert!(load_config_sync(config_path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_missing_stylesheet_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("policy.yaml");
        std::fs::write(&config_path, "stylesheet_file: missing.xsl\n").unwrap();

        assert!(load_config_sync(config_path.to_str().unwrap()).is_err());
    }
}
