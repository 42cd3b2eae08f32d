use std::{io::Write, path::Path, sync::Arc};

use axon_xslt::{
    RequestContext, XsltPolicy,
    adapters::BufferedBody,
    config::{XsltPolicyConfigValidator, loader::load_config},
    core::{InterceptorState, MessageHead},
    tracing_setup,
};
use bytes::Bytes;
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Commands,

    /// Log filter, e.g. `info` or `axon_xslt=debug`
    #[clap(long, global = true, default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON
    #[clap(long, global = true)]
    json_logs: bool,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a policy configuration file
    Validate {
        /// Configuration file to validate
        #[clap(short, long, default_value = "xslt.yaml")]
        config: String,
    },
    /// Initialize a new policy configuration file
    Init {
        /// Output path for the new config file
        #[clap(short, long, default_value = "xslt.yaml")]
        config: String,
    },
    /// Apply the configured stylesheet to an XML file
    Apply {
        /// Configuration file to use
        #[clap(short, long, default_value = "xslt.yaml")]
        config: String,
        /// XML document to transform
        #[clap(short, long)]
        input: String,
        /// Write the result here instead of stdout
        #[clap(short, long)]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    tracing_setup::init_tracing_with_config(&args.log_level, args.json_logs, args.json_logs)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    match args.command {
        Commands::Validate { config } => validate_config_command(&config).await,
        Commands::Init { config } => init_config_command(&config).await,
        Commands::Apply {
            config,
            input,
            output,
        } => apply_command(&config, &input, output.as_deref()).await,
    }
}

/// Validate a configuration file
async fn validate_config_command(config_path: &str) -> Result<()> {
    println!("🔍 Validating configuration file: {config_path}");

    if !Path::new(config_path).exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' not found");
        std::process::exit(1);
    }

    let config = match load_config(config_path).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    if let Err(e) = XsltPolicyConfigValidator::validate(&config) {
        eprintln!("❌ Configuration validation failed:");
        eprintln!("{e}");
        std::process::exit(1);
    }
    println!("✅ Configuration validation: OK");

    // Compile once so stylesheet errors surface here rather than on the first message
    let policy = XsltPolicy::new(config)?;
    let stylesheet = policy.resolve_stylesheet(&RequestContext::default())?;
    if let Err(e) = policy.executor().cache().get_or_compile(&stylesheet) {
        eprintln!("❌ Stylesheet compilation failed:");
        eprintln!("   {e}");
        std::process::exit(1);
    }
    println!("✅ Stylesheet compilation: OK");

    let config = policy.config();
    println!();
    println!("📋 Configuration Summary:");
    println!("   • Scope: {}", config.scope);
    println!("   • Failure Mode: {:?}", config.failure_mode);
    println!("   • Parameters: {}", config.parameters.len());
    println!(
        "   • Cache: {}",
        config
            .cache
            .max_entries
            .map_or("unbounded".to_string(), |n| format!("{n} entries"))
    );
    println!("   • External Entities: {:?}", config.security.external_entities);
    println!();
    println!("🎉 Configuration is valid and ready to use!");
    Ok(())
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Axon XSLT transformation policy

# Which body to transform: request | response
scope: response

# propagate: hand a typed error to the gateway (default)
# inline: legacy mode, answer 500 with the error text and close the connection
failure_mode: propagate

stylesheet: |
  <xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
    <xsl:param name="region" select="'unknown'"/>
    <xsl:template match="/">
      <out region="{$region}"><xsl:value-of select="/root/name"/></out>
    </xsl:template>
  </xsl:stylesheet>

# Or keep the stylesheet in its own file (relative to this config)
# stylesheet_file: transform.xsl

parameters:
  - name: region
    value: "{#request.headers['x-region']}"

output:
  indent: true
  indent_width: 3
  content_type: application/xml

cache:
  # Omit for an unbounded cache
  max_entries: 256

security:
  # reject | blank
  external_entities: reject
  max_entity_declarations: 64
  # Bytes all entity references in one document may expand to
  max_entity_expansion: 1048576

max_body_size: 10485760
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    println!("   Run 'axon-xslt apply --config {config_path} --input <file.xml>' to try it");
    Ok(())
}

/// Run one transformation outside the gateway
async fn apply_command(config_path: &str, input_path: &str, output_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)
        .await
        .with_context(|| format!("Failed to load config from {config_path}"))?;
    let policy = Arc::new(XsltPolicy::new(config)?);

    let input = tokio::fs::read(input_path)
        .await
        .with_context(|| format!("Failed to read {input_path}"))?;

    let mut interceptor = policy.intercept(
        policy.scope(),
        RequestContext::default(),
        BufferedBody::new(),
    );
    let mut head = MessageHead::default();
    interceptor.write(Bytes::from(input))?;
    interceptor.end(&mut head)?;
    let failed = interceptor.state() == InterceptorState::Failed;
    let output = interceptor.into_sink().to_bytes();
    if failed {
        return Err(eyre!(
            "Transformation failed: {}",
            String::from_utf8_lossy(&output)
        ));
    }

    tracing::info!(
        input = input_path,
        output_bytes = output.len(),
        cache = ?policy.executor().cache_stats(),
        "Transformation complete"
    );

    match output_path {
        Some(path) => tokio::fs::write(path, &output)
            .await
            .with_context(|| format!("Failed to write {path}"))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&output)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
