use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::PolicyScope;

/// Initialize tracing with custom configuration
pub fn init_tracing_with_config(level: &str, json_format: bool, include_spans: bool) -> Result<()> {
    let env_filter =
        EnvFilter::try_new(level).wrap_err_with(|| format!("Invalid log level: {level}"))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(
                fmt_layer
                    .json()
                    .with_current_span(include_spans)
                    .with_span_list(include_spans),
            )
            .init();
    } else {
        Registry::default()
            .with(env_filter)
            .with(fmt_layer.compact().with_ansi(true))
            .init();
    }

    tracing::debug!(level, json_format, include_spans, "Logging initialized");
    Ok(())
}

/// Create a span covering one stylesheet application
///
/// `xslt.stylesheet` (the stylesheet fingerprint) and `output_bytes` are
/// recorded once known.
pub fn create_transform_span(scope: PolicyScope) -> tracing::Span {
    tracing::info_span!(
        "xslt_transform",
        xslt.scope = %scope,
        xslt.stylesheet = tracing::field::Empty,
        output_bytes = tracing::field::Empty,
    )
}
