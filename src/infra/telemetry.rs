use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    // Logs go to stderr so `render` can stream the artifact on stdout.
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every render metric with the installed recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "ritratto_render_cache_hit_total",
            Unit::Count,
            "Total number of render cache hits."
        );
        describe_counter!(
            "ritratto_render_cache_miss_total",
            Unit::Count,
            "Total number of render cache misses."
        );
        describe_counter!(
            "ritratto_render_cache_evict_total",
            Unit::Count,
            "Total number of render cache evictions due to capacity."
        );
        describe_counter!(
            "ritratto_render_backend_total",
            Unit::Count,
            "Total number of backend invocations, labelled by backend."
        );
        describe_counter!(
            "ritratto_render_remote_retry_total",
            Unit::Count,
            "Total number of remote render attempts retried after a failure."
        );
        describe_counter!(
            "ritratto_render_remote_timeout_total",
            Unit::Count,
            "Total number of remote render attempts that hit the timeout."
        );
        describe_counter!(
            "ritratto_render_dropped_total",
            Unit::Count,
            "Total number of render requests dropped while a run was in flight."
        );
        describe_counter!(
            "ritratto_render_manual_retry_throttled_total",
            Unit::Count,
            "Total number of manual retries ignored during the cooldown."
        );
        describe_counter!(
            "ritratto_render_stale_suppressed_total",
            Unit::Count,
            "Total number of superseded run results that were not published."
        );
        describe_histogram!(
            "ritratto_render_ms",
            Unit::Milliseconds,
            "Backend run latency in milliseconds."
        );
    });
}
