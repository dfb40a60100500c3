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

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

/// Register descriptions for every metric the cache emits. Safe to call repeatedly.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "advanced_cache_hit_total",
            Unit::Count,
            "Total number of responses served from storage."
        );
        describe_counter!(
            "advanced_cache_miss_total",
            Unit::Count,
            "Total number of admitted requests that had to be rendered."
        );
        describe_counter!(
            "advanced_cache_bypass_total",
            Unit::Count,
            "Total number of requests that skipped storage, labelled by reason."
        );
        describe_counter!(
            "advanced_cache_store_total",
            Unit::Count,
            "Total number of rendered responses written to storage."
        );
        describe_counter!(
            "advanced_cache_store_failed_total",
            Unit::Count,
            "Total number of storage writes that failed or timed out."
        );
        describe_counter!(
            "advanced_cache_backend_error_total",
            Unit::Count,
            "Total number of storage backend failures, labelled by backend and operation."
        );
        describe_counter!(
            "advanced_cache_corrupt_total",
            Unit::Count,
            "Total number of undecodable stored records discarded."
        );
        describe_counter!(
            "advanced_cache_evict_total",
            Unit::Count,
            "Total number of entries evicted due to capacity."
        );
        describe_histogram!(
            "advanced_cache_render_ms",
            Unit::Milliseconds,
            "Upstream render latency in milliseconds."
        );
    });
}
