use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics::{
    METRIC_DURABLE_ERROR, METRIC_DURABLE_HIT, METRIC_EVICT, METRIC_GET_MS, METRIC_MAINTENANCE_MS,
    METRIC_MEMORY_HIT, METRIC_MISS, METRIC_SET_MS,
};
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so that commands printing payloads keep stdout clean.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

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

/// Register descriptions for every cache metric with the active recorder.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            METRIC_MEMORY_HIT,
            Unit::Count,
            "Lookups served by the in-process tier."
        );
        describe_counter!(
            METRIC_DURABLE_HIT,
            Unit::Count,
            "Lookups served by the durable tier after an in-process miss."
        );
        describe_counter!(METRIC_MISS, Unit::Count, "Lookups served by neither tier.");
        describe_counter!(
            METRIC_EVICT,
            Unit::Count,
            "In-process entries evicted to honor capacity bounds."
        );
        describe_counter!(
            METRIC_DURABLE_ERROR,
            Unit::Count,
            "Durable tier operations that failed and were absorbed."
        );
        describe_histogram!(
            METRIC_GET_MS,
            Unit::Milliseconds,
            "Cache lookup latency in milliseconds."
        );
        describe_histogram!(
            METRIC_SET_MS,
            Unit::Milliseconds,
            "Cache write latency in milliseconds."
        );
        describe_histogram!(
            METRIC_MAINTENANCE_MS,
            Unit::Milliseconds,
            "Maintenance cycle duration in milliseconds."
        );
    });
}
