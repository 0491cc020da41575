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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "recipehub_detail_cache_hit_total",
            Unit::Count,
            "Total number of recipe detail cache hits."
        );
        describe_counter!(
            "recipehub_detail_cache_miss_total",
            Unit::Count,
            "Total number of recipe detail cache misses."
        );
        describe_counter!(
            "recipehub_cache_fallback_total",
            Unit::Count,
            "Cache failures recovered by falling back or skipping, labelled by operation."
        );
        describe_counter!(
            "recipehub_counter_increment_failed_total",
            Unit::Count,
            "Counter increments dropped, labelled by metric and reason."
        );
        describe_counter!(
            "recipehub_reconcile_dirty_total",
            Unit::Count,
            "Recipe ids flushed to the database by reconciliation."
        );
        describe_counter!(
            "recipehub_reconcile_write_failed_total",
            Unit::Count,
            "Reconciliation batches whose database write failed after every retry."
        );
        describe_histogram!(
            "recipehub_reconcile_ms",
            Unit::Milliseconds,
            "Reconciliation cycle latency in milliseconds."
        );
        describe_histogram!(
            "recipehub_warm_ms",
            Unit::Milliseconds,
            "Detail cache warm latency in milliseconds."
        );
    });
}
