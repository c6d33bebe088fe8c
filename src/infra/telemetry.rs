use std::sync::Once;

use metrics::{Unit, describe_counter};
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
            "riflesso_transform_submitted_total",
            Unit::Count,
            "Total number of transform jobs submitted to a backend."
        );
        describe_counter!(
            "riflesso_consume_applied_total",
            Unit::Count,
            "Total number of transform results applied to an attachment."
        );
        describe_counter!(
            "riflesso_consume_stale_total",
            Unit::Count,
            "Total number of transform results discarded as stale."
        );
        describe_counter!(
            "riflesso_consume_failed_total",
            Unit::Count,
            "Total number of transform results that could not be applied."
        );
        describe_counter!(
            "riflesso_registry_reload_total",
            Unit::Count,
            "Total number of successful transform registry reloads."
        );
        describe_counter!(
            "riflesso_registry_reload_failed_total",
            Unit::Count,
            "Total number of transform registry reloads that failed."
        );
    });
}
