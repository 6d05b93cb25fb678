use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::preview::{
        RENDER_DURATION_MS, RENDER_FAILED_TOTAL, RENDER_PUBLISHED_TOTAL, RENDER_SUPERSEDED_TOTAL,
        RENDER_TOTAL,
    },
    config::{LogFormat, LoggingSettings},
};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to standard error so `render` and `context` output on standard
/// output stays clean.
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            RENDER_TOTAL,
            Unit::Count,
            "Total number of preview render passes triggered."
        );
        describe_counter!(
            RENDER_PUBLISHED_TOTAL,
            Unit::Count,
            "Total number of render passes whose frame reached the surface."
        );
        describe_counter!(
            RENDER_SUPERSEDED_TOTAL,
            Unit::Count,
            "Total number of render passes dropped because a newer pass or binding overtook them."
        );
        describe_counter!(
            RENDER_FAILED_TOTAL,
            Unit::Count,
            "Total number of render passes that failed in context collection, the engine or the surface."
        );
        describe_histogram!(
            RENDER_DURATION_MS,
            Unit::Milliseconds,
            "Latency of published render passes in milliseconds."
        );
    });
}
