use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing::info;
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter,
    filter::Directive,
    fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Driver crates that are chatty at `info`; held at `warn` unless `RUST_LOG` names them.
const QUIET_TARGETS: &[&str] = &["sqlx=warn", "redis=warn", "hyper=warn"];

/// Install the global tracing subscriber and register metric descriptions.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(build_filter(
            logging,
            &std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default(),
        ))
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })?;

    info!(
        target = "cuplore::telemetry",
        level = %logging.level,
        format = ?logging.format,
        "telemetry initialized"
    );
    Ok(())
}

fn build_filter(logging: &LoggingSettings, explicit: &str) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .parse_lossy(explicit);

    for quiet in QUIET_TARGETS {
        let crate_name = quiet.split('=').next().unwrap_or_default();
        if explicit.contains(crate_name) {
            continue;
        }
        if let Ok(directive) = quiet.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_gauge!(
            "cuplore_follow_queue_len",
            Unit::Count,
            "Current number of follow tasks waiting for persistence."
        );
        describe_counter!(
            "cuplore_follow_accepted_total",
            Unit::Count,
            "Total number of follow tasks accepted into the ingest queue."
        );
        describe_counter!(
            "cuplore_follow_rejected_total",
            Unit::Count,
            "Total number of follow tasks rejected by the ingest queue, by reason."
        );
        describe_counter!(
            "cuplore_follow_persisted_total",
            Unit::Count,
            "Total number of follow tasks persisted, by outcome (created or duplicate)."
        );
        describe_counter!(
            "cuplore_follow_retry_total",
            Unit::Count,
            "Total number of follow persistence retries after transient failures."
        );
        describe_counter!(
            "cuplore_follow_dead_letter_total",
            Unit::Count,
            "Total number of follow tasks moved to the dead-letter queue."
        );
        describe_counter!(
            "cuplore_follow_dead_letter_evicted_total",
            Unit::Count,
            "Total number of dead letters evicted because the queue was full."
        );
        describe_histogram!(
            "cuplore_follow_persist_lag_ms",
            Unit::Milliseconds,
            "Delay between accepting a follow and persisting it, in milliseconds."
        );
        describe_counter!(
            "cuplore_like_toggle_total",
            Unit::Count,
            "Total number of like toggles, by resulting state."
        );
        describe_counter!(
            "cuplore_reconcile_updated_total",
            Unit::Count,
            "Total number of note like counters written by reconciliation."
        );
        describe_counter!(
            "cuplore_reconcile_failed_total",
            Unit::Count,
            "Total number of notes skipped by reconciliation after a failure."
        );
        describe_histogram!(
            "cuplore_reconcile_ms",
            Unit::Milliseconds,
            "Like reconciliation pass latency in milliseconds."
        );
    });
}
