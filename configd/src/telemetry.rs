//! Logging, error reporting and metrics recorder installation.

use crate::config::{LoggingConfig, MetricsConfig};
use config_api::metrics_defs::HTTP_REQUEST_DURATION;
use config_store::metrics_defs::REQUEST_LATENCY;
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusRecorder};
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use sentry::ClientInitGuard;
use sentry::types::{Dsn, ParseDsnError};
use shared::admin_service::MetricsRenderer;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
];

const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("invalid sentry dsn: {0}")]
    InvalidDsn(#[from] ParseDsnError),
    #[error("could not install log subscriber: {0}")]
    Subscriber(#[from] TryInitError),
    #[error("could not build prometheus recorder: {0}")]
    Prometheus(#[from] BuildError),
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] StatsdError),
    #[error("could not install metrics recorder: {0}")]
    Recorder(String),
}

/// Installs the global subscriber. The returned guard flushes Sentry on drop
/// and has to outlive the server.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<ClientInitGuard>, TelemetryError> {
    let guard = match &config.sentry_dsn {
        Some(dsn) if !dsn.trim().is_empty() => {
            let dsn = dsn.trim().parse::<Dsn>()?;
            Some(sentry::init(sentry::ClientOptions {
                dsn: Some(dsn),
                release: sentry::release_name!(),
                ..Default::default()
            }))
        }
        _ => None,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let sentry_layer = guard
        .is_some()
        .then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .with(sentry_layer)
        .try_init()?;

    Ok(guard)
}

pub fn prometheus_recorder() -> Result<PrometheusRecorder, BuildError> {
    let recorder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_LATENCY.name.to_string()),
            LATENCY_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(HTTP_REQUEST_DURATION.name.to_string()),
            LATENCY_BUCKETS,
        )?
        .build_recorder();

    Ok(recorder)
}

/// Installs the global metrics recorder.
///
/// Returns the `/metrics` renderer for Prometheus. StatsD pushes its metrics, so
/// nothing is rendered locally. Must be called inside the tokio runtime.
pub fn init_metrics(config: &MetricsConfig) -> Result<Option<MetricsRenderer>, TelemetryError> {
    match config {
        MetricsConfig::Prometheus => {
            let recorder = prometheus_recorder()?;
            let handle = recorder.handle();
            metrics::set_global_recorder(recorder)
                .map_err(|e| TelemetryError::Recorder(e.to_string()))?;

            let upkeep = handle.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(UPKEEP_INTERVAL);
                loop {
                    interval.tick().await;
                    upkeep.run_upkeep();
                }
            });

            tracing::info!("prometheus metrics served on /metrics");
            let renderer: MetricsRenderer = Arc::new(move || handle.render());
            Ok(Some(renderer))
        }
        MetricsConfig::Statsd { host, port, prefix } => {
            let recorder = StatsdBuilder::from(host.as_str(), *port).build(Some(prefix.as_str()))?;
            metrics::set_global_recorder(recorder)
                .map_err(|e| TelemetryError::Recorder(e.to_string()))?;

            tracing::info!(host, port, prefix, "sending metrics to statsd");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config_store::metrics_defs::REQUESTS_TOTAL;
    use shared::{counter, histogram};

    #[test]
    fn prometheus_rendering() {
        let recorder = prometheus_recorder().expect("build recorder");
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            counter!(REQUESTS_TOTAL, "method" => "GetConfiguration").increment(2);
            histogram!(REQUEST_LATENCY, "method" => "GetConfiguration").record(0.02);
        });

        let text = handle.render();
        assert!(text.contains("requests_total"), "{text}");
        assert!(text.contains("method=\"GetConfiguration\""), "{text}");
        assert!(text.contains("request_latency_seconds_bucket"), "{text}");
    }

    #[test]
    fn bad_dsn_is_rejected() {
        let config = LoggingConfig {
            sentry_dsn: Some("not a dsn".into()),
            level: "info".into(),
        };
        assert!(matches!(
            init_logging(&config),
            Err(TelemetryError::InvalidDsn(_))
        ));
    }
}
