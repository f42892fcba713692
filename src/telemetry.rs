//! Telemetry logic.
//! Structured logs with `tracing`, optional OTLP export and Prometheus
//! metrics.

use std::error::Error;
use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::Version;
use axum::middleware::Next;
use axum::response::Response;
use metrics::Unit;
use metrics_exporter_prometheus::{
    BuildError, Matcher, PrometheusBuilder, PrometheusHandle,
};
use opentelemetry::trace::{Span, Tracer};
use opentelemetry::{KeyValue, global};
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{LogExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config;

const SERVICE_NAME: &str = "civiceye";
const DEFAULT_FILTER: &str = "info";

fn resource() -> Resource {
    Resource::builder().with_service_name(SERVICE_NAME).build()
}

/// Keep exporters alive. Pending spans and logs are flushed on drop.
#[derive(Default)]
pub struct Telemetry {
    tracer: Option<SdkTracerProvider>,
    logger: Option<SdkLoggerProvider>,
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(tracer) = self.tracer.take() {
            if let Err(err) = tracer.shutdown() {
                eprintln!("tracer provider shutdown failed: {err:?}");
            }
        }
        if let Some(logger) = self.logger.take() {
            if let Err(err) = logger.shutdown() {
                eprintln!("logger provider shutdown failed: {err:?}");
            }
        }
    }
}

/// Create tracer exporting spans to `endpoint`.
fn setup_tracer(endpoint: &str) -> Result<SdkTracerProvider, Box<dyn Error>> {
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource())
        .build())
}

/// Create logger exporting records to `endpoint`.
fn setup_logger(endpoint: &str) -> Result<SdkLoggerProvider, Box<dyn Error>> {
    let exporter = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()?;

    Ok(SdkLoggerProvider::builder()
        .with_resource(resource())
        .with_batch_exporter(exporter)
        .build())
}

/// Install the global `tracing` subscriber.
///
/// Logs always go to stdout, filtered by `RUST_LOG`. With an OTLP endpoint
/// configured, spans and logs are exported too.
pub fn init(
    config: Option<&config::Telemetry>,
) -> Result<Telemetry, Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let mut telemetry = Telemetry::default();
    if let Some(config) = config {
        let tracer = setup_tracer(&config.otlp_endpoint)?;
        global::set_tracer_provider(tracer.clone());
        telemetry.tracer = Some(tracer);
        telemetry.logger = Some(setup_logger(&config.otlp_endpoint)?);
    }

    let bridge = telemetry
        .logger
        .as_ref()
        .map(|logger| OpenTelemetryTracingBridge::new(logger));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(bridge)
        .try_init()?;

    Ok(telemetry)
}

/// Create recorder for Prometheus metrics.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const EXPONENTIAL_SECONDS: &[f64] = &[
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ];

    metrics::describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Handled HTTP requests."
    );
    metrics::describe_histogram!(
        "http_requests_duration_seconds",
        Unit::Seconds,
        "Time spent handling HTTP requests."
    );
    metrics::describe_counter!(
        "reports_submitted_total",
        Unit::Count,
        "Accepted hazard reports."
    );
    metrics::describe_counter!(
        "users_created_total",
        Unit::Count,
        "Users created on their first login."
    );
    metrics::describe_counter!(
        "logins_total",
        Unit::Count,
        "Completed login attempts, by outcome."
    );

    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("http_requests_duration_seconds".to_string()),
            EXPONENTIAL_SECONDS,
        )?
        .install_recorder()
}

fn version(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2",
        Version::HTTP_3 => "HTTP/3",
        _ => "UNKNOWN",
    }
}

/// Record a span and request metrics for every matched route.
pub async fn track(req: Request, next: Next) -> Response {
    let mut span = global::tracer("civiceye-http").start("http-request");

    let start = Instant::now();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let method = req.method().to_string();
    let http_version = version(req.version());

    let response = next.run(req).await;

    let latency = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    span.set_attributes([
        KeyValue::new("version", http_version),
        KeyValue::new("path", path.clone()),
        KeyValue::new("method", method.clone()),
        KeyValue::new("status", status.clone()),
    ]);
    span.end();

    let labels = [("method", method), ("path", path), ("status", status)];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_requests_duration_seconds", &labels)
        .record(latency);

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_names() {
        assert_eq!(version(Version::HTTP_11), "HTTP/1.1");
        assert_eq!(version(Version::HTTP_2), "HTTP/2");
    }
}
