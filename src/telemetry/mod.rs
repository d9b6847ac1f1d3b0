//! Tracing subscriber and OpenTelemetry export.
//!
//! Without an OTLP endpoint the process logs to stderr through the fmt
//! layer and nothing else. With one, traces, metrics and logs are exported
//! over gRPC, all tagged with the service name, version and lane of the
//! process so lane traffic can be told apart from production.

pub mod metrics;
pub mod work;

use crate::error::{Error, Result};
use crate::lane::{self, Lane};
use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig as _;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::trace::SdkTracerProvider;

/// Resource attribute carrying the lane of the process.
pub const LANE_ATTRIBUTE: &str = "lanework.lane";

pub struct TelemetryConfig {
    /// OTLP gRPC endpoint, e.g. `http://localhost:4317`.
    pub endpoint: Option<String>,
    pub service_name: String,
    /// Filter used when `RUST_LOG` is not set.
    pub default_filter: String,
    pub lane: Option<Lane>,
}

struct Pipelines {
    tracer: SdkTracerProvider,
    meter: SdkMeterProvider,
    logger: SdkLoggerProvider,
}

/// Flushes and shuts down the export pipelines when dropped. Hold it for
/// the lifetime of the process.
pub struct TelemetryGuard {
    pipelines: Option<Pipelines>,
}

impl TelemetryGuard {
    pub fn force_flush(&self) {
        if let Some(p) = &self.pipelines {
            let _ = p.tracer.force_flush();
            let _ = p.meter.force_flush();
            let _ = p.logger.force_flush();
        }
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        // Logs first: span and metric shutdown may still emit log records.
        if let Some(p) = self.pipelines.take() {
            let _ = p.logger.shutdown();
            let _ = p.meter.shutdown();
            let _ = p.tracer.shutdown();
        }
    }
}

/// Install the global subscriber (and, with an endpoint, the OTel
/// providers). Fails if a subscriber is already installed.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry::trace::TracerProvider as _;
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));
    let registry = tracing_subscriber::registry().with(filter);

    let Some(endpoint) = config.endpoint.as_deref() else {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(subscriber_error)?;
        return Ok(TelemetryGuard { pipelines: None });
    };

    let resource = resource(&config.service_name, config.lane.as_ref());
    let pipelines = Pipelines {
        tracer: tracer_provider(endpoint, resource.clone())?,
        meter: meter_provider(endpoint, resource.clone())?,
        logger: logger_provider(endpoint, resource)?,
    };
    opentelemetry::global::set_meter_provider(pipelines.meter.clone());

    registry
        .with(tracing_subscriber::fmt::layer().compact())
        .with(tracing_opentelemetry::layer().with_tracer(pipelines.tracer.tracer("lanework")))
        .with(opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(
            &pipelines.logger,
        ))
        .try_init()
        .map_err(subscriber_error)?;

    Ok(TelemetryGuard {
        pipelines: Some(pipelines),
    })
}

fn resource(service_name: &str, lane: Option<&Lane>) -> Resource {
    Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attributes([
            KeyValue::new(
                opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            ),
            KeyValue::new(
                LANE_ATTRIBUTE,
                lane.map_or(lane::PROD, Lane::as_str).to_string(),
            ),
        ])
        .build()
}

fn tracer_provider(endpoint: &str, resource: Resource) -> Result<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| exporter_error("span", e))?;
    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn meter_provider(endpoint: &str, resource: Resource) -> Result<SdkMeterProvider> {
    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| exporter_error("metric", e))?;
    Ok(SdkMeterProvider::builder()
        .with_periodic_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn logger_provider(endpoint: &str, resource: Resource) -> Result<SdkLoggerProvider> {
    let exporter = opentelemetry_otlp::LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| exporter_error("log", e))?;
    Ok(SdkLoggerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

fn exporter_error(signal: &str, e: impl std::fmt::Display) -> Error {
    Error::Config(format!("cannot build OTLP {signal} exporter: {e}"))
}

fn subscriber_error(e: impl std::fmt::Display) -> Error {
    Error::Other(format!("tracing subscriber already installed: {e}"))
}
