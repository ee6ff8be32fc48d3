//! Tracing initialisation for the `rcctl` binary.
//!
//! Call [`init_tracing`] once at process startup.  Log lines go to stderr so
//! they never interleave with the interactive prompt on stdout.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `RCCTL_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set, spans are exported over OTLP/HTTP. |
//!
//! # Example
//!
//! ```rust,no_run
//! // Hold the guard for the entire lifetime of the process.
//! let _guard = rcctl_runtime::telemetry::init_tracing("rcctl");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the console log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Parse the value of `RCCTL_LOG_FORMAT`; anything but `json` is compact.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }

    pub fn from_env() -> Self {
        Self::parse(std::env::var("RCCTL_LOG_FORMAT").ok().as_deref())
    }
}

/// Initialise the global `tracing` subscriber.
///
/// The returned [`TracerProviderGuard`] must be held until exit; dropping it
/// flushes pending spans.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = LogFormat::from_env();
    let provider = build_provider(service_name);

    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("rcctl")));
    let json_layer = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let compact_layer = (format == LogFormat::Compact).then(|| {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json_layer)
        .with(compact_layer)
        .init();

    TracerProviderGuard(provider)
}

/// Shuts the OTel [`SdkTracerProvider`] down on drop.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[rcctl] OpenTelemetry provider shutdown error: {e}");
        }
    }
}

/// `None` when `OTEL_EXPORTER_OTLP_ENDPOINT` is unset or the exporter fails
/// to build (the error goes to stderr).
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[rcctl] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: the binary calls this before its Tokio runtime exists.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some(" JSON ")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Compact);
        assert_eq!(LogFormat::parse(None), LogFormat::Compact);
    }

    #[test]
    fn build_provider_returns_none_without_endpoint() {
        // SAFETY: no other test in this crate reads this variable.
        unsafe { std::env::remove_var("OTEL_EXPORTER_OTLP_ENDPOINT") };
        assert!(build_provider("test-service").is_none());
    }

    #[test]
    fn empty_guard_drops_cleanly() {
        drop(TracerProviderGuard(None));
    }
}
