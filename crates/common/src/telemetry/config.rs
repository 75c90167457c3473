use opentelemetry_sdk::{logs::LoggerProvider, trace::TracerProvider as SdkTracerProvider};

/// Logging and export settings for one service process.
///
/// `log_level` is an `EnvFilter` directive and is ignored when `RUST_LOG` is set.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// OTLP/gRPC collector, used only when `otel_enabled`
    pub otel_endpoint: String,
    pub otel_enabled: bool,
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "tracker-registry".to_string(),
            otel_endpoint: "http://localhost:4317".to_string(),
            otel_enabled: false,
            log_level: "info".to_string(),
        }
    }
}

/// Exporter pipelines kept alive until the process exits
pub struct TelemetryProviders {
    pub tracer_provider: SdkTracerProvider,
    pub logger_provider: LoggerProvider,
}

impl TelemetryProviders {
    /// Flush and close both pipelines, reporting failures on stderr since
    /// the log pipeline itself may be gone
    pub fn shutdown(self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            eprintln!("tracer provider shutdown failed: {:?}", e);
        }
        if let Err(e) = self.logger_provider.shutdown() {
            eprintln!("logger provider shutdown failed: {:?}", e);
        }
    }
}
