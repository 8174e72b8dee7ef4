//! Subscriber setup: env filter, pretty or JSON console output, and an
//! optional OpenTelemetry layer exporting spans over OTLP.

use tracing_subscriber::{
    layer::{Layered, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::{TelemetryConfig, TelemetryError};

type BoxedLayer = Box<dyn Layer<Layered<EnvFilter, Registry>> + Send + Sync>;

/// Guard that shuts down the tracer provider on drop.
#[derive(Default)]
pub struct TracingGuard {
    #[cfg(feature = "otlp")]
    provider: Option<opentelemetry_sdk::trace::TracerProvider>,
}

impl Drop for TracingGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otlp")]
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Error shutting down tracer provider: {:?}", e);
            }
        }
    }
}

/// Build the env filter: `RUST_LOG` wins, then the configured level.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Config(e.to_string()))
}

fn console_layer(config: &TelemetryConfig) -> Option<BoxedLayer> {
    if !config.console_output {
        return None;
    }
    let layer = if config.json_logs {
        // JSON output for containers/production
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        // Pretty output for development
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true)
            .boxed()
    };
    Some(layer)
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<TracingGuard, TelemetryError> {
    let env_filter = build_filter(config)?;
    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.extend(console_layer(config));

    #[allow(unused_mut)]
    let mut guard = TracingGuard::default();

    #[cfg(feature = "otlp")]
    if config.otlp_enabled {
        let (layer, provider) = otlp::layer(config)?;
        layers.push(layer);
        guard.provider = Some(provider);
    }

    #[cfg(not(feature = "otlp"))]
    if config.otlp_enabled {
        eprintln!("OTLP endpoint configured but the otlp feature is disabled; spans stay local");
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        otlp = config.otlp_enabled,
        "Tracing initialized"
    );

    Ok(guard)
}

#[cfg(feature = "otlp")]
mod otlp {
    use super::BoxedLayer;
    use crate::{TelemetryConfig, TelemetryError};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{
        runtime,
        trace::{self, RandomIdGenerator, Sampler, TracerProvider},
        Resource,
    };
    use tracing_subscriber::Layer;

    /// Must be called from within a tokio runtime.
    pub(super) fn layer(
        config: &TelemetryConfig,
    ) -> Result<(BoxedLayer, TracerProvider), TelemetryError> {
        let exporter = opentelemetry_otlp::new_exporter()
            .tonic()
            .with_endpoint(&config.otlp_endpoint);

        let provider = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(
                trace::Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_id_generator(RandomIdGenerator::default())
                    .with_resource(Resource::new(vec![
                        KeyValue::new("service.name", config.service_name.clone()),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                        KeyValue::new("deployment.environment", config.environment.clone()),
                    ])),
            )
            .install_batch(runtime::Tokio)
            .map_err(|e| TelemetryError::TracerInit(e.to_string()))?;

        let tracer = provider.tracer(config.service_name.clone());
        let layer = tracing_opentelemetry::layer().with_tracer(tracer).boxed();
        Ok((layer, provider))
    }
}
