//! The runtime: one [`MqService`] plus the background tasks around it.

use crate::config::RuntimeConfig;
use anyhow::{Context, Result};
use mq_core::{AdapterFactory, InMemoryConfigStore, MqService};
use shared_bus::{EventFilter, InMemoryEventBus, MqEvent};
use shared_types::utils::format_duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Outcome of probing one configured connection at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepResult {
    pub connection_id: String,
    pub name: String,
    pub success: bool,
    pub message: String,
    pub latency_ms: u64,
}

/// Owns the service, the event bus it publishes to, and the event logger.
pub struct MqRuntime {
    service: Arc<MqService>,
    bus: Arc<InMemoryEventBus>,
    connections: Vec<(String, String)>,
    metrics_file: Option<PathBuf>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    logger: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl MqRuntime {
    /// Build with the default adapter factory.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Build with a caller-supplied factory.
    pub fn with_factory(config: RuntimeConfig, factory: Arc<dyn AdapterFactory>) -> Result<Self> {
        Self::build(config, Some(factory))
    }

    fn build(config: RuntimeConfig, factory: Option<Arc<dyn AdapterFactory>>) -> Result<Self> {
        let connections = config
            .connections
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect();
        let store = InMemoryConfigStore::with_connections(config.connections)
            .context("Failed to load connections")?;
        let bus = Arc::new(InMemoryEventBus::new());

        let mut builder = MqService::builder()
            .config(config.core)
            .config_store(Arc::new(store))
            .event_sink(bus.clone());
        if let Some(factory) = factory {
            builder = builder.factory(factory);
        }
        let service = builder.build().context("Failed to build messaging service")?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            service: Arc::new(service),
            bus,
            connections,
            metrics_file: config.metrics_file,
            shutdown_tx,
            shutdown_rx,
            logger: parking_lot::Mutex::new(None),
        })
    }

    pub fn service(&self) -> Arc<MqService> {
        Arc::clone(&self.service)
    }

    pub fn event_bus(&self) -> Arc<InMemoryEventBus> {
        Arc::clone(&self.bus)
    }

    /// Current metrics in Prometheus text format.
    pub fn metrics_text(&self) -> Result<String> {
        mq_telemetry::register_metrics().context("Failed to register metrics")?;
        mq_telemetry::gather_text().context("Failed to encode metrics")
    }

    /// Write [`Self::metrics_text`] to `path`, creating parent directories.
    pub fn write_metrics(&self, path: &Path) -> Result<()> {
        let text = self.metrics_text()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Start the event logger, then probe every configured connection.
    pub async fn start(&self) -> Vec<SweepResult> {
        info!("===========================================");
        info!("  MQ Toolkit Runtime v{}", mq_core::VERSION);
        info!("  Connections configured: {}", self.connections.len());
        info!("===========================================");

        self.spawn_event_logger();
        self.connectivity_sweep().await
    }

    fn spawn_event_logger(&self) {
        let mut events = self.bus.subscribe(EventFilter::all());
        let mut shutdown = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Some(MqEvent::MessageReceived { subscription_id, message }) => info!(
                            subscription_id = %subscription_id,
                            topic = %message.topic(),
                            key = %message.key(),
                            "Message received"
                        ),
                        Some(MqEvent::ConsumerError { subscription_id, error }) => {
                            error!(subscription_id = %subscription_id, error = %error, "Consumer failed")
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });
        if let Some(previous) = self.logger.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Probe each connection once; failures are logged, never fatal.
    pub async fn connectivity_sweep(&self) -> Vec<SweepResult> {
        let started = Instant::now();
        let mut results = Vec::with_capacity(self.connections.len());
        for (id, name) in &self.connections {
            let result = self.service.test_connection(id).await;
            if result.success {
                info!(connection_id = %id, name = %name, latency_ms = result.latency_ms, "{}", result.message);
            } else {
                warn!(connection_id = %id, name = %name, latency_ms = result.latency_ms, "{}", result.message);
            }
            results.push(SweepResult {
                connection_id: id.clone(),
                name: name.clone(),
                success: result.success,
                message: result.message,
                latency_ms: result.latency_ms,
            });
        }
        let reachable = results.iter().filter(|r| r.success).count();
        info!(
            reachable,
            total = results.len(),
            elapsed = %format_duration(started.elapsed()),
            "Connectivity sweep finished"
        );
        results
    }

    /// Stop every subscription, close every cached client, then the logger.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        self.service.shutdown().await;

        if let Err(e) = self.shutdown_tx.send(true) {
            error!("Failed to send shutdown signal: {}", e);
        }
        let logger = self.logger.lock().take();
        if let Some(handle) = logger {
            if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
                warn!("Event logger did not stop in time");
            }
        }
        if let Some(path) = &self.metrics_file {
            match self.write_metrics(path) {
                Ok(()) => info!(path = %path.display(), "Metrics written"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to write metrics"),
            }
        }
        let stats = self.bus.stats();
        info!(events_emitted = stats.emitted, events_unheard = stats.unheard, "Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mq_core::testing::{MockFactory, MockPlan};
    use shared_types::{BrokerType, ConnectionConfig, ConsumeRequest, ProduceRequest};

    fn config_with(names: &[&str]) -> RuntimeConfig {
        RuntimeConfig {
            connections: names
                .iter()
                .map(|n| ConnectionConfig::new(*n, BrokerType::Kafka, "localhost", 9092))
                .collect(),
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sweep_reports_every_connection() {
        let runtime = MqRuntime::with_factory(config_with(&["a", "b"]), Arc::new(MockFactory::default())).unwrap();
        let results = runtime.start().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success));
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_sweep_failure_is_not_fatal() {
        let factory = MockFactory::new(MockPlan {
            fail_connect: true,
            ..MockPlan::default()
        });
        let runtime = MqRuntime::with_factory(config_with(&["down"]), Arc::new(factory)).unwrap();
        let results = runtime.start().await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_subscriptions() {
        let runtime = MqRuntime::with_factory(config_with(&["a"]), Arc::new(MockFactory::default())).unwrap();
        runtime.start().await;
        let service = runtime.service();
        let conn_id = runtime.connections[0].0.clone();

        let mut events = runtime.event_bus().subscribe(EventFilter::all());
        let sub = service
            .start_consuming(&ConsumeRequest::new(conn_id.clone(), ["orders"]))
            .await
            .unwrap();
        assert!(!sub.is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        service
            .produce(&ProduceRequest::new(conn_id, "orders").value("hello"))
            .await
            .unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), events.recv()).await.unwrap();
        assert!(matches!(event, Some(MqEvent::MessageReceived { .. })));

        runtime.shutdown().await;
        assert_eq!(service.active_subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_writes_metrics_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("textfile/mq.prom");
        let config = RuntimeConfig {
            metrics_file: Some(path.clone()),
            ..config_with(&["a"])
        };
        let runtime = MqRuntime::with_factory(config, Arc::new(MockFactory::default())).unwrap();
        runtime.start().await;
        let conn_id = runtime.connections[0].0.clone();
        runtime
            .service()
            .produce(&ProduceRequest::new(conn_id, "orders").value("hello"))
            .await
            .unwrap();

        runtime.shutdown().await;
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("mq_messages_produced_total"));
    }

    #[test]
    fn test_metrics_text_is_prometheus_exposition() {
        let runtime = MqRuntime::with_factory(config_with(&[]), Arc::new(MockFactory::default())).unwrap();
        let text = runtime.metrics_text().unwrap();
        assert!(text.contains("# TYPE mq_consumer_errors_total counter"));
        assert!(text.contains("mq_active_subscriptions"));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        assert!(MqRuntime::new(config_with(&["same", "same"])).is_err());
    }
}
