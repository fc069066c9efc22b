//! Stream Relay Service
//!
//! Runs both halves of the stream pipeline against an in-memory queue.
//!
//! ## Architecture
//!
//! ```text
//! order generator
//!   ↓ Producer (JSON encoding)
//! ProducerDaemon "orders" (aggregation, batching, idle flush)
//!   ↓ SplittingOutput → LoopbackOutput
//! InMemoryInput (queue)
//!   ↓
//! Consumer "orders" (+ delay queue retry when enabled)
//! ```
//!
//! ## Features
//!
//! - Settings from `STREAM_PRODUCER_ORDERS_*` and `STREAM_CONSUMER_ORDERS_*`
//! - Graceful shutdown: the daemon flushes before the consumer drains the queue
//! - Health check and metrics endpoint for Kubernetes probes

mod loopback;

pub use loopback::LoopbackOutput;

use async_trait::async_trait;
use axum::Router;
use core_config::{env_parse_or, Environment, FromNamedEnv};
use eyre::{Result, WrapErr};
use messaging::{Attributes, InMemoryInput, MessageEncoder, Output, StreamError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stream_pipeline::{
    health_router, Consumer, ConsumerCallback, ConsumerInput, ConsumerSettings, HealthState,
    Producer, ProducerDaemon, ProducerDaemonRegistry, ProducerDaemonSettings, SplittingOutput,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub const STREAM: &str = "orders";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub amount_cents: u64,
}

/// Logs every relayed order.
#[derive(Clone, Default)]
pub struct OrderLogger {
    relayed: Arc<AtomicU64>,
}

impl OrderLogger {
    pub fn relayed(&self) -> u64 {
        self.relayed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConsumerCallback for OrderLogger {
    type Model = Order;

    async fn consume(&self, order: Order, _attributes: Attributes) -> Result<bool, StreamError> {
        self.relayed.fetch_add(1, Ordering::SeqCst);
        info!(order_id = order.id, amount_cents = order.amount_cents, "relayed order");
        Ok(true)
    }
}

/// Producer and consumer sides sharing one queue.
pub struct Relay {
    pub registry: ProducerDaemonRegistry,
    pub daemon: Arc<ProducerDaemon>,
    pub producer: Producer,
    pub consumer: Arc<Consumer<OrderLogger>>,
    pub logger: OrderLogger,
}

impl Relay {
    pub fn new(
        queue: Arc<InMemoryInput>,
        daemon_settings: ProducerDaemonSettings,
        consumer_settings: ConsumerSettings,
    ) -> Result<Self> {
        let output: Arc<dyn Output> =
            Arc::new(SplittingOutput::new(Arc::new(LoopbackOutput::new(queue.clone()))));

        let registry = ProducerDaemonRegistry::new();
        let daemon = registry
            .provide(STREAM, || ProducerDaemon::new(STREAM, daemon_settings, output))
            .wrap_err("Failed to create producer daemon")?;
        let producer = Producer::with_daemon(STREAM, MessageEncoder::json(), daemon.clone());

        let logger = OrderLogger::default();
        let consumer = Consumer::new(
            STREAM,
            consumer_settings,
            ConsumerInput::acknowledgeable(queue),
            logger.clone(),
        )
        .wrap_err("Failed to create consumer")?;

        Ok(Self {
            registry,
            daemon,
            producer,
            consumer: Arc::new(consumer),
            logger,
        })
    }

    pub fn health_state(&self) -> HealthState {
        HealthState::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
            .with_component("producer_daemon", self.daemon.clone())
            .with_component("consumer", self.consumer.clone())
    }

    /// Run until `shutdown` fires and every produced order was consumed.
    ///
    /// `produce` runs alongside and should return once `shutdown` fires.
    pub async fn run<F, Fut>(self, shutdown: CancellationToken, produce: F) -> Result<u64>
    where
        F: FnOnce(Producer, CancellationToken) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let consumer_cancel = CancellationToken::new();
        let consumer = tokio::spawn({
            let consumer = self.consumer.clone();
            let cancel = consumer_cancel.clone();
            async move { consumer.run(cancel).await }
        });

        let registry = self.registry;
        let daemons = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { registry.run_all(shutdown).await }
        });

        let generator = tokio::spawn(produce(self.producer, shutdown.clone()));

        shutdown.cancelled().await;
        generator.await.wrap_err("Order generator panicked")?;

        // the daemon flushes into the queue before the consumer stops reading
        let daemon_result = daemons.await.wrap_err("Producer daemon panicked")?;
        consumer_cancel.cancel();
        let consumer_result = consumer.await.wrap_err("Consumer panicked")?;

        daemon_result.wrap_err("Producer daemon failed")?;
        consumer_result.wrap_err("Consumer failed")?;

        Ok(self.logger.relayed())
    }
}

/// Write one order every `tick` until `cancel` fires.
pub async fn generate_orders(producer: Producer, tick: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(tick);
    let mut id = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                id += 1;
                let order = Order { id, amount_cents: 100 * (id % 7 + 1) };

                if let Err(e) = producer.write_one(&order, &[]).await {
                    warn!(order_id = id, error = %e, "could not write order");
                }
            }
        }
    }

    info!(written = id, "order generator stopped");
}

/// Start the health and metrics HTTP server
async fn start_health_server(state: HealthState, port: u16, cancel: CancellationToken) -> Result<()> {
    let app: Router = health_router(state);

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind health server to {}", addr))?;

    info!(port = %port, "Health server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .wrap_err("Health server failed")?;

    Ok(())
}

/// Run the stream relay
///
/// 1. Sets up structured logging and metrics
/// 2. Builds the producer daemon and consumer from the environment
/// 3. Generates orders until SIGINT/SIGTERM, then drains
pub async fn run() -> Result<()> {
    core_config::tracing::install_color_eyre();
    let environment = Environment::from_env();
    core_config::tracing::init_tracing(&environment);

    stream_pipeline::init_metrics().wrap_err("Failed to initialize metrics")?;

    info!(name = env!("CARGO_PKG_NAME"), version = env!("CARGO_PKG_VERSION"), "Starting stream relay");

    let health_port: u16 =
        env_parse_or("RELAY_HEALTH_PORT", 8083).wrap_err("Invalid RELAY_HEALTH_PORT")?;
    let tick_ms: u64 = env_parse_or("RELAY_TICK_MS", 500).wrap_err("Invalid RELAY_TICK_MS")?;

    let daemon_settings = ProducerDaemonSettings::from_named_env(STREAM)
        .wrap_err("Failed to load producer daemon settings")?;
    let consumer_settings =
        ConsumerSettings::from_named_env(STREAM).wrap_err("Failed to load consumer settings")?;

    let relay = Relay::new(Arc::new(InMemoryInput::new()), daemon_settings, consumer_settings)?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let health_state = relay.health_state();
    let health_cancel = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port, health_cancel).await {
            error!(error = %e, "Health server failed");
        }
    });

    let tick = Duration::from_millis(tick_ms);
    let relayed = relay
        .run(shutdown, move |producer, cancel| generate_orders(producer, tick, cancel))
        .await?;

    info!(relayed, "Stream relay stopped");
    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_pipeline::AggregateMessageMode;

    #[tokio::test]
    async fn test_relay_delivers_every_order() {
        let daemon_settings = ProducerDaemonSettings::new()
            .with_aggregation_size(3)
            .with_batch_size(2)
            .with_runner_count(2);
        let consumer_settings = ConsumerSettings::new()
            .with_runner_count(2)
            .with_aggregate_message_mode(AggregateMessageMode::AtLeastOnce);

        let relay = Relay::new(Arc::new(InMemoryInput::new()), daemon_settings, consumer_settings).unwrap();
        let shutdown = CancellationToken::new();

        let relayed = relay
            .run(shutdown.clone(), move |producer, _cancel| async move {
                for id in 1..=10 {
                    producer.write_one(&Order { id, amount_cents: 100 }, &[]).await.unwrap();
                }
                shutdown.cancel();
            })
            .await
            .unwrap();

        assert_eq!(relayed, 10);
    }

    #[tokio::test]
    async fn test_health_state_lists_components() {
        let relay = Relay::new(
            Arc::new(InMemoryInput::new()),
            ProducerDaemonSettings::new(),
            ConsumerSettings::new(),
        )
        .unwrap();

        let state = relay.health_state();
        let checks = state.checks();
        let names: Vec<_> = checks.iter().map(|(name, _)| *name).collect();

        assert_eq!(names, vec!["producer_daemon", "consumer"]);
        assert!(!checks[0].1);
    }
}
