//! Shared ingestion machinery of [`Consumer`](crate::Consumer) and
//! [`BatchConsumer`](crate::BatchConsumer).
//!
//! The primary input and the retry handler's input are forwarded into one
//! rendezvous channel that `runner_count` workers drain. Either source ending
//! stops both, and the consumer finishes once the workers have drained
//! everything that was already read.

use crate::acknowledge::{Acknowledger, ConsumerData, ConsumerInput, Source};
use crate::metrics::ConsumerMetrics;
use crate::retry::RetryRoute;
use crate::settings::{AggregateMessageMode, ConsumerSettings};
use crate::supervisor::TaskGroup;
use async_trait::async_trait;
use messaging::{Message, MessageEncoder, StreamError, ATTRIBUTE_RETRY, ATTRIBUTE_RETRY_ID};
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Processing strategy plugged into [`BaseConsumer::run`].
#[async_trait]
pub(crate) trait ConsumerWorker: Send + Sync + 'static {
    /// Background task of the callback, stopped with the consumer.
    async fn run_callback(&self, cancel: CancellationToken) -> Result<(), StreamError>;

    /// Drain `data` until it is closed. `cancel` fires when a sibling task failed.
    async fn consume(
        &self,
        runner: usize,
        data: async_channel::Receiver<ConsumerData>,
        cancel: CancellationToken,
    ) -> Result<(), StreamError>;
}

/// Tag `msg` as a retry, keeping an existing retry id.
///
/// Returns the retry id.
pub fn tag_for_retry(msg: &mut Message) -> String {
    msg.attributes
        .entry(ATTRIBUTE_RETRY.to_string())
        .or_insert_with(|| "true".to_string());

    msg.attributes
        .entry(ATTRIBUTE_RETRY_ID.to_string())
        .or_insert_with(|| Uuid::new_v4().to_string())
        .clone()
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub struct BaseConsumer {
    name: String,
    settings: ConsumerSettings,
    input: ConsumerInput,
    retry: RetryRoute,
    encoder: MessageEncoder,
    acknowledger: Acknowledger,
    metrics: ConsumerMetrics,
    processed: AtomicU64,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl BaseConsumer {
    /// Consumer state with the retry route derived from `settings.retry`.
    pub fn new(
        name: impl Into<String>,
        settings: ConsumerSettings,
        input: ConsumerInput,
    ) -> Result<Self, StreamError> {
        let retry = RetryRoute::from_settings(&settings.retry);
        Self::with_retry(name, settings, input, retry)
    }

    /// Consumer state with an explicit retry route.
    ///
    /// The route is only used for puts when `settings.retry.enabled` is set;
    /// its input is always consumed.
    pub fn with_retry(
        name: impl Into<String>,
        settings: ConsumerSettings,
        input: ConsumerInput,
        retry: RetryRoute,
    ) -> Result<Self, StreamError> {
        settings.validate()?;
        let name = name.into();

        Ok(Self {
            encoder: MessageEncoder::new(settings.encoding, Default::default()),
            acknowledger: Acknowledger::new(name.clone()),
            metrics: ConsumerMetrics::new(name.clone()),
            name,
            settings,
            input,
            retry,
            processed: AtomicU64::new(0),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Both sources report healthy.
    pub fn is_healthy(&self) -> bool {
        self.input.input().is_healthy() && self.retry.input.input().is_healthy()
    }

    pub(crate) fn encoder(&self) -> &MessageEncoder {
        &self.encoder
    }

    pub(crate) fn acknowledger(&self) -> &Acknowledger {
        &self.acknowledger
    }

    pub(crate) fn aggregate_mode(&self) -> AggregateMessageMode {
        self.settings.aggregate_message_mode
    }

    pub(crate) async fn run<W: ConsumerWorker>(
        self: &Arc<Self>,
        worker: Arc<W>,
        cancel: CancellationToken,
    ) -> Result<(), StreamError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StreamError::config(format!("consumer {} was already started", self.name)));
        }

        info!(
            consumer = %self.name,
            runners = self.settings.runner_count,
            retry = self.settings.retry.enabled,
            "running consumer"
        );

        // fires on task failure or once all workers are done, never on plain shutdown
        let mut group = TaskGroup::new(&CancellationToken::new());
        let (data_tx, data_rx) = async_channel::bounded::<ConsumerData>(1);
        let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

        for (src, input) in [
            (Source::Input, self.input.clone()),
            (Source::Retry, self.retry.input.clone()),
        ] {
            let source = input.input().clone();
            group.spawn(format!("{}-{src}-run", self.name), move |c| async move {
                source.run(c).await
            });

            let base = self.clone();
            let tx = data_tx.clone();
            group.spawn(format!("{}-{src}-ingest", self.name), move |_| async move {
                base.ingest(src, input, tx).await;
                Ok(())
            });
        }
        drop(data_tx);

        for runner in 0..self.settings.runner_count {
            let worker = worker.clone();
            let data = data_rx.clone();
            let done = done_tx.clone();
            group.spawn(format!("{}-runner-{runner}", self.name), move |c| async move {
                let _done = done;
                worker.consume(runner, data, c).await
            });
        }
        drop(data_rx);
        drop(done_tx);

        let base = self.clone();
        group.spawn(format!("{}-stop-consuming", self.name), move |c| async move {
            while done_rx.recv().await.is_some() {}
            base.stop_incoming_data();
            c.cancel();
            Ok(())
        });

        let base = self.clone();
        group.spawn(format!("{}-shutdown", self.name), move |c| async move {
            tokio::select! {
                _ = c.cancelled() => {}
                _ = cancel.cancelled() => {}
            }
            base.stop_incoming_data();
            Ok(())
        });

        let base = self.clone();
        group.spawn(format!("{}-log-counter", self.name), move |c| async move {
            base.log_consume_counter(c).await;
            Ok(())
        });

        group.spawn(format!("{}-callback", self.name), move |c| async move {
            worker.run_callback(c).await
        });

        let result = group.wait().await;
        info!(consumer = %self.name, "leaving consumer");

        result
    }

    async fn ingest(&self, src: Source, input: ConsumerInput, tx: async_channel::Sender<ConsumerData>) {
        let data = input.input().data();

        while let Ok(msg) = data.recv().await {
            if tx.send(ConsumerData::new(msg, src, input.clone())).await.is_err() {
                break;
            }
        }

        debug!(consumer = %self.name, source = %src, "ingestion ended");
        self.stop_incoming_data();
    }

    /// Stop both sources. Only the first call has an effect.
    pub(crate) fn stop_incoming_data(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(consumer = %self.name, "stopping incoming data");
        self.retry.input.input().stop();
        self.input.input().stop();
    }

    async fn log_consume_counter(&self, cancel: CancellationToken) {
        let period = self.settings.idle_timeout;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let processed = self.processed.swap(0, Ordering::SeqCst);
                    info!(consumer = %self.name, count = processed, "processed {processed} messages");
                }
            }
        }
    }

    /// Whether a failed message should bypass the retry handler.
    ///
    /// Inputs with native retry redeliver on their own. Constituents of an
    /// aggregate acknowledged up front can only come back through the handler.
    pub(crate) fn skip_retry(&self, aggregated: bool) -> bool {
        let native = self.input.input().has_native_retry();

        if aggregated {
            self.settings.aggregate_message_mode == AggregateMessageMode::AtLeastOnce && native
        } else {
            native
        }
    }

    /// Hand a failed message to the retry handler. Failures are only logged.
    pub(crate) async fn retry(&self, msg: &Message) {
        if !self.settings.retry.enabled {
            return;
        }

        let mut msg = msg.clone();
        let retry_id = tag_for_retry(&mut msg);

        match self.retry.handler.put(msg).await {
            Ok(()) => {
                self.metrics.retried();
                debug!(consumer = %self.name, retry_id = %retry_id, "message queued for retry");
            }
            Err(e) => {
                self.metrics.retry_failed();
                error!(
                    consumer = %self.name,
                    retry_id = %retry_id,
                    error = %e,
                    "could not put the message into the retry handler"
                );
            }
        }
    }

    pub(crate) fn handle_error(&self, err: &StreamError, context: &str) {
        error!(
            consumer = %self.name,
            category = %err.category(),
            error = %err,
            "{context}"
        );
        self.metrics.error(err.category());
    }

    pub(crate) fn decode_aggregate(&self, msg: &Message) -> Result<Vec<Message>, StreamError> {
        let (constituents, _) = self.encoder.decode::<Vec<Message>>(msg)?;
        Ok(constituents)
    }

    pub(crate) fn record_processed(&self, count: usize, duration: Duration) {
        self.processed.fetch_add(count as u64, Ordering::SeqCst);
        self.metrics.processed(count, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RetrySettings;
    use messaging::{InMemoryInput, Input};

    #[test]
    fn test_retry_tagging_is_stable() {
        let mut msg = Message::json("1");

        let first = tag_for_retry(&mut msg);
        let second = tag_for_retry(&mut msg);

        assert_eq!(first, second);
        assert_eq!(msg.attribute(ATTRIBUTE_RETRY), Some("true"));
        assert_eq!(msg.attribute(ATTRIBUTE_RETRY_ID), Some(first.as_str()));
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new("bang".to_string())), "bang");
        assert_eq!(panic_message(Box::new(42)), "unknown panic");
    }

    #[test]
    fn test_stop_incoming_data_stops_both_sources() {
        let primary = Arc::new(InMemoryInput::new());
        let retry_input = Arc::new(InMemoryInput::new());
        let retry = RetryRoute {
            handler: Arc::new(crate::retry::NoopRetryHandler::new()),
            input: ConsumerInput::new(retry_input.clone()),
        };

        let base = BaseConsumer::with_retry(
            "test",
            ConsumerSettings::new(),
            ConsumerInput::new(primary.clone()),
            retry,
        )
        .unwrap();

        base.stop_incoming_data();
        base.stop_incoming_data();

        assert!(primary.is_stopped());
        assert!(retry_input.is_stopped());
    }

    #[test]
    fn test_skip_retry_rules() {
        let native = Arc::new(InMemoryInput::new().with_native_retry());
        let settings = ConsumerSettings::new().with_retry(RetrySettings::enabled(Duration::from_secs(1)));

        let at_least_once = BaseConsumer::new("test", settings.clone(), ConsumerInput::new(native.clone())).unwrap();
        assert!(at_least_once.skip_retry(false));
        assert!(at_least_once.skip_retry(true));

        let at_most_once = BaseConsumer::new(
            "test",
            settings.with_aggregate_message_mode(AggregateMessageMode::AtMostOnce),
            ConsumerInput::new(native),
        )
        .unwrap();
        assert!(at_most_once.skip_retry(false));
        assert!(!at_most_once.skip_retry(true));

        let plain = BaseConsumer::new(
            "test",
            ConsumerSettings::new(),
            ConsumerInput::new(Arc::new(InMemoryInput::new())),
        )
        .unwrap();
        assert!(!plain.skip_retry(false));
    }

    #[test]
    fn test_health_follows_inputs() {
        let primary = Arc::new(InMemoryInput::new());
        let base = BaseConsumer::new("test", ConsumerSettings::new(), ConsumerInput::new(primary.clone())).unwrap();

        assert!(base.is_healthy());
        primary.set_healthy(false);
        assert!(!base.is_healthy());
        assert!(!primary.has_native_retry());
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let result = BaseConsumer::new(
            "test",
            ConsumerSettings::new().with_runner_count(0),
            ConsumerInput::new(Arc::new(InMemoryInput::new())),
        );
        assert!(matches!(result, Err(StreamError::Config(_))));
    }
}
