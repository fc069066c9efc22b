//! Producer daemon
//!
//! Buffers writes in the background and hands finished batches to an [`Output`].
//!
//! ## Features
//!
//! - **Aggregation**: packs many messages into one aggregate when
//!   `aggregation_size > 1`, using the partitioned aggregator for partitioned outputs
//! - **Batching**: groups wire messages by count and encoded bytes
//! - **Idle flush**: a ticker flushes whatever is buffered every `interval`
//! - **Parallel output**: `runner_count` workers drain a bounded channel
//! - **Graceful shutdown**: cancellation flushes everything before the workers exit
//!
//! ## Example
//!
//! ```ignore
//! let daemon = Arc::new(ProducerDaemon::new("orders", settings, output)?);
//! tokio::spawn(daemon.clone().run(cancel.clone()));
//!
//! daemon.write_one(Message::json(r#"{"id":1}"#).into_writable()).await?;
//! ```

use crate::aggregator::{AggregateFlush, Aggregator, MessageAggregator};
use crate::batcher::Batcher;
use crate::metrics::DaemonMetrics;
use crate::output_channel::OutputChannel;
use crate::partitioned_aggregator::PartitionedAggregator;
use crate::settings::ProducerDaemonSettings;
use crate::supervisor::TaskGroup;
use async_trait::async_trait;
use messaging::{Batch, Message, Output, StreamError, WritableMessage, ATTRIBUTE_AGGREGATE};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of a [`ProducerDaemon`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum DaemonStatus {
    NotStarted = 0,
    Running = 1,
    Draining = 2,
    Stopped = 3,
}

struct DaemonState {
    aggregator: Option<Box<dyn Aggregator>>,
    batcher: Batcher,
    closed: bool,
}

pub struct ProducerDaemon {
    name: String,
    settings: ProducerDaemonSettings,
    output: Arc<dyn Output>,
    state: Mutex<DaemonState>,
    channel: OutputChannel,
    ticker_reset: Notify,
    status: AtomicU8,
    metrics: DaemonMetrics,
}

impl ProducerDaemon {
    /// Create a daemon writing to `output`.
    ///
    /// Settings are clamped to the limits the output reports. A partitioned
    /// output with more than one bucket gets the partitioned aggregator.
    pub fn new(
        name: impl Into<String>,
        settings: ProducerDaemonSettings,
        output: Arc<dyn Output>,
    ) -> Result<Self, StreamError> {
        let settings = clamp_to_output(settings, output.as_ref());
        settings.validate()?;

        let aggregator: Option<Box<dyn Aggregator>> = if !settings.aggregation_enabled() {
            None
        } else if output.capabilities().partitioned && settings.partition_bucket_count > 1 {
            Some(Box::new(PartitionedAggregator::new(&settings)?))
        } else {
            Some(Box::new(MessageAggregator::new(&settings)))
        };

        Self::build(name.into(), settings, output, aggregator)
    }

    /// Create a daemon with a caller-supplied aggregator.
    ///
    /// The aggregator is only used when `aggregation_size > 1`.
    pub fn with_aggregator(
        name: impl Into<String>,
        settings: ProducerDaemonSettings,
        output: Arc<dyn Output>,
        aggregator: Box<dyn Aggregator>,
    ) -> Result<Self, StreamError> {
        let settings = clamp_to_output(settings, output.as_ref());
        settings.validate()?;

        let aggregator = settings.aggregation_enabled().then_some(aggregator);
        Self::build(name.into(), settings, output, aggregator)
    }

    fn build(
        name: String,
        settings: ProducerDaemonSettings,
        output: Arc<dyn Output>,
        aggregator: Option<Box<dyn Aggregator>>,
    ) -> Result<Self, StreamError> {
        let batcher = Batcher::new(&settings);
        let channel = OutputChannel::new(name.clone(), settings.buffer_size);

        Ok(Self {
            metrics: DaemonMetrics::new(name.clone()),
            name,
            output,
            state: Mutex::new(DaemonState {
                aggregator,
                batcher,
                closed: false,
            }),
            channel,
            ticker_reset: Notify::new(),
            status: AtomicU8::new(DaemonStatus::NotStarted as u8),
            settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Effective settings after clamping to the output's limits.
    pub fn settings(&self) -> &ProducerDaemonSettings {
        &self.settings
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus::from_repr(self.status.load(Ordering::SeqCst)).unwrap_or(DaemonStatus::Stopped)
    }

    /// Run the output workers and the idle ticker until `cancel` fires.
    ///
    /// On shutdown everything still buffered is flushed and handed to the
    /// output before this returns. A daemon can only be run once.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), StreamError> {
        if self
            .status
            .compare_exchange(
                DaemonStatus::NotStarted as u8,
                DaemonStatus::Running as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(StreamError::config(format!(
                "producer daemon {} was already started",
                self.name
            )));
        }

        info!(
            daemon = %self.name,
            runners = self.settings.runner_count,
            interval_ms = self.settings.interval.as_millis() as u64,
            "starting producer daemon"
        );

        let mut group = TaskGroup::new(&cancel);

        // output loops only end once the channel is closed, so they must be
        // running before anything can cancel the group
        for i in 0..self.settings.runner_count {
            let daemon = self.clone();
            group.spawn(format!("{}-output-{i}", self.name), move |_| async move {
                daemon.output_loop().await
            });
        }

        let daemon = self.clone();
        group.spawn(format!("{}-ticker", self.name), move |cancel| async move {
            daemon.ticker_loop(cancel).await
        });

        group.token().cancelled().await;

        if !cancel.is_cancelled() {
            // a worker failed; closing the channel releases writers blocked on it
            warn!(daemon = %self.name, "producer daemon task failed, draining");
            self.channel.close();
        }

        let closed = self.close().await;
        let joined = group.wait().await;
        self.status.store(DaemonStatus::Stopped as u8, Ordering::SeqCst);

        info!(daemon = %self.name, "producer daemon stopped");

        closed.map_err(|e| StreamError::backend(format!("error on close: {e}")))?;
        joined
    }

    async fn ticker_loop(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        let interval = self.settings.interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = self.ticker_reset.notified() => ticker.reset(),
                _ = ticker.tick() => {
                    let mut state = self.state.lock().await;
                    if let Err(e) = self.flush_all(&mut state).await {
                        error!(daemon = %self.name, error = %e, "can not flush all messages");
                    }
                }
            }
        }
    }

    async fn output_loop(&self) -> Result<(), StreamError> {
        loop {
            let start = Instant::now();
            let Some(batch) = self.channel.read().await else {
                return Ok(());
            };
            let idle = start.elapsed().min(self.settings.interval);
            let size = batch.len();

            // in-flight writes are not tied to cancellation, the channel close ends this loop
            if let Err(e) = self.output.write(batch).await {
                self.metrics.output_error();

                if e.is_canceled() {
                    warn!(
                        daemon = %self.name,
                        batch_size = size,
                        "can not write messages to output because of canceled context"
                    );
                } else {
                    error!(
                        daemon = %self.name,
                        batch_size = size,
                        error = %e,
                        "can not write messages to output"
                    );
                }
            }

            self.metrics.batch_size(size);
            self.metrics.idle(idle);
        }
    }

    async fn write_batch(&self, batch: Batch) -> Result<(), StreamError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if state.closed {
            return Err(StreamError::Closed(format!("producer daemon {}", self.name)));
        }

        if let Some(msg) = batch.iter().find(|msg| msg.as_message().is_none()) {
            return Err(StreamError::encoding(format!(
                "can not apply aggregation in producer {}: expected a Message, got {msg:?}",
                self.name
            )));
        }

        self.metrics.messages_written(batch.len());

        // flushes produced before a failing aggregator write still go out
        let (ready, aggregation) = self.apply_aggregation(state, batch);

        let mut dropped = 0;
        for msg in ready {
            for flushed in state.batcher.append(msg)? {
                self.ticker_reset.notify_one();
                let size = flushed.len();
                if !self.channel.write(flushed).await {
                    dropped += size;
                }
            }
        }

        aggregation.map_err(|e| StreamError::encoding(format!("can not apply aggregation in producer {}: {e}", self.name)))?;

        if dropped > 0 {
            return Err(StreamError::Closed(format!(
                "output channel of producer daemon {}, dropped {dropped} messages",
                self.name
            )));
        }

        Ok(())
    }

    /// Feed `batch` through the aggregator. Every element must be a [`Message`].
    ///
    /// Returns the wire messages ready for batching, and the first aggregator
    /// error. Messages after the failing one are not written.
    fn apply_aggregation(&self, state: &mut DaemonState, batch: Batch) -> (Batch, Result<(), StreamError>) {
        let Some(aggregator) = state.aggregator.as_mut() else {
            return (batch, Ok(()));
        };

        let mut ready = Vec::new();

        for msg in &batch {
            let Some(message) = msg.as_message() else {
                continue;
            };

            match aggregator.write(message) {
                Ok(flushes) => {
                    for flush in flushes {
                        self.metrics.aggregate_size(flush.message_count);
                        ready.push(self.aggregate_message(flush).into_writable());
                    }
                }
                Err(e) => return (ready, Err(e)),
            }
        }

        (ready, Ok(()))
    }

    fn aggregate_message(&self, flush: AggregateFlush) -> Message {
        let mut msg = Message::json(flush.body);
        msg.attributes.extend(self.settings.message_attributes.clone());
        msg.attributes.extend(flush.attributes);
        msg.with_attribute(ATTRIBUTE_AGGREGATE, "true")
    }

    /// Flush the aggregator into the batcher, then the batcher into the channel.
    async fn flush_all(&self, state: &mut DaemonState) -> Result<(), StreamError> {
        if let Some(aggregator) = state.aggregator.as_mut() {
            let flushes = aggregator
                .flush()
                .map_err(|e| StreamError::encoding(format!("can not flush aggregation: {e}")))?;

            for flush in flushes {
                if flush.message_count == 0 {
                    continue;
                }

                self.metrics.aggregate_size(flush.message_count);
                let msg = self.aggregate_message(flush).into_writable();

                for flushed in state.batcher.append(msg)? {
                    self.channel.write(flushed).await;
                }
            }
        }

        let batch = state.batcher.flush();
        if !batch.is_empty() {
            self.channel.write(batch).await;
        }

        Ok(())
    }

    async fn close(&self) -> Result<(), StreamError> {
        let mut guard = self.state.lock().await;
        if guard.closed {
            return Ok(());
        }

        guard.closed = true;
        self.status.store(DaemonStatus::Draining as u8, Ordering::SeqCst);
        debug!(daemon = %self.name, "draining producer daemon");

        let result = self.flush_all(&mut guard).await;
        if !self.channel.is_closed() {
            self.channel.close();
        }

        result.map_err(|e| StreamError::backend(format!("can not flush all messages: {e}")))
    }
}

fn clamp_to_output(mut settings: ProducerDaemonSettings, output: &dyn Output) -> ProducerDaemonSettings {
    let capabilities = output.capabilities();

    if let Some(max) = capabilities.max_batch_size {
        settings.batch_size = settings.batch_size.min(max);
    }

    if let Some(max) = capabilities.max_message_size {
        if settings.aggregation_max_size == 0 || settings.aggregation_max_size > max {
            settings.aggregation_max_size = max;
        }
        if settings.batch_max_size == 0 || settings.batch_max_size > max {
            settings.batch_max_size = max;
        }
    }

    settings
}

#[async_trait]
impl Output for ProducerDaemon {
    async fn write_one(&self, msg: Arc<dyn WritableMessage>) -> Result<(), StreamError> {
        self.write_batch(vec![msg]).await
    }

    async fn write(&self, batch: Batch) -> Result<(), StreamError> {
        self.write_batch(batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::{
        CompressionType, InMemoryOutput, OutputCapabilities, RawJsonMessage,
        ATTRIBUTE_AGGREGATE_COUNT, ATTRIBUTE_KINESIS_EXPLICIT_HASH_KEY,
    };
    use mockall::mock;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    mock! {
        FailingOutput {}

        #[async_trait]
        impl Output for FailingOutput {
            async fn write(&self, batch: Batch) -> Result<(), StreamError>;
        }
    }

    struct PanickingOutput;

    #[async_trait]
    impl Output for PanickingOutput {
        async fn write(&self, _batch: Batch) -> Result<(), StreamError> {
            panic!("output exploded");
        }
    }

    fn settings(batch_size: usize, aggregation_size: usize) -> ProducerDaemonSettings {
        ProducerDaemonSettings::new()
            .with_interval(Duration::from_secs(3600))
            .with_buffer_size(1)
            .with_runner_count(1)
            .with_batch_size(batch_size)
            .with_aggregation_size(aggregation_size)
    }

    fn start(daemon: ProducerDaemon) -> (Arc<ProducerDaemon>, CancellationToken, JoinHandle<Result<(), StreamError>>) {
        let daemon = Arc::new(daemon);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(daemon.clone().run(cancel.clone()));
        (daemon, cancel, handle)
    }

    fn messages(bodies: &[&str]) -> Batch {
        bodies.iter().map(|b| Message::json(*b).into_writable()).collect()
    }

    fn bodies(batch: &Batch) -> Vec<String> {
        batch
            .iter()
            .map(|m| m.as_message().unwrap().body.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_run_and_stop_without_messages() {
        let output = Arc::new(InMemoryOutput::new());
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings(1, 1), output.clone()).unwrap());

        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert!(output.batches().is_empty());
        assert_eq!(daemon.status(), DaemonStatus::Stopped);
    }

    #[tokio::test]
    async fn test_write_batch_splits_by_batch_size() {
        let output = Arc::new(InMemoryOutput::new());
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings(2, 1), output.clone()).unwrap());

        daemon.write(messages(&["1", "2", "3"])).await.unwrap();

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let batches = output.batches();
        assert_eq!(batches.len(), 2);
        assert_eq!(bodies(&batches[0]), vec!["1", "2"]);
        assert_eq!(bodies(&batches[1]), vec!["3"]);
    }

    #[tokio::test]
    async fn test_remaining_messages_flushed_on_close() {
        let output = Arc::new(InMemoryOutput::new());
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings(3, 1), output.clone()).unwrap());

        daemon.write(messages(&["1", "2"])).await.unwrap();
        assert!(output.batches().is_empty());

        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(output.batch_sizes(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_flushes_idle_buffer() {
        let output = Arc::new(InMemoryOutput::new());
        let settings = settings(3, 1).with_interval(Duration::from_secs(1));
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings, output.clone()).unwrap());

        daemon.write(messages(&["1", "2"])).await.unwrap();

        for _ in 0..50 {
            if !output.batches().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        assert_eq!(output.batch_sizes(), vec![2]);

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(output.batch_sizes(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_flush_resets_idle_ticker() {
        let output = Arc::new(InMemoryOutput::new());
        let settings = settings(2, 1).with_interval(Duration::from_secs(10));
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings, output.clone()).unwrap());

        tokio::time::sleep(Duration::from_secs(6)).await;
        daemon.write(messages(&["1", "2"])).await.unwrap();
        daemon.write(messages(&["3"])).await.unwrap();

        // the full batch at 6s pushes the next tick from 10s to 16s
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(output.batch_sizes(), vec![2]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(output.batch_sizes(), vec![2, 1]);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_aggregation() {
        let output = Arc::new(InMemoryOutput::new());
        let settings = settings(10, 3).with_message_attribute("service", "orders");
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings, output.clone()).unwrap());

        daemon.write(messages(&["1", "2", "3", "4"])).await.unwrap();

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let written = output.messages();
        assert_eq!(written.len(), 2);

        let counts: Vec<_> = written
            .iter()
            .map(|m| m.attribute(ATTRIBUTE_AGGREGATE_COUNT).unwrap().to_string())
            .collect();
        assert_eq!(counts, vec!["3", "1"]);

        for msg in &written {
            assert!(msg.is_aggregate());
            assert_eq!(msg.attribute("service"), Some("orders"));
        }

        let first: Vec<Message> = serde_json::from_str(&written[0].body).unwrap();
        let constituents: Vec<_> = first.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(constituents, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_compressed_aggregate_is_marked() {
        let output = Arc::new(InMemoryOutput::new());
        let settings = settings(10, 2).with_compression(CompressionType::Gzip);
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings, output.clone()).unwrap());

        daemon.write(messages(&["1", "2"])).await.unwrap();

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let written = output.messages();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].attribute("compression"), Some("application/gzip"));
    }

    #[tokio::test]
    async fn test_partitioned_output_uses_bucket_keys() {
        let output = Arc::new(InMemoryOutput::with_capabilities(
            OutputCapabilities::default().partitioned(),
        ));
        let settings = settings(10, 2).with_partition_bucket_count(4);
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings, output.clone()).unwrap());

        let keyed: Batch = (0..2)
            .map(|_| {
                Message::json("{}")
                    .with_attribute(ATTRIBUTE_KINESIS_EXPLICIT_HASH_KEY, "1")
                    .into_writable()
            })
            .collect();
        daemon.write(keyed).await.unwrap();

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let written = output.messages();
        assert_eq!(written.len(), 1);
        assert_eq!(
            written[0].attribute(ATTRIBUTE_KINESIS_EXPLICIT_HASH_KEY),
            Some("127605887595351923798765477786913079294")
        );
    }

    #[tokio::test]
    async fn test_settings_clamped_to_output() {
        let output = Arc::new(InMemoryOutput::with_capabilities(
            OutputCapabilities::default()
                .with_max_batch_size(1)
                .with_max_message_size(1024),
        ));
        let daemon = ProducerDaemon::new("test", settings(10, 1), output).unwrap();

        assert_eq!(daemon.settings().batch_size, 1);
        assert_eq!(daemon.settings().aggregation_max_size, 1024);
        assert_eq!(daemon.settings().batch_max_size, 1024);
    }

    #[tokio::test]
    async fn test_write_after_close_fails() {
        let output = Arc::new(InMemoryOutput::new());
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings(1, 1), output).unwrap());

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let err = daemon.write(messages(&["1"])).await.unwrap_err();
        assert!(matches!(err, StreamError::Closed(_)));
    }

    #[tokio::test]
    async fn test_rejects_raw_messages() {
        let output = Arc::new(InMemoryOutput::new());
        let daemon = ProducerDaemon::new("test", settings(1, 1), output).unwrap();

        let err = daemon
            .write_one(Arc::new(RawJsonMessage::new("{}")))
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Encoding(_)));
    }

    #[tokio::test]
    async fn test_rejected_batch_keeps_earlier_writes() {
        let output = Arc::new(InMemoryOutput::new());
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings(10, 2), output.clone()).unwrap());

        daemon.write_one(Message::json("0").into_writable()).await.unwrap();

        let mixed: Batch = vec![Message::json("1").into_writable(), Arc::new(RawJsonMessage::new("{}"))];
        let err = daemon.write(mixed).await.unwrap_err();
        assert!(matches!(err, StreamError::Encoding(_)));

        cancel.cancel();
        handle.await.unwrap().unwrap();

        let delivered: Vec<String> = output
            .messages()
            .iter()
            .flat_map(|m| serde_json::from_str::<Vec<Message>>(&m.body).unwrap())
            .map(|m| m.body)
            .collect();
        assert_eq!(delivered, vec!["0"]);
    }

    #[tokio::test]
    async fn test_output_panic_drains_and_stops_daemon() {
        let (daemon, _cancel, handle) =
            start(ProducerDaemon::new("test", settings(1, 1), Arc::new(PanickingOutput)).unwrap());

        // the first batch kills the only worker; later writers must not hang
        let written = tokio::time::timeout(Duration::from_secs(5), daemon.write(messages(&["1", "2", "3"])))
            .await
            .unwrap();
        assert!(matches!(written, Ok(()) | Err(StreamError::Closed(_))));

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(StreamError::Panic(_))));
        assert_eq!(daemon.status(), DaemonStatus::Stopped);

        let err = daemon.write_one(Message::json("4").into_writable()).await.unwrap_err();
        assert!(matches!(err, StreamError::Closed(_)));
    }

    #[tokio::test]
    async fn test_output_errors_do_not_stop_daemon() {
        let mut output = MockFailingOutput::new();
        output
            .expect_write()
            .times(2)
            .returning(|_| Err(StreamError::backend("unavailable")));

        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings(1, 1), Arc::new(output)).unwrap());

        daemon.write(messages(&["1", "2"])).await.unwrap();

        cancel.cancel();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let output = Arc::new(InMemoryOutput::new());
        let (daemon, cancel, handle) = start(ProducerDaemon::new("test", settings(1, 1), output).unwrap());

        while daemon.status() != DaemonStatus::Running {
            tokio::task::yield_now().await;
        }

        let err = daemon.clone().run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StreamError::Config(_)));

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let output = Arc::new(InMemoryOutput::new());
        let result = ProducerDaemon::new("test", settings(1, 1).with_runner_count(0), output);
        assert!(matches!(result, Err(StreamError::Config(_))));
    }
}
