//! Batch consumer
//!
//! Every worker collects messages into its own buffer and hands them to the
//! callback as one batch once `batch_size` messages are buffered or no full
//! batch was reached within `idle_timeout`. Acknowledgements are issued per
//! originating input with one `ack_batch` call each.

use crate::acknowledge::{ConsumerData, ConsumerInput};
use crate::consumer_base::{panic_message, BaseConsumer, ConsumerWorker};
use crate::retry::RetryRoute;
use crate::settings::{AggregateMessageMode, BatchConsumerSettings, ConsumerSettings};
use async_trait::async_trait;
use futures::FutureExt;
use messaging::{Attributes, StreamError};
use serde::de::DeserializeOwned;
use std::mem;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Business logic of a [`BatchConsumer`].
#[async_trait]
pub trait BatchConsumerCallback: Send + Sync + 'static {
    type Model: DeserializeOwned + Send + 'static;

    /// Handle a batch. The returned vector holds one ack decision per model;
    /// missing decisions count as nacks.
    async fn consume(
        &self,
        models: Vec<Self::Model>,
        attributes: Vec<Attributes>,
    ) -> Result<Vec<bool>, StreamError>;

    async fn run(&self, _cancel: CancellationToken) -> Result<(), StreamError> {
        Ok(())
    }
}

pub struct BatchConsumer<C: BatchConsumerCallback> {
    base: Arc<BaseConsumer>,
    runner: Arc<BatchRunner<C>>,
}

impl<C: BatchConsumerCallback> BatchConsumer<C> {
    pub fn new(
        name: impl Into<String>,
        settings: ConsumerSettings,
        batch_settings: BatchConsumerSettings,
        input: ConsumerInput,
        callback: C,
    ) -> Result<Self, StreamError> {
        batch_settings.validate()?;
        let base = BaseConsumer::new(name, settings, input)?;
        Ok(Self::from_base(base, batch_settings, callback))
    }

    pub fn with_retry(
        name: impl Into<String>,
        settings: ConsumerSettings,
        batch_settings: BatchConsumerSettings,
        input: ConsumerInput,
        retry: RetryRoute,
        callback: C,
    ) -> Result<Self, StreamError> {
        batch_settings.validate()?;
        let base = BaseConsumer::with_retry(name, settings, input, retry)?;
        Ok(Self::from_base(base, batch_settings, callback))
    }

    fn from_base(base: BaseConsumer, settings: BatchConsumerSettings, callback: C) -> Self {
        let base = Arc::new(base);
        Self {
            runner: Arc::new(BatchRunner {
                base: base.clone(),
                settings,
                callback,
            }),
            base,
        }
    }

    pub fn base(&self) -> &Arc<BaseConsumer> {
        &self.base
    }

    pub fn name(&self) -> &str {
        self.base.name()
    }

    pub fn is_healthy(&self) -> bool {
        self.base.is_healthy()
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        self.base.run(self.runner.clone(), cancel).await
    }
}

struct BatchRunner<C> {
    base: Arc<BaseConsumer>,
    settings: BatchConsumerSettings,
    callback: C,
}

/// Messages buffered by one worker.
#[derive(Default)]
struct PendingBatch {
    items: Vec<ConsumerData>,
    /// Aggregates acknowledged once their constituents were processed
    wrappers: Vec<ConsumerData>,
}

#[async_trait]
impl<C: BatchConsumerCallback> ConsumerWorker for BatchRunner<C> {
    async fn run_callback(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        self.callback.run(cancel).await
    }

    async fn consume(
        &self,
        runner: usize,
        data: async_channel::Receiver<ConsumerData>,
        cancel: CancellationToken,
    ) -> Result<(), StreamError> {
        let idle = self.settings.idle_timeout;
        let mut ticker = tokio::time::interval_at(Instant::now() + idle, idle);
        let mut pending = PendingBatch::default();

        loop {
            let force = tokio::select! {
                received = data.recv() => match received {
                    Ok(cdata) => {
                        self.buffer(&mut pending, cdata).await;
                        false
                    }
                    Err(_) => break,
                },
                _ = ticker.tick() => true,
            };

            if force || pending.items.len() >= self.settings.batch_size {
                self.process_batch(&mut pending, &cancel).await;
                ticker.reset();
            }
        }

        self.process_batch(&mut pending, &cancel).await;
        debug!(consumer = %self.base.name(), runner, "batch consume loop is ending");

        Ok(())
    }
}

impl<C: BatchConsumerCallback> BatchRunner<C> {
    async fn buffer(&self, pending: &mut PendingBatch, cdata: ConsumerData) {
        if !cdata.msg.is_aggregate() {
            pending.items.push(cdata);
            return;
        }

        let constituents = match self.base.decode_aggregate(&cdata.msg) {
            Ok(constituents) => constituents,
            Err(e) => {
                self.base
                    .handle_error(&e, "an error occurred during disaggregation of the message");
                self.base.acknowledger().acknowledge(&cdata, false).await;
                return;
            }
        };

        pending
            .items
            .extend(constituents.into_iter().map(|msg| cdata.constituent(msg)));

        match self.base.aggregate_mode() {
            AggregateMessageMode::AtMostOnce => {
                self.base.acknowledger().acknowledge(&cdata, true).await;
            }
            AggregateMessageMode::AtLeastOnce => pending.wrappers.push(cdata),
        }
    }

    async fn process_batch(&self, pending: &mut PendingBatch, cancel: &CancellationToken) {
        let items = mem::take(&mut pending.items);
        let wrappers = mem::take(&mut pending.wrappers);

        if !items.is_empty() {
            let start = Instant::now();
            let mut acks = vec![false; items.len()];
            let mut retryable = vec![true; items.len()];

            // a sibling task failed, every buffered message goes back
            if !cancel.is_cancelled() {
                self.consume_batch(&items, &mut acks, &mut retryable).await;
            }

            self.base.acknowledger().acknowledge_batch(&items, &acks).await;

            for (i, item) in items.iter().enumerate() {
                if !acks[i] && retryable[i] && !self.base.skip_retry(item.aggregated) {
                    self.base.retry(&item.msg).await;
                }
            }

            self.base.record_processed(items.len(), start.elapsed());
        }

        for wrapper in &wrappers {
            self.base.acknowledger().acknowledge(wrapper, true).await;
        }
    }

    /// Fills in `acks` for every decodable item. Undecodable items are marked
    /// as not retryable.
    async fn consume_batch(&self, items: &[ConsumerData], acks: &mut [bool], retryable: &mut [bool]) {
        let mut models = Vec::with_capacity(items.len());
        let mut attributes = Vec::with_capacity(items.len());
        let mut decoded = Vec::with_capacity(items.len());

        for (i, item) in items.iter().enumerate() {
            match self.base.encoder().decode::<C::Model>(&item.msg) {
                Ok((model, attrs)) => {
                    models.push(model);
                    attributes.push(attrs);
                    decoded.push(i);
                }
                Err(e) => {
                    self.base
                        .handle_error(&e, "can not decode the message into the model");
                    retryable[i] = false;
                }
            }
        }

        if decoded.is_empty() {
            return;
        }

        let result = AssertUnwindSafe(self.callback.consume(models, attributes))
            .catch_unwind()
            .await;

        let decisions = match result {
            Ok(Ok(decisions)) => decisions,
            Ok(Err(e)) => {
                self.base
                    .handle_error(&e, "an error occurred during the consume batch operation");
                Vec::new()
            }
            Err(payload) => {
                let e = StreamError::Panic(format!("consume batch: {}", panic_message(payload)));
                self.base
                    .handle_error(&e, "the consume batch operation panicked");
                Vec::new()
            }
        };

        if !decisions.is_empty() && decisions.len() != decoded.len() {
            error!(
                consumer = %self.base.name(),
                expected = decoded.len(),
                actual = decisions.len(),
                "number of acks does not match number of messages in batch"
            );
        }

        for (j, i) in decoded.into_iter().enumerate() {
            acks[i] = decisions.get(j).copied().unwrap_or(false);
        }
    }
}
