//! Per-message consumer
//!
//! Decodes every message into the callback's model and acknowledges it based
//! on the callback's result.
//!
//! # Features
//!
//! - **Aggregates**: aggregate messages are split into their constituents,
//!   the wrapper is acknowledged once as a unit
//! - **Retry**: failed or panicking messages go to the retry handler unless
//!   the input redelivers natively
//! - **Panic isolation**: a panicking callback only fails its message
//!
//! # Example
//!
//! ```rust,ignore
//! use stream_pipeline::{Consumer, ConsumerCallback, ConsumerInput, ConsumerSettings};
//!
//! struct OrderCallback;
//!
//! #[async_trait]
//! impl ConsumerCallback for OrderCallback {
//!     type Model = Order;
//!
//!     async fn consume(&self, order: Order, _attributes: Attributes) -> Result<bool, StreamError> {
//!         store(order).await?;
//!         Ok(true)
//!     }
//! }
//!
//! let consumer = Consumer::new("orders", settings, ConsumerInput::acknowledgeable(input), OrderCallback)?;
//! consumer.run(cancel).await?;
//! ```

use crate::acknowledge::{ConsumerData, ConsumerInput};
use crate::consumer_base::{panic_message, BaseConsumer, ConsumerWorker};
use crate::retry::RetryRoute;
use crate::settings::{AggregateMessageMode, ConsumerSettings};
use async_trait::async_trait;
use futures::FutureExt;
use messaging::{Attributes, Message, StreamError};
use serde::de::DeserializeOwned;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Business logic of a [`Consumer`].
#[async_trait]
pub trait ConsumerCallback: Send + Sync + 'static {
    type Model: DeserializeOwned + Send + 'static;

    /// Handle one decoded message.
    ///
    /// `Ok(true)` acknowledges the message. `Ok(false)` and errors nack it
    /// and send it down the retry path.
    async fn consume(&self, model: Self::Model, attributes: Attributes) -> Result<bool, StreamError>;

    /// Background task running alongside the consumer.
    async fn run(&self, _cancel: CancellationToken) -> Result<(), StreamError> {
        Ok(())
    }
}

pub struct Consumer<C: ConsumerCallback> {
    base: Arc<BaseConsumer>,
    runner: Arc<MessageRunner<C>>,
}

impl<C: ConsumerCallback> Consumer<C> {
    pub fn new(
        name: impl Into<String>,
        settings: ConsumerSettings,
        input: ConsumerInput,
        callback: C,
    ) -> Result<Self, StreamError> {
        Ok(Self::from_base(BaseConsumer::new(name, settings, input)?, callback))
    }

    pub fn with_retry(
        name: impl Into<String>,
        settings: ConsumerSettings,
        input: ConsumerInput,
        retry: RetryRoute,
        callback: C,
    ) -> Result<Self, StreamError> {
        Ok(Self::from_base(
            BaseConsumer::with_retry(name, settings, input, retry)?,
            callback,
        ))
    }

    fn from_base(base: BaseConsumer, callback: C) -> Self {
        let base = Arc::new(base);
        Self {
            runner: Arc::new(MessageRunner {
                base: base.clone(),
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

    /// Consume until both sources are exhausted or `cancel` fires.
    ///
    /// Messages already read when `cancel` fires are still processed.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        self.base.run(self.runner.clone(), cancel).await
    }
}

struct MessageRunner<C> {
    base: Arc<BaseConsumer>,
    callback: C,
}

#[async_trait]
impl<C: ConsumerCallback> ConsumerWorker for MessageRunner<C> {
    async fn run_callback(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        self.callback.run(cancel).await
    }

    async fn consume(
        &self,
        runner: usize,
        data: async_channel::Receiver<ConsumerData>,
        cancel: CancellationToken,
    ) -> Result<(), StreamError> {
        while let Ok(cdata) = data.recv().await {
            if cdata.msg.is_aggregate() {
                self.process_aggregate(cdata, &cancel).await;
            } else {
                self.process_single(cdata, &cancel).await;
            }
        }

        debug!(consumer = %self.base.name(), runner, "consume loop is ending");
        Ok(())
    }
}

impl<C: ConsumerCallback> MessageRunner<C> {
    async fn process_single(&self, cdata: ConsumerData, cancel: &CancellationToken) {
        let start = Instant::now();

        let ack = self.process(&cdata.msg, cancel, self.base.skip_retry(false)).await;
        self.base.acknowledger().acknowledge(&cdata, ack).await;

        self.base.record_processed(1, start.elapsed());
    }

    async fn process_aggregate(&self, cdata: ConsumerData, cancel: &CancellationToken) {
        let constituents = match self.base.decode_aggregate(&cdata.msg) {
            Ok(constituents) => constituents,
            Err(e) => {
                self.base
                    .handle_error(&e, "an error occurred during disaggregation of the message");
                self.base.acknowledger().acknowledge(&cdata, false).await;
                return;
            }
        };

        let mode = self.base.aggregate_mode();
        if mode == AggregateMessageMode::AtMostOnce {
            self.base.acknowledger().acknowledge(&cdata, true).await;
        }

        let skip_retry = self.base.skip_retry(true);
        for msg in constituents {
            let start = Instant::now();
            self.process(&msg, cancel, skip_retry).await;
            self.base.record_processed(1, start.elapsed());
        }

        if mode == AggregateMessageMode::AtLeastOnce {
            self.base.acknowledger().acknowledge(&cdata, true).await;
        }
    }

    /// Returns the ack decision for `msg`.
    async fn process(&self, msg: &Message, cancel: &CancellationToken, skip_retry: bool) -> bool {
        // a sibling task failed, hand the message back instead of processing it
        if cancel.is_cancelled() {
            if !skip_retry {
                self.base.retry(msg).await;
            }
            return false;
        }

        let (model, attributes) = match self.base.encoder().decode::<C::Model>(msg) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.base.handle_error(&e, "can not decode the message into the model");
                return false;
            }
        };

        let result = AssertUnwindSafe(self.callback.consume(model, attributes))
            .catch_unwind()
            .await;

        let ack = match result {
            Ok(Ok(ack)) => ack,
            Ok(Err(e)) => {
                self.base
                    .handle_error(&e, "an error occurred during the consume operation");
                false
            }
            Err(payload) => {
                let e = StreamError::Panic(format!("consume: {}", panic_message(payload)));
                self.base
                    .handle_error(&e, "the consume operation panicked");
                false
            }
        };

        if !ack && !skip_retry {
            self.base.retry(msg).await;
        }

        ack
    }
}
