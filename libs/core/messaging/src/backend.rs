//! Contracts between the pipeline and concrete queue backends.
//!
//! Backends (SQS, SNS, Kinesis, Kafka, Redis lists, files, in-memory) plug in
//! by implementing [`Output`], [`Input`] and optionally
//! [`AcknowledgeableInput`]. Optional backend features are reported through
//! [`OutputCapabilities`] instead of separate marker traits.

use crate::error::StreamError;
use crate::message::{Batch, Message, WritableMessage};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Limits and features an output reports about itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputCapabilities {
    /// Largest accepted message in bytes
    pub max_message_size: Option<usize>,
    /// Largest accepted batch in messages
    pub max_batch_size: Option<usize>,
    /// Output routes records by explicit hash key / partition key
    pub partitioned: bool,
}

impl OutputCapabilities {
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn partitioned(mut self) -> Self {
        self.partitioned = true;
        self
    }
}

/// Destination for finished batches.
#[async_trait]
pub trait Output: Send + Sync {
    /// Write a single message.
    async fn write_one(&self, msg: Arc<dyn WritableMessage>) -> Result<(), StreamError> {
        self.write(vec![msg]).await
    }

    /// Write a batch of messages in one request.
    async fn write(&self, batch: Batch) -> Result<(), StreamError>;

    fn capabilities(&self) -> OutputCapabilities {
        OutputCapabilities::default()
    }
}

/// Source of messages.
///
/// `data` yields messages until the input is stopped or exhausted, after which
/// the receiver reports the channel as closed.
#[async_trait]
pub trait Input: Send + Sync {
    /// Drive the input until it is stopped, exhausted or `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> Result<(), StreamError>;

    /// Stop producing data. Must be safe to call more than once.
    fn stop(&self);

    fn data(&self) -> async_channel::Receiver<Message>;

    fn is_healthy(&self) -> bool {
        true
    }

    /// The backend redelivers unacknowledged messages on its own.
    fn has_native_retry(&self) -> bool {
        false
    }
}

/// Input that needs explicit acknowledgement of consumed messages.
#[async_trait]
pub trait AcknowledgeableInput: Send + Sync {
    async fn ack(&self, msg: &Message, ack: bool) -> Result<(), StreamError>;

    /// `acks[i]` is the decision for `msgs[i]`.
    async fn ack_batch(&self, msgs: &[Message], acks: &[bool]) -> Result<(), StreamError>;
}

/// Side-channel that accepts failed messages for later redelivery.
#[async_trait]
pub trait RetryHandler: Send + Sync {
    async fn put(&self, msg: Message) -> Result<(), StreamError>;
}
