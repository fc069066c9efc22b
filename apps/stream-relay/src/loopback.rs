//! Output that feeds an in-memory input.

use async_trait::async_trait;
use messaging::{Batch, InMemoryInput, Message, Output, OutputCapabilities, StreamError};
use std::sync::Arc;
use tracing::warn;

/// Publishes every written message to `queue`, like a queue backend would.
pub struct LoopbackOutput {
    queue: Arc<InMemoryInput>,
    capabilities: OutputCapabilities,
}

impl LoopbackOutput {
    pub fn new(queue: Arc<InMemoryInput>) -> Self {
        Self {
            queue,
            capabilities: OutputCapabilities::default()
                .with_max_batch_size(10)
                .with_max_message_size(256 * 1024),
        }
    }
}

#[async_trait]
impl Output for LoopbackOutput {
    async fn write(&self, batch: Batch) -> Result<(), StreamError> {
        for msg in batch {
            let msg = match msg.as_message() {
                Some(msg) => msg.clone(),
                None => serde_json::from_str::<Message>(&msg.marshal_to_string()?)?,
            };

            if !self.queue.publish(msg) {
                warn!("loopback queue is stopped, dropping message");
                return Err(StreamError::Closed("loopback queue".to_string()));
            }
        }

        Ok(())
    }

    fn capabilities(&self) -> OutputCapabilities {
        self.capabilities
    }
}
