//! In-memory backends.
//!
//! Useful for local development and as test doubles: [`InMemoryOutput`] records
//! every batch it receives, [`InMemoryInput`] serves messages published to it
//! and records acknowledgements.

use crate::backend::{AcknowledgeableInput, Input, Output, OutputCapabilities};
use crate::error::StreamError;
use crate::message::{Batch, Message};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Output that keeps every batch in memory.
#[derive(Debug, Default)]
pub struct InMemoryOutput {
    capabilities: OutputCapabilities,
    batches: Mutex<Vec<Batch>>,
}

impl InMemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(capabilities: OutputCapabilities) -> Self {
        Self {
            capabilities,
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn batches(&self) -> Vec<Batch> {
        lock(&self.batches).clone()
    }

    /// Every written message that is a full [`Message`], in write order.
    pub fn messages(&self) -> Vec<Message> {
        lock(&self.batches)
            .iter()
            .flatten()
            .filter_map(|m| m.as_message().cloned())
            .collect()
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.batches).iter().map(Vec::len).collect()
    }
}

#[async_trait]
impl Output for InMemoryOutput {
    async fn write(&self, batch: Batch) -> Result<(), StreamError> {
        debug!(size = batch.len(), "in-memory output received batch");
        lock(&self.batches).push(batch);
        Ok(())
    }

    fn capabilities(&self) -> OutputCapabilities {
        self.capabilities
    }
}

/// Input fed by [`InMemoryInput::publish`].
///
/// Stopping closes the data channel; messages already published are still
/// delivered before the receiver reports it closed.
pub struct InMemoryInput {
    tx: async_channel::Sender<Message>,
    rx: async_channel::Receiver<Message>,
    stopped: CancellationToken,
    healthy: AtomicBool,
    native_retry: bool,
    acks: Mutex<Vec<(Message, bool)>>,
    ack_batches: Mutex<Vec<Vec<(Message, bool)>>>,
}

impl Default for InMemoryInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInput {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self {
            tx,
            rx,
            stopped: CancellationToken::new(),
            healthy: AtomicBool::new(true),
            native_retry: false,
            acks: Mutex::new(Vec::new()),
            ack_batches: Mutex::new(Vec::new()),
        }
    }

    pub fn with_native_retry(mut self) -> Self {
        self.native_retry = true;
        self
    }

    /// Queue a message. Returns false once the input is stopped.
    pub fn publish(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.is_cancelled()
    }

    /// Single acknowledgements in call order.
    pub fn acks(&self) -> Vec<(Message, bool)> {
        lock(&self.acks).clone()
    }

    /// Batch acknowledgements, one entry per `ack_batch` call.
    pub fn ack_batches(&self) -> Vec<Vec<(Message, bool)>> {
        lock(&self.ack_batches).clone()
    }
}

#[async_trait]
impl Input for InMemoryInput {
    async fn run(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = self.stopped.cancelled() => {}
        }
        self.tx.close();
        Ok(())
    }

    fn stop(&self) {
        self.stopped.cancel();
        self.tx.close();
    }

    fn data(&self) -> async_channel::Receiver<Message> {
        self.rx.clone()
    }

    fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    fn has_native_retry(&self) -> bool {
        self.native_retry
    }
}

#[async_trait]
impl AcknowledgeableInput for InMemoryInput {
    async fn ack(&self, msg: &Message, ack: bool) -> Result<(), StreamError> {
        lock(&self.acks).push((msg.clone(), ack));
        Ok(())
    }

    async fn ack_batch(&self, msgs: &[Message], acks: &[bool]) -> Result<(), StreamError> {
        let entries = msgs.iter().cloned().zip(acks.iter().copied()).collect();
        lock(&self.ack_batches).push(entries);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WritableMessage;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_output_records_batches() {
        let output = InMemoryOutput::new();
        let batch: Batch = vec![Arc::new(Message::json("1")), Arc::new(Message::json("2"))];

        output.write(batch).await.unwrap();
        output.write_one(Arc::new(Message::json("3"))).await.unwrap();

        assert_eq!(output.batch_sizes(), vec![2, 1]);
        let bodies: Vec<_> = output.messages().into_iter().map(|m| m.body).collect();
        assert_eq!(bodies, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_input_drains_after_stop() {
        let input = InMemoryInput::new();
        assert!(input.publish(Message::json("a")));
        assert!(input.publish(Message::json("b")));

        input.stop();
        assert!(!input.publish(Message::json("c")));

        let data = input.data();
        assert_eq!(data.recv().await.unwrap().body, "a");
        assert_eq!(data.recv().await.unwrap().body, "b");
        assert!(data.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_run_returns_on_cancel() {
        let input = InMemoryInput::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        input.run(cancel).await.unwrap();
        assert!(input.data().recv().await.is_err());
    }

    #[tokio::test]
    async fn test_acks_recorded() {
        let input = InMemoryInput::new();
        let msg = Message::json("x");

        input.ack(&msg, true).await.unwrap();
        input
            .ack_batch(&[msg.clone(), msg.clone()], &[true, false])
            .await
            .unwrap();

        assert_eq!(input.acks(), vec![(msg.clone(), true)]);
        assert_eq!(input.ack_batches(), vec![vec![(msg.clone(), true), (msg, false)]]);
        assert!(Message::json("x").as_message().is_some());
    }
}
