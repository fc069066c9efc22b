//! Retry handlers
//!
//! A retry handler takes messages a consumer failed to process and delivers
//! them again later through its own [`Input`]. Three flavours exist:
//!
//! - [`NoopRetryHandler`]: drops retries, its input never produces data
//! - [`DelayQueueRetryHandler`]: keeps messages in process for `after`
//! - [`OutputRetryHandler`]: writes messages to a delaying queue (SQS style)
//!
//! [`RetryRoute`] pairs a handler with the input it is read back from.

use crate::acknowledge::ConsumerInput;
use crate::settings::RetrySettings;
use async_trait::async_trait;
use futures::StreamExt;
use messaging::{
    Input, Message, Output, RetryHandler, StreamError, ATTRIBUTE_RETRY_SQS,
    ATTRIBUTE_SQS_DELAY_SECONDS,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::{debug, warn};

/// A retry handler and the input its messages come back on.
#[derive(Clone)]
pub struct RetryRoute {
    pub handler: Arc<dyn RetryHandler>,
    pub input: ConsumerInput,
}

impl RetryRoute {
    pub fn noop() -> Self {
        let handler = Arc::new(NoopRetryHandler::new());
        Self {
            handler: handler.clone(),
            input: ConsumerInput::new(handler),
        }
    }

    pub fn delay_queue(after: Duration) -> Self {
        let handler = Arc::new(DelayQueueRetryHandler::new(after));
        Self {
            handler: handler.clone(),
            input: ConsumerInput::new(handler),
        }
    }

    /// Retries written to `output` and read back from `input`.
    pub fn output(output: Arc<dyn Output>, input: ConsumerInput, after: Duration) -> Self {
        Self {
            handler: Arc::new(OutputRetryHandler::new(output, after)),
            input,
        }
    }

    /// In-process delay queue when retries are enabled, noop otherwise.
    pub fn from_settings(settings: &RetrySettings) -> Self {
        if settings.enabled {
            Self::delay_queue(settings.after)
        } else {
            Self::noop()
        }
    }
}

/// Retry handler that drops every message.
///
/// Also an [`Input`] without data so consumers can treat a disabled retry the
/// same way as an enabled one.
pub struct NoopRetryHandler {
    tx: async_channel::Sender<Message>,
    rx: async_channel::Receiver<Message>,
    stopped: CancellationToken,
}

impl Default for NoopRetryHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl NoopRetryHandler {
    pub fn new() -> Self {
        let (tx, rx) = async_channel::bounded(1);
        Self {
            tx,
            rx,
            stopped: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl RetryHandler for NoopRetryHandler {
    async fn put(&self, _msg: Message) -> Result<(), StreamError> {
        Ok(())
    }
}

#[async_trait]
impl Input for NoopRetryHandler {
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
}

/// In-process retry handler holding messages in a [`DelayQueue`].
///
/// Messages come back on the handler's own input once `after` has passed.
/// Messages still waiting when the handler stops are dropped with a warning.
pub struct DelayQueueRetryHandler {
    after: Duration,
    put_tx: mpsc::UnboundedSender<Message>,
    put_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    out_tx: async_channel::Sender<Message>,
    out_rx: async_channel::Receiver<Message>,
    stopped: CancellationToken,
}

impl DelayQueueRetryHandler {
    pub fn new(after: Duration) -> Self {
        let (put_tx, put_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = async_channel::unbounded();

        Self {
            after,
            put_tx,
            put_rx: Mutex::new(Some(put_rx)),
            out_tx,
            out_rx,
            stopped: CancellationToken::new(),
        }
    }

    pub fn after(&self) -> Duration {
        self.after
    }

    fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<Message>> {
        self.put_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl RetryHandler for DelayQueueRetryHandler {
    async fn put(&self, msg: Message) -> Result<(), StreamError> {
        if self.stopped.is_cancelled() {
            return Err(StreamError::retry("delay queue retry handler is stopped"));
        }

        self.put_tx
            .send(msg)
            .map_err(|_| StreamError::retry("delay queue retry handler is stopped"))
    }
}

#[async_trait]
impl Input for DelayQueueRetryHandler {
    async fn run(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        let Some(mut put_rx) = self.take_receiver() else {
            return Err(StreamError::config("delay queue retry handler can only run once"));
        };

        let mut queue: DelayQueue<Message> = DelayQueue::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.stopped.cancelled() => break,
                Some(msg) = put_rx.recv() => {
                    queue.insert(msg, self.after);
                }
                Some(expired) = queue.next(), if !queue.is_empty() => {
                    if self.out_tx.send(expired.into_inner()).await.is_err() {
                        break;
                    }
                }
            }
        }

        put_rx.close();
        while let Ok(msg) = put_rx.try_recv() {
            queue.insert(msg, self.after);
        }

        if !queue.is_empty() {
            warn!(pending = queue.len(), "dropping messages still waiting for retry");
        }

        self.out_tx.close();
        debug!("delay queue retry handler stopped");
        Ok(())
    }

    fn stop(&self) {
        self.stopped.cancel();
    }

    fn data(&self) -> async_channel::Receiver<Message> {
        self.out_rx.clone()
    }
}

/// Retry handler writing to an output whose queue redelivers after a delay.
///
/// Messages already carrying the retry marker are skipped, the queue's own
/// redelivery takes care of them.
pub struct OutputRetryHandler {
    output: Arc<dyn Output>,
    after: Duration,
}

impl OutputRetryHandler {
    pub fn new(output: Arc<dyn Output>, after: Duration) -> Self {
        Self { output, after }
    }
}

#[async_trait]
impl RetryHandler for OutputRetryHandler {
    async fn put(&self, mut msg: Message) -> Result<(), StreamError> {
        if msg.has_attribute(ATTRIBUTE_RETRY_SQS) {
            return Ok(());
        }

        msg.attributes
            .insert(ATTRIBUTE_RETRY_SQS.to_string(), "true".to_string());
        msg.attributes.insert(
            ATTRIBUTE_SQS_DELAY_SECONDS.to_string(),
            self.after.as_secs().to_string(),
        );

        self.output
            .write_one(msg.into_writable())
            .await
            .map_err(|e| StreamError::retry(format!("can not write the message to the output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::InMemoryOutput;

    #[tokio::test]
    async fn test_noop_input_only_closes_on_stop() {
        let handler = NoopRetryHandler::new();
        handler.put(Message::json("1")).await.unwrap();

        let data = handler.data();
        assert!(data.try_recv().is_err());
        assert!(!data.is_closed());

        handler.stop();
        assert!(data.recv().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_queue_redelivers_after_delay() {
        let handler = Arc::new(DelayQueueRetryHandler::new(Duration::from_secs(30)));
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let handler = handler.clone();
            let cancel = cancel.clone();
            async move { handler.run(cancel).await }
        });

        let start = tokio::time::Instant::now();
        handler.put(Message::json("1")).await.unwrap();

        let msg = handler.data().recv().await.unwrap();
        assert_eq!(msg.body, "1");
        assert!(start.elapsed() >= Duration::from_secs(30));

        cancel.cancel();
        run.await.unwrap().unwrap();
        assert!(handler.data().recv().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_queue_drops_pending_on_stop() {
        let handler = Arc::new(DelayQueueRetryHandler::new(Duration::from_secs(60)));
        let run = tokio::spawn({
            let handler = handler.clone();
            async move { handler.run(CancellationToken::new()).await }
        });

        handler.put(Message::json("1")).await.unwrap();
        tokio::task::yield_now().await;

        handler.stop();
        run.await.unwrap().unwrap();

        assert!(handler.data().recv().await.is_err());
        assert!(handler.put(Message::json("2")).await.is_err());
    }

    #[tokio::test]
    async fn test_delay_queue_runs_once() {
        let handler = Arc::new(DelayQueueRetryHandler::new(Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        handler.run(cancel.clone()).await.unwrap();
        assert!(matches!(handler.run(cancel).await, Err(StreamError::Config(_))));
    }

    #[tokio::test]
    async fn test_output_handler_marks_message() {
        let output = Arc::new(InMemoryOutput::new());
        let handler = OutputRetryHandler::new(output.clone(), Duration::from_secs(90));

        handler.put(Message::json("1")).await.unwrap();

        let written = output.messages();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].attribute(ATTRIBUTE_RETRY_SQS), Some("true"));
        assert_eq!(written[0].attribute(ATTRIBUTE_SQS_DELAY_SECONDS), Some("90"));
    }

    #[tokio::test]
    async fn test_output_handler_skips_marked_messages() {
        let output = Arc::new(InMemoryOutput::new());
        let handler = OutputRetryHandler::new(output.clone(), Duration::from_secs(90));

        handler
            .put(Message::json("1").with_attribute(ATTRIBUTE_RETRY_SQS, "true"))
            .await
            .unwrap();

        assert!(output.batches().is_empty());
    }

    #[test]
    fn test_route_from_settings() {
        let disabled = RetryRoute::from_settings(&RetrySettings::default());
        assert!(!disabled.input.input().has_native_retry());

        let enabled = RetryRoute::from_settings(&RetrySettings::enabled(Duration::from_secs(5)));
        assert!(enabled.input.acknowledger().is_none());
    }
}
