//! Bounded handoff between the daemon's writers and its output workers.

use messaging::Batch;
use tracing::warn;

/// Close-safe bounded queue of batches.
///
/// Writing to or closing an already closed channel logs a warning instead of
/// failing, so shutdown races between writers and the daemon stay harmless.
#[derive(Clone)]
pub struct OutputChannel {
    name: String,
    tx: async_channel::Sender<Batch>,
    rx: async_channel::Receiver<Batch>,
}

impl OutputChannel {
    pub fn new(name: impl Into<String>, buffer_size: usize) -> Self {
        let (tx, rx) = async_channel::bounded(buffer_size.max(1));
        Self {
            name: name.into(),
            tx,
            rx,
        }
    }

    /// Queue a batch, waiting while the channel is full.
    ///
    /// Returns false if the channel was closed and the batch was dropped.
    pub async fn write(&self, batch: Batch) -> bool {
        let size = batch.len();
        match self.tx.send(batch).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    daemon = %self.name,
                    batch_size = size,
                    "dropped batch because the output channel is already closed"
                );
                false
            }
        }
    }

    /// Next batch, or `None` once the channel is closed and drained.
    pub async fn read(&self) -> Option<Batch> {
        self.rx.recv().await.ok()
    }

    /// Close the channel. Returns true only for the call that closed it.
    pub fn close(&self) -> bool {
        let closed = self.tx.close();
        if !closed {
            warn!(daemon = %self.name, "output channel was already closed");
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::Message;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    #[tokio::test]
    async fn test_write_then_read() {
        let channel = OutputChannel::new("test", 2);
        assert!(channel.write(vec![Message::json("1").into_writable()]).await);

        let batch = channel.read().await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[derive(Clone, Default)]
    struct WarningCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarningCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_close_is_idempotent() {
        let warnings = WarningCounter::default();
        let subscriber = tracing_subscriber::registry().with(warnings.clone());

        tracing::subscriber::with_default(subscriber, || {
            let channel = OutputChannel::new("test", 1);

            assert!(channel.close());
            assert_eq!(warnings.0.load(Ordering::SeqCst), 0);

            assert!(!channel.close());
            assert!(channel.is_closed());
        });

        assert_eq!(warnings.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_write_after_close_drops() {
        let channel = OutputChannel::new("test", 1);
        channel.close();

        assert!(!channel.write(vec![Message::json("1").into_writable()]).await);
        assert!(channel.read().await.is_none());
    }

    #[tokio::test]
    async fn test_close_drains_pending_batches() {
        let channel = OutputChannel::new("test", 4);
        channel.write(vec![Message::json("1").into_writable()]).await;
        channel.write(vec![Message::json("2").into_writable()]).await;
        channel.close();

        assert!(channel.read().await.is_some());
        assert!(channel.read().await.is_some());
        assert!(channel.read().await.is_none());
    }
}
