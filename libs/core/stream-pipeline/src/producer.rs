//! Typed producer on top of an output or a producer daemon
//!
//! # Example
//!
//! ```rust,ignore
//! use stream_pipeline::{Producer, ProducerDaemon};
//!
//! let daemon = registry.provide("orders", || ProducerDaemon::new("orders", settings, output))?;
//! let producer = Producer::with_daemon("orders", MessageEncoder::json(), daemon);
//!
//! producer.write_one(&order, &[&attributes]).await?;
//! ```

use crate::daemon::{DaemonStatus, ProducerDaemon};
use messaging::{Attributes, Batch, CompressionType, MessageEncoder, Output, StreamError};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Encodes models into messages and writes them to an output.
pub struct Producer {
    name: String,
    encoder: MessageEncoder,
    output: Arc<dyn Output>,
    daemon: Option<Arc<ProducerDaemon>>,
}

impl Producer {
    /// Producer writing straight to `output`.
    pub fn new(name: impl Into<String>, encoder: MessageEncoder, output: Arc<dyn Output>) -> Self {
        Self {
            name: name.into(),
            encoder,
            output,
            daemon: None,
        }
    }

    /// Producer writing through a daemon.
    ///
    /// Messages are not compressed individually because the daemon compresses
    /// whole aggregates.
    pub fn with_daemon(name: impl Into<String>, encoder: MessageEncoder, daemon: Arc<ProducerDaemon>) -> Self {
        Self {
            name: name.into(),
            encoder: encoder.with_compression(CompressionType::None),
            output: daemon.clone(),
            daemon: Some(daemon),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoder(&self) -> &MessageEncoder {
        &self.encoder
    }

    pub async fn write_one<T: Serialize + ?Sized>(
        &self,
        model: &T,
        attribute_sets: &[&Attributes],
    ) -> Result<(), StreamError> {
        let msg = self.encode(model, attribute_sets)?;
        self.output.write_one(msg.into_writable()).await
    }

    pub async fn write<T: Serialize>(
        &self,
        models: &[T],
        attribute_sets: &[&Attributes],
    ) -> Result<(), StreamError> {
        let batch = models
            .iter()
            .map(|model| self.encode(model, attribute_sets).map(|m| m.into_writable()))
            .collect::<Result<Batch, _>>()?;

        self.output.write(batch).await
    }

    /// Run the attached daemon until `cancel` fires.
    ///
    /// Does nothing without a daemon or when the daemon is already running.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), StreamError> {
        match &self.daemon {
            Some(daemon) if daemon.status() == DaemonStatus::NotStarted => daemon.clone().run(cancel).await,
            Some(_) => {
                debug!(producer = %self.name, "producer daemon is already running");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn encode<T: Serialize + ?Sized>(
        &self,
        model: &T,
        attribute_sets: &[&Attributes],
    ) -> Result<messaging::Message, StreamError> {
        self.encoder
            .encode(model, attribute_sets)
            .map_err(|e| StreamError::encoding(format!("can not encode model into message: {e}")))
    }
}
