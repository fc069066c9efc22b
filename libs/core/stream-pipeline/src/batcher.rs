//! Grouping of wire messages into output batches.

use crate::settings::ProducerDaemonSettings;
use messaging::{Batch, RawJsonMessage, StreamError, WritableMessage};
use std::sync::Arc;

/// Collects messages into batches bounded by message count and encoded bytes.
///
/// Every returned batch stays within both caps unless it holds a single message
/// that alone exceeds the byte cap.
pub struct Batcher {
    max_messages: usize,
    /// 0 disables the byte cap
    max_bytes: usize,
    json_encoding: bool,
    batch: Batch,
    batch_bytes: usize,
}

impl Batcher {
    pub fn new(settings: &ProducerDaemonSettings) -> Self {
        Self {
            max_messages: settings.batch_size.max(1),
            max_bytes: settings.batch_max_size,
            json_encoding: false,
            batch: Vec::with_capacity(settings.batch_size),
            batch_bytes: 0,
        }
    }

    /// Store appended messages as pre-encoded JSON so outputs do not encode them again.
    pub fn with_json_encoding(mut self) -> Self {
        self.json_encoding = true;
        self
    }

    /// Add a message, returning any batches that became complete.
    ///
    /// The current batch is closed first if `msg` would overflow it; the new
    /// batch is closed right away if `msg` fills it.
    pub fn append(&mut self, msg: Arc<dyn WritableMessage>) -> Result<Vec<Batch>, StreamError> {
        let encoded = msg.marshal_to_bytes()?;
        let size = encoded.len();

        let msg: Arc<dyn WritableMessage> = if self.json_encoding {
            let raw = String::from_utf8(encoded)
                .map_err(|e| StreamError::encoding(format!("message is not valid utf-8: {e}")))?;
            match msg.attributes() {
                Some(attributes) => Arc::new(RawJsonMessage::with_attributes(raw, attributes.clone())),
                None => Arc::new(RawJsonMessage::new(raw)),
            }
        } else {
            msg
        };

        let mut batches = Vec::new();

        if !self.batch.is_empty() && self.would_overflow(size) {
            batches.push(self.flush());
        }

        self.batch.push(msg);
        self.batch_bytes += size;

        if self.is_full() {
            batches.push(self.flush());
        }

        Ok(batches)
    }

    /// Return the buffered batch and start a new one. May be empty.
    pub fn flush(&mut self) -> Batch {
        self.batch_bytes = 0;
        std::mem::replace(&mut self.batch, Vec::with_capacity(self.max_messages))
    }

    pub fn len(&self) -> usize {
        self.batch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    fn would_overflow(&self, size: usize) -> bool {
        self.batch.len() + 1 > self.max_messages
            || (self.max_bytes > 0 && self.batch_bytes + size > self.max_bytes)
    }

    fn is_full(&self) -> bool {
        self.batch.len() >= self.max_messages
            || (self.max_bytes > 0 && self.batch_bytes >= self.max_bytes)
    }
}
