//! Wire-level message model.
//!
//! A [`Message`] is an attribute map plus a string body. Its JSON form is
//! `{"attributes":{...},"body":"..."}` with attribute keys in sorted order, so
//! encoding the same message twice yields the same bytes.

use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Message attributes. Keys are unique and serialize in sorted order.
pub type Attributes = BTreeMap<String, String>;

/// A batch of wire messages handed to an output in one call.
pub type Batch = Vec<Arc<dyn WritableMessage>>;

pub const ATTRIBUTE_ENCODING: &str = "encoding";
pub const ATTRIBUTE_COMPRESSION: &str = "compression";
pub const ATTRIBUTE_AGGREGATE: &str = "goso.aggregate";
pub const ATTRIBUTE_AGGREGATE_COUNT: &str = "goso.aggregate.count";
pub const ATTRIBUTE_RETRY: &str = "goso.retry";
pub const ATTRIBUTE_RETRY_ID: &str = "goso.retry.id";
pub const ATTRIBUTE_RETRY_SQS: &str = "goso.retry.sqs";
pub const ATTRIBUTE_KINESIS_EXPLICIT_HASH_KEY: &str = "goso.kinesis.explicitHashKey";
pub const ATTRIBUTE_KINESIS_PARTITION_KEY: &str = "goso.kinesis.partitionKey";
pub const ATTRIBUTE_SQS_DELAY_SECONDS: &str = "sqsDelaySeconds";

/// Anything that can be put on the wire.
///
/// Both [`Message`] and [`RawJsonMessage`] implement this, so batching code does
/// not need to know whether a message was already encoded.
pub trait WritableMessage: Send + Sync + std::fmt::Debug {
    /// Wire bytes of the message.
    fn marshal_to_bytes(&self) -> Result<Vec<u8>, StreamError>;

    /// Wire form of the message as a string.
    fn marshal_to_string(&self) -> Result<String, StreamError>;

    /// Attributes, if the message still exposes them.
    fn attributes(&self) -> Option<&Attributes> {
        None
    }

    /// The full message, if this is one.
    fn as_message(&self) -> Option<&Message> {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub body: String,
}

impl Message {
    pub fn new(body: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            attributes,
            body: body.into(),
        }
    }

    /// A message with only the JSON encoding attribute set.
    pub fn json(body: impl Into<String>) -> Self {
        let mut attributes = Attributes::new();
        attributes.insert(
            ATTRIBUTE_ENCODING.to_string(),
            crate::encoding::EncodingType::Json.to_string(),
        );
        Self::new(body, attributes)
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn has_attribute(&self, key: &str) -> bool {
        self.attributes.contains_key(key)
    }

    /// True if the body is an aggregate of several messages.
    pub fn is_aggregate(&self) -> bool {
        self.has_attribute(ATTRIBUTE_AGGREGATE)
    }

    pub fn into_writable(self) -> Arc<dyn WritableMessage> {
        Arc::new(self)
    }
}

impl WritableMessage for Message {
    fn marshal_to_bytes(&self) -> Result<Vec<u8>, StreamError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn marshal_to_string(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }

    fn attributes(&self) -> Option<&Attributes> {
        Some(&self.attributes)
    }

    fn as_message(&self) -> Option<&Message> {
        Some(self)
    }
}

/// A message that is already in its wire form.
///
/// Outputs write `raw` as-is instead of encoding again. The attributes are kept
/// alongside for outputs that route on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawJsonMessage {
    attributes: Option<Attributes>,
    raw: String,
}

impl RawJsonMessage {
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            attributes: None,
            raw: raw.into(),
        }
    }

    pub fn with_attributes(raw: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            attributes: Some(attributes),
            raw: raw.into(),
        }
    }

    /// Encode a full message once and keep the result.
    pub fn from_message(msg: &Message) -> Result<Self, StreamError> {
        Ok(Self::with_attributes(
            msg.marshal_to_string()?,
            msg.attributes.clone(),
        ))
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }
}

impl WritableMessage for RawJsonMessage {
    fn marshal_to_bytes(&self) -> Result<Vec<u8>, StreamError> {
        Ok(self.raw.as_bytes().to_vec())
    }

    fn marshal_to_string(&self) -> Result<String, StreamError> {
        Ok(self.raw.clone())
    }

    fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_ref()
    }
}
