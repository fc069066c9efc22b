//! Encoding of models into message bodies and back.

use crate::compression::CompressionType;
use crate::error::StreamError;
use crate::message::{Attributes, Message, ATTRIBUTE_COMPRESSION, ATTRIBUTE_ENCODING};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;

/// Body encoding, named by its attribute value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum EncodingType {
    #[default]
    #[strum(serialize = "application/json")]
    Json,
    #[strum(serialize = "text/plain")]
    Text,
}

impl EncodingType {
    pub fn parse(value: &str) -> Result<Self, StreamError> {
        Self::from_str(value)
            .map_err(|_| StreamError::config(format!("unknown encoding '{value}'")))
    }

    fn encode_body<T: Serialize + ?Sized>(&self, model: &T) -> Result<Vec<u8>, StreamError> {
        match self {
            EncodingType::Json => Ok(serde_json::to_vec(model)?),
            EncodingType::Text => match serde_json::to_value(model)? {
                Value::String(s) => Ok(s.into_bytes()),
                other => Err(StreamError::encoding(format!(
                    "text encoding needs a string model, got {}",
                    json_kind(&other)
                ))),
            },
        }
    }

    fn decode_body<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T, StreamError> {
        match self {
            EncodingType::Json => Ok(serde_json::from_slice(body)?),
            EncodingType::Text => {
                let text = String::from_utf8(body.to_vec())
                    .map_err(|e| StreamError::encoding(format!("body is not utf-8: {e}")))?;
                Ok(serde_json::from_value(Value::String(text))?)
            }
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Encodes models into [`Message`]s and decodes them back.
///
/// Compressed bodies are base64 encoded so they stay valid strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct MessageEncoder {
    encoding: EncodingType,
    compression: CompressionType,
}

impl MessageEncoder {
    pub fn new(encoding: EncodingType, compression: CompressionType) -> Self {
        Self {
            encoding,
            compression,
        }
    }

    pub fn json() -> Self {
        Self::default()
    }

    pub fn encoding(&self) -> EncodingType {
        self.encoding
    }

    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Encode `model` and merge every attribute set into the message.
    ///
    /// A key set by the encoder or by an earlier set is an error.
    pub fn encode<T: Serialize + ?Sized>(
        &self,
        model: &T,
        attribute_sets: &[&Attributes],
    ) -> Result<Message, StreamError> {
        let mut attributes = Attributes::new();

        let mut body = self.encoding.encode_body(model)?;
        attributes.insert(ATTRIBUTE_ENCODING.to_string(), self.encoding.to_string());

        if !self.compression.is_none() {
            let compressed = self.compression.compress(&body)?;
            body = STANDARD.encode(compressed).into_bytes();
            attributes.insert(ATTRIBUTE_COMPRESSION.to_string(), self.compression.to_string());
        }

        for set in attribute_sets {
            for (key, value) in set.iter() {
                if attributes.contains_key(key) {
                    return Err(StreamError::encoding(format!(
                        "duplicate attribute '{key}' on message"
                    )));
                }
                attributes.insert(key.clone(), value.clone());
            }
        }

        let body = String::from_utf8(body)
            .map_err(|e| StreamError::encoding(format!("encoded body is not utf-8: {e}")))?;

        Ok(Message::new(body, attributes))
    }

    /// Decode the body of `msg` into `T`.
    ///
    /// The returned attributes no longer carry the compression attribute.
    pub fn decode<T: DeserializeOwned>(&self, msg: &Message) -> Result<(T, Attributes), StreamError> {
        let mut attributes = msg.attributes.clone();
        let mut body = msg.body.as_bytes().to_vec();

        if let Some(compression) = attributes.remove(ATTRIBUTE_COMPRESSION) {
            let compression = CompressionType::parse(&compression)
                .map_err(|_| StreamError::encoding(format!("unknown compression '{compression}'")))?;
            let decoded = STANDARD
                .decode(&body)
                .map_err(|e| StreamError::encoding(format!("can not base64 decode the body: {e}")))?;
            body = compression.decompress(&decoded)?;
        }

        let encoding = match attributes.get(ATTRIBUTE_ENCODING) {
            Some(value) => EncodingType::parse(value)
                .map_err(|_| StreamError::encoding(format!("unknown encoding '{value}'")))?,
            None => self.encoding,
        };

        let model = encoding.decode_body(&body)?;

        Ok((model, attributes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Order {
        id: u32,
        sku: String,
    }

    #[test]
    fn test_encode_json() {
        let encoder = MessageEncoder::json();
        let msg = encoder
            .encode(&Order { id: 1, sku: "a".into() }, &[])
            .unwrap();

        assert_eq!(msg.body, r#"{"id":1,"sku":"a"}"#);
        assert_eq!(msg.attribute(ATTRIBUTE_ENCODING), Some("application/json"));
        assert!(!msg.has_attribute(ATTRIBUTE_COMPRESSION));
    }

    #[test]
    fn test_gzip_encode_decode() {
        let encoder = MessageEncoder::json().with_compression(CompressionType::Gzip);
        let order = Order { id: 7, sku: "sku-7".into() };

        let msg = encoder.encode(&order, &[]).unwrap();
        assert_eq!(msg.attribute(ATTRIBUTE_COMPRESSION), Some("application/gzip"));

        let (decoded, attributes): (Order, _) = MessageEncoder::json().decode(&msg).unwrap();
        assert_eq!(decoded, order);
        assert!(!attributes.contains_key(ATTRIBUTE_COMPRESSION));
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let mut set = Attributes::new();
        set.insert(ATTRIBUTE_ENCODING.to_string(), "text/plain".to_string());

        let err = MessageEncoder::json().encode(&1, &[&set]).unwrap_err();
        assert!(err.to_string().contains("duplicate attribute"));
    }

    #[test]
    fn test_text_encoding() {
        let encoder = MessageEncoder::new(EncodingType::Text, CompressionType::None);
        let msg = encoder.encode("plain body", &[]).unwrap();
        assert_eq!(msg.body, "plain body");

        let (decoded, _): (String, _) = encoder.decode(&msg).unwrap();
        assert_eq!(decoded, "plain body");

        assert!(encoder.encode(&Order { id: 1, sku: "a".into() }, &[]).is_err());
    }

    #[test]
    fn test_decode_unknown_encoding() {
        let msg = Message::new("x", Attributes::new()).with_attribute(ATTRIBUTE_ENCODING, "application/x-proto");
        let result: Result<(String, _), _> = MessageEncoder::json().decode(&msg);
        assert!(matches!(result, Err(StreamError::Encoding(_))));
    }
}
