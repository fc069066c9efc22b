//! Message body compression.

use crate::error::StreamError;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use std::str::FromStr;

/// Compression applied to a message body, named by its attribute value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum CompressionType {
    #[default]
    #[strum(serialize = "none")]
    None,
    #[strum(serialize = "application/gzip")]
    Gzip,
}

impl CompressionType {
    /// Parse a compression name, failing with a configuration error.
    pub fn parse(value: &str) -> Result<Self, StreamError> {
        Self::from_str(value)
            .map_err(|_| StreamError::config(format!("unknown compression type '{value}'")))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, CompressionType::None)
    }

    pub fn compress(&self, body: &[u8]) -> Result<Vec<u8>, StreamError> {
        match self {
            CompressionType::None => Ok(body.to_vec()),
            CompressionType::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(body)?;
                Ok(encoder.finish()?)
            }
        }
    }

    pub fn decompress(&self, body: &[u8]) -> Result<Vec<u8>, StreamError> {
        match self {
            CompressionType::None => Ok(body.to_vec()),
            CompressionType::Gzip => {
                let mut decoder = GzDecoder::new(body);
                let mut out = Vec::new();
                decoder
                    .read_to_end(&mut out)
                    .map_err(|e| StreamError::encoding(format!("can not gunzip body: {e}")))?;
                Ok(out)
            }
        }
    }
}
