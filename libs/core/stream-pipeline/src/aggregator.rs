//! Aggregation of many messages into one wire message.
//!
//! An aggregate body is a JSON array of encoded [`Message`]s, optionally gzip
//! compressed and then base64 encoded. The aggregator predicts the compressed
//! size of the next message from the ratio observed on earlier flushes so that
//! bodies stay under the configured byte budget.

use crate::settings::ProducerDaemonSettings;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use flate2::write::GzEncoder;
use flate2::Compression;
use messaging::{
    Attributes, CompressionType, EncodingType, Message, StreamError, ATTRIBUTE_AGGREGATE_COUNT,
    ATTRIBUTE_COMPRESSION, ATTRIBUTE_ENCODING,
};
use std::io::{self, Write};

/// Bytes gzip may still hold internally after a write. Reserved from the byte
/// budget so the body stays within it once the stream is closed.
pub const GZIP_MAX_EXPECTED_BUFFER: usize = 8192;

const INITIAL_BUFFER_CAPACITY: usize = 128 * 1024;

/// Result of closing one aggregation window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregateFlush {
    pub attributes: Attributes,
    pub body: String,
    pub message_count: usize,
}

/// Packs messages into aggregate flushes.
#[cfg_attr(test, mockall::automock)]
pub trait Aggregator: Send {
    /// Add a message. Returns the flushes this write caused, if any.
    fn write(&mut self, msg: &Message) -> Result<Vec<AggregateFlush>, StreamError>;

    /// Close every open window, including empty ones.
    fn flush(&mut self) -> Result<Vec<AggregateFlush>, StreamError>;
}

enum AggregateWriter {
    Plain(Vec<u8>),
    Gzip(GzEncoder<Vec<u8>>),
}

impl AggregateWriter {
    fn new(compression: CompressionType, buffer: Vec<u8>) -> Self {
        match compression {
            CompressionType::None => AggregateWriter::Plain(buffer),
            CompressionType::Gzip => {
                AggregateWriter::Gzip(GzEncoder::new(buffer, Compression::default()))
            }
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            AggregateWriter::Plain(buffer) => {
                buffer.extend_from_slice(bytes);
                Ok(())
            }
            AggregateWriter::Gzip(encoder) => encoder.write_all(bytes),
        }
    }

    /// Push everything written so far into the underlying buffer.
    fn sync(&mut self) -> io::Result<()> {
        match self {
            AggregateWriter::Plain(_) => Ok(()),
            AggregateWriter::Gzip(encoder) => encoder.flush(),
        }
    }

    /// Bytes already emitted to the underlying buffer.
    fn buffered_len(&self) -> usize {
        match self {
            AggregateWriter::Plain(buffer) => buffer.len(),
            AggregateWriter::Gzip(encoder) => encoder.get_ref().len(),
        }
    }

    fn finish(self) -> io::Result<Vec<u8>> {
        match self {
            AggregateWriter::Plain(buffer) => Ok(buffer),
            AggregateWriter::Gzip(encoder) => encoder.finish(),
        }
    }
}

/// Size- and count-bounded aggregator for a single window.
pub struct MessageAggregator {
    max_messages: usize,
    max_bytes: usize,
    compression: CompressionType,
    attributes: Attributes,
    encode_base64: bool,

    writer: AggregateWriter,
    message_count: usize,
    uncompressed_bytes: usize,
    expected_compression_ratio: f32,
}

impl MessageAggregator {
    pub fn new(settings: &ProducerDaemonSettings) -> Self {
        Self::with_attributes(settings, Attributes::new())
    }

    /// Create an aggregator whose flushes carry `attributes`.
    pub fn with_attributes(settings: &ProducerDaemonSettings, mut attributes: Attributes) -> Self {
        let compression = settings.compression;
        let mut max_bytes = settings.aggregation_max_size;

        let encode_base64 = match compression {
            CompressionType::Gzip => {
                if max_bytes > GZIP_MAX_EXPECTED_BUFFER {
                    max_bytes -= GZIP_MAX_EXPECTED_BUFFER;
                }
                attributes.insert(ATTRIBUTE_COMPRESSION.to_string(), compression.to_string());
                true
            }
            CompressionType::None => false,
        };

        let mut aggregator = Self {
            max_messages: settings.aggregation_size,
            max_bytes,
            compression,
            attributes,
            encode_base64,
            writer: AggregateWriter::Plain(Vec::new()),
            message_count: 0,
            uncompressed_bytes: 0,
            // no data yet to estimate from, assume no savings
            expected_compression_ratio: 1.0,
        };
        aggregator.reset(Vec::with_capacity(INITIAL_BUFFER_CAPACITY));

        aggregator
    }

    pub fn message_count(&self) -> usize {
        self.message_count
    }

    pub fn expected_compression_ratio(&self) -> f32 {
        self.expected_compression_ratio
    }

    /// Close the current window and return it, even when it is empty.
    pub fn flush_aggregate(&mut self) -> Result<AggregateFlush, StreamError> {
        self.writer.write_all(b"]")?;
        self.uncompressed_bytes += 1;

        let writer = std::mem::replace(&mut self.writer, AggregateWriter::Plain(Vec::new()));
        let mut buffer = writer.finish()?;

        let body = if self.encode_base64 {
            STANDARD.encode(&buffer)
        } else {
            String::from_utf8(std::mem::take(&mut buffer))
                .map_err(|e| StreamError::encoding(format!("aggregate body is not utf-8: {e}")))?
        };

        let message_count = self.message_count;

        // ticker flushes without messages would skew the ratio
        if message_count > 0 {
            self.expected_compression_ratio = body.len() as f32 / self.uncompressed_bytes as f32;
        }

        buffer.clear();
        self.reset(buffer);

        let mut attributes = self.attributes.clone();
        attributes.insert(ATTRIBUTE_ENCODING.to_string(), EncodingType::Json.to_string());
        attributes.insert(ATTRIBUTE_AGGREGATE_COUNT.to_string(), message_count.to_string());

        Ok(AggregateFlush {
            attributes,
            body,
            message_count,
        })
    }

    /// Estimated body size if `new_message_size` more bytes were written,
    /// including the closing bracket and base64 expansion.
    fn current_size(&self, new_message_size: usize) -> usize {
        let size = self.writer.buffered_len() + new_message_size + 1;
        if self.encode_base64 {
            size * 4 / 3
        } else {
            size
        }
    }

    fn append(&mut self, encoded: &[u8]) -> Result<(), StreamError> {
        if self.message_count > 0 {
            self.writer.write_all(b",")?;
        }
        self.writer.write_all(encoded)?;
        // the size estimate reads the emitted length, gzip would otherwise hold back output
        self.writer.sync()?;

        self.message_count += 1;
        self.uncompressed_bytes += encoded.len() + 1;

        Ok(())
    }

    fn reset(&mut self, buffer: Vec<u8>) {
        self.writer = AggregateWriter::new(self.compression, buffer);
        self.message_count = 0;
        self.uncompressed_bytes = 1;
        // writes into a Vec never fail, the gzip header is produced lazily
        let _ = self.writer.write_all(b"[");
    }
}

impl Aggregator for MessageAggregator {
    fn write(&mut self, msg: &Message) -> Result<Vec<AggregateFlush>, StreamError> {
        let encoded = serde_json::to_vec(msg)?;
        let expected_size = (encoded.len() as f32 * self.expected_compression_ratio) as usize;

        let mut flushes = Vec::new();

        if self.message_count > 0
            && self.max_bytes != 0
            && self.current_size(expected_size) >= self.max_bytes
        {
            flushes.push(self.flush_aggregate()?);
        }

        self.append(&encoded)?;

        if self.message_count >= self.max_messages
            || (self.max_bytes != 0 && self.current_size(0) >= self.max_bytes)
        {
            flushes.push(self.flush_aggregate()?);
        }

        Ok(flushes)
    }

    fn flush(&mut self) -> Result<Vec<AggregateFlush>, StreamError> {
        Ok(vec![self.flush_aggregate()?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::MessageEncoder;

    fn msg(body: &str) -> Message {
        Message::json(format!("\"{body}\""))
    }

    fn settings(size: usize, max_bytes: usize, compression: CompressionType) -> ProducerDaemonSettings {
        ProducerDaemonSettings::new()
            .with_aggregation_size(size)
            .with_aggregation_max_size(max_bytes)
            .with_compression(compression)
    }

    fn run(aggregator: &mut MessageAggregator, messages: &[Message]) -> Vec<AggregateFlush> {
        let mut flushes = Vec::new();
        for m in messages {
            flushes.extend(aggregator.write(m).unwrap());
        }
        flushes.extend(
            aggregator
                .flush()
                .unwrap()
                .into_iter()
                .filter(|f| f.message_count > 0),
        );
        flushes
    }

    fn decode(flush: &AggregateFlush) -> Vec<Message> {
        let wrapper = Message::new(flush.body.clone(), flush.attributes.clone());
        let (messages, _): (Vec<Message>, _) = MessageEncoder::json().decode(&wrapper).unwrap();
        messages
    }

    #[test]
    fn test_count_restricted() {
        let messages: Vec<_> = (1..=7).map(|i| msg(&format!("message {i}"))).collect();
        let mut aggregator = MessageAggregator::new(&settings(5, 0, CompressionType::None));

        let flushes = run(&mut aggregator, &messages);

        assert_eq!(flushes.len(), 2);
        assert_eq!(decode(&flushes[0]), messages[0..5]);
        assert_eq!(decode(&flushes[1]), messages[5..]);
        assert_eq!(flushes[0].body, serde_json::to_string(&messages[0..5]).unwrap());
        assert_eq!(
            flushes[1].attributes.get(ATTRIBUTE_AGGREGATE_COUNT).map(String::as_str),
            Some("2")
        );
        assert_eq!(
            flushes[1].attributes.get(ATTRIBUTE_ENCODING).map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_size_restricted() {
        let long_value = format!("l{}ng value", "o".repeat(100));
        let messages = vec![
            msg(&"1".repeat(50)),
            msg(&"2".repeat(50)),
            msg(&"3".repeat(50)).with_attribute("attribute", long_value),
            msg(&"4".repeat(50)),
            msg(&"5".repeat(50)),
            msg(&"6".repeat(50)).with_attribute("attribute", "another value"),
            msg(&"7".repeat(50)),
        ];
        let mut aggregator = MessageAggregator::new(&settings(5_000, 300, CompressionType::None));

        let flushes = run(&mut aggregator, &messages);

        let counts: Vec<_> = flushes.iter().map(|f| f.message_count).collect();
        assert_eq!(counts, vec![2, 1, 2, 2]);
        assert_eq!(decode(&flushes[1]), messages[2..3]);
        for flush in &flushes {
            assert!(flush.body.len() <= 300, "aggregate too large: {}", flush.body.len());
        }
    }

    #[test]
    fn test_gzip_round_trip() {
        let messages: Vec<_> = (0..7).map(|i| msg(&i.to_string().repeat(5_000))).collect();
        let mut aggregator = MessageAggregator::new(&settings(5_000, 5_000, CompressionType::Gzip));

        let flushes = run(&mut aggregator, &messages);

        let mut decoded = Vec::new();
        for flush in &flushes {
            assert!(flush.body.len() <= 5_000, "aggregate too large: {}", flush.body.len());
            assert_eq!(
                flush.attributes.get(ATTRIBUTE_COMPRESSION).map(String::as_str),
                Some("application/gzip")
            );
            let constituents = decode(flush);
            assert_eq!(constituents.len(), flush.message_count);
            decoded.extend(constituents);
        }
        assert_eq!(decoded, messages);
        assert!(flushes.len() >= 2);
    }

    #[test]
    fn test_gzip_budget_reserves_buffer_headroom() {
        use rand::distributions::Alphanumeric;
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let messages: Vec<_> = (0..20)
            .map(|_| {
                let body: String = (&mut rng).sample_iter(&Alphanumeric).take(2_000).map(char::from).collect();
                msg(&body)
            })
            .collect();

        let max_bytes = 20_000;
        assert!(max_bytes > GZIP_MAX_EXPECTED_BUFFER);
        let mut aggregator = MessageAggregator::new(&settings(5_000, max_bytes, CompressionType::Gzip));

        let flushes = run(&mut aggregator, &messages);

        assert!(flushes.len() >= 2);
        let mut decoded = Vec::new();
        for flush in &flushes {
            assert!(flush.body.len() <= max_bytes, "aggregate too large: {}", flush.body.len());
            decoded.extend(decode(flush));
        }
        assert_eq!(decoded, messages);
    }

    #[test]
    fn test_ratio_learned_only_from_non_empty_flush() {
        let mut aggregator = MessageAggregator::new(&settings(10, 0, CompressionType::Gzip));

        let empty = aggregator.flush_aggregate().unwrap();
        assert_eq!(empty.message_count, 0);
        assert_eq!(aggregator.expected_compression_ratio(), 1.0);

        aggregator.write(&msg(&"a".repeat(2_000))).unwrap();
        aggregator.flush_aggregate().unwrap();
        assert!(aggregator.expected_compression_ratio() < 1.0);
    }

    #[test]
    fn test_aggregator_is_reusable_after_flush() {
        let mut aggregator = MessageAggregator::new(&settings(2, 0, CompressionType::Gzip));

        let first = aggregator.write(&msg("a")).unwrap();
        assert!(first.is_empty());
        let second = aggregator.write(&msg("b")).unwrap();
        assert_eq!(second.len(), 1);

        aggregator.write(&msg("c")).unwrap();
        let last = aggregator.flush().unwrap();
        assert_eq!(decode(&last[0]), vec![msg("c")]);
    }
}
