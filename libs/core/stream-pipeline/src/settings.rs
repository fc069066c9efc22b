//! Producer daemon and consumer settings
//!
//! Settings are plain data with builder methods. Each struct can also be loaded
//! from environment variables scoped by component name, e.g.
//! `STREAM_PRODUCER_ORDERS_BATCH_SIZE` or `STREAM_CONSUMER_ORDERS_RUNNER_COUNT`.

use core_config::{env_key, env_or_default, env_parse_or, ConfigError, FromNamedEnv};
use messaging::{Attributes, CompressionType, EncodingType, StreamError};
use std::str::FromStr;
use std::time::Duration;

const PRODUCER_PREFIX: &str = "STREAM_PRODUCER";
const CONSUMER_PREFIX: &str = "STREAM_CONSUMER";

fn env_duration_ms(key: &str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = env_parse_or(key, default.as_millis() as u64)?;
    Ok(Duration::from_millis(millis))
}

fn env_named<T>(
    key: &str,
    default: T,
    parse: impl Fn(&str) -> Result<T, StreamError>,
) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => parse(raw.trim()).map_err(|e| ConfigError::ParseError {
            key: key.to_string(),
            details: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration for a producer daemon
#[derive(Debug, Clone, PartialEq)]
pub struct ProducerDaemonSettings {
    /// Idle time after which buffered messages are flushed
    pub interval: Duration,

    /// Capacity of the channel between writers and output workers
    pub buffer_size: usize,

    /// Number of output workers writing batches concurrently
    pub runner_count: usize,

    /// Maximum messages per output batch
    pub batch_size: usize,

    /// Maximum bytes per output batch (0 disables the byte cap)
    pub batch_max_size: usize,

    /// Messages packed into one aggregate (1 disables aggregation)
    pub aggregation_size: usize,

    /// Maximum bytes per aggregate body (0 disables the byte cap)
    pub aggregation_max_size: usize,

    /// Buckets used when the output is partitioned
    pub partition_bucket_count: usize,

    /// Compression applied to aggregate bodies
    pub compression: CompressionType,

    /// Attributes stamped on every aggregate
    pub message_attributes: Attributes,
}

impl Default for ProducerDaemonSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            buffer_size: 10,
            runner_count: 10,
            batch_size: 10,
            batch_max_size: 258_048,
            aggregation_size: 1,
            aggregation_max_size: 65_536,
            partition_bucket_count: 128,
            compression: CompressionType::None,
            message_attributes: Attributes::new(),
        }
    }
}

impl ProducerDaemonSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn with_runner_count(mut self, count: usize) -> Self {
        self.runner_count = count;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_batch_max_size(mut self, bytes: usize) -> Self {
        self.batch_max_size = bytes;
        self
    }

    pub fn with_aggregation_size(mut self, size: usize) -> Self {
        self.aggregation_size = size;
        self
    }

    pub fn with_aggregation_max_size(mut self, bytes: usize) -> Self {
        self.aggregation_max_size = bytes;
        self
    }

    pub fn with_partition_bucket_count(mut self, count: usize) -> Self {
        self.partition_bucket_count = count;
        self
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_message_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.message_attributes.insert(key.into(), value.into());
        self
    }

    /// Aggregation is active only for sizes above one.
    pub fn aggregation_enabled(&self) -> bool {
        self.aggregation_size > 1
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        let checks = [
            (self.interval.is_zero(), "interval must be greater than zero"),
            (self.buffer_size == 0, "buffer_size must be at least 1"),
            (self.runner_count == 0, "runner_count must be at least 1"),
            (self.batch_size == 0, "batch_size must be at least 1"),
            (self.aggregation_size == 0, "aggregation_size must be at least 1"),
            (self.partition_bucket_count == 0, "partition_bucket_count must be at least 1"),
        ];

        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(StreamError::config(*reason)),
            None => Ok(()),
        }
    }
}

impl FromNamedEnv for ProducerDaemonSettings {
    fn from_named_env(name: &str) -> Result<Self, ConfigError> {
        let d = Self::default();
        let key = |setting: &str| env_key(PRODUCER_PREFIX, name, setting);

        Ok(Self {
            interval: env_duration_ms(&key("INTERVAL_MS"), d.interval)?,
            buffer_size: env_parse_or(&key("BUFFER_SIZE"), d.buffer_size)?,
            runner_count: env_parse_or(&key("RUNNER_COUNT"), d.runner_count)?,
            batch_size: env_parse_or(&key("BATCH_SIZE"), d.batch_size)?,
            batch_max_size: env_parse_or(&key("BATCH_MAX_SIZE"), d.batch_max_size)?,
            aggregation_size: env_parse_or(&key("AGGREGATION_SIZE"), d.aggregation_size)?,
            aggregation_max_size: env_parse_or(&key("AGGREGATION_MAX_SIZE"), d.aggregation_max_size)?,
            partition_bucket_count: env_parse_or(&key("PARTITION_BUCKET_COUNT"), d.partition_bucket_count)?,
            compression: env_named(&key("COMPRESSION"), d.compression, CompressionType::parse)?,
            message_attributes: d.message_attributes,
        })
    }
}

/// How aggregate messages are acknowledged relative to their constituents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AggregateMessageMode {
    /// Acknowledge the aggregate before processing its constituents
    AtMostOnce,
    /// Acknowledge the aggregate after all constituents were handed off
    #[default]
    AtLeastOnce,
}

impl AggregateMessageMode {
    pub fn parse(value: &str) -> Result<Self, StreamError> {
        Self::from_str(value)
            .map_err(|_| StreamError::config(format!("unknown aggregate message mode '{value}'")))
    }
}

/// Retry routing for failed messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    pub enabled: bool,
    /// Delay before a failed message is delivered again
    pub after: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            after: Duration::from_secs(60),
        }
    }
}

impl RetrySettings {
    pub fn enabled(after: Duration) -> Self {
        Self { enabled: true, after }
    }
}

/// Configuration for consumers
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerSettings {
    /// Worker tasks pulling from the merged data channel
    pub runner_count: usize,

    /// Period of the processed-count log line
    pub idle_timeout: Duration,

    /// Fallback body encoding for messages without an encoding attribute
    pub encoding: EncodingType,

    pub aggregate_message_mode: AggregateMessageMode,

    pub retry: RetrySettings,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            runner_count: 1,
            idle_timeout: Duration::from_secs(10),
            encoding: EncodingType::Json,
            aggregate_message_mode: AggregateMessageMode::AtLeastOnce,
            retry: RetrySettings::default(),
        }
    }
}

impl ConsumerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runner_count(mut self, count: usize) -> Self {
        self.runner_count = count;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingType) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_aggregate_message_mode(mut self, mode: AggregateMessageMode) -> Self {
        self.aggregate_message_mode = mode;
        self
    }

    pub fn with_retry(mut self, retry: RetrySettings) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.runner_count == 0 {
            return Err(StreamError::config("runner_count must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(StreamError::config("idle_timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl FromNamedEnv for ConsumerSettings {
    fn from_named_env(name: &str) -> Result<Self, ConfigError> {
        let d = Self::default();
        let key = |setting: &str| env_key(CONSUMER_PREFIX, name, setting);

        Ok(Self {
            runner_count: env_parse_or(&key("RUNNER_COUNT"), d.runner_count)?,
            idle_timeout: env_duration_ms(&key("IDLE_TIMEOUT_MS"), d.idle_timeout)?,
            encoding: env_named(&key("ENCODING"), d.encoding, EncodingType::parse)?,
            aggregate_message_mode: env_named(
                &key("AGGREGATE_MESSAGE_MODE"),
                d.aggregate_message_mode,
                AggregateMessageMode::parse,
            )?,
            retry: RetrySettings {
                enabled: env_or_default(&key("RETRY_ENABLED"), "false").eq_ignore_ascii_case("true"),
                after: env_duration_ms(&key("RETRY_AFTER_MS"), d.retry.after)?,
            },
        })
    }
}

/// Configuration for batch consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConsumerSettings {
    pub batch_size: usize,
    /// Partial batches are processed after this long without a full batch
    pub idle_timeout: Duration,
}

impl Default for BatchConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            idle_timeout: Duration::from_secs(10),
        }
    }
}

impl BatchConsumerSettings {
    pub fn new(batch_size: usize, idle_timeout: Duration) -> Self {
        Self {
            batch_size,
            idle_timeout,
        }
    }

    pub fn validate(&self) -> Result<(), StreamError> {
        if self.batch_size == 0 {
            return Err(StreamError::config("batch_size must be at least 1"));
        }
        if self.idle_timeout.is_zero() {
            return Err(StreamError::config("idle_timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl FromNamedEnv for BatchConsumerSettings {
    fn from_named_env(name: &str) -> Result<Self, ConfigError> {
        let d = Self::default();
        let key = |setting: &str| env_key(CONSUMER_PREFIX, name, setting);

        Ok(Self {
            batch_size: env_parse_or(&key("BATCH_SIZE"), d.batch_size)?,
            idle_timeout: env_duration_ms(&key("IDLE_TIMEOUT_MS"), d.idle_timeout)?,
        })
    }
}
