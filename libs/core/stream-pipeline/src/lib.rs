//! Stream Pipeline
//!
//! Reliability and efficiency layer between application code and message
//! queues or streams.
//!
//! ## Features
//!
//! - **Producer daemon**: background batching with an idle flush ticker and
//!   parallel output workers
//! - **Aggregation**: many messages packed into one compressed aggregate,
//!   optionally partitioned by hash key for sharded outputs
//! - **Consumers**: per-message and per-batch consumers over a primary input
//!   and a retry input, with panic isolation
//! - **Retry routing**: noop, in-process delay queue or output-backed retries
//! - **Prometheus metrics**: built-in observability
//! - **Health endpoints**: K8s-ready liveness and readiness probes
//!
//! ## Example
//!
//! ```ignore
//! use stream_pipeline::{Consumer, ConsumerInput, ConsumerSettings, Producer, ProducerDaemon};
//!
//! let daemon = registry.provide("orders", || {
//!     ProducerDaemon::new("orders", ProducerDaemonSettings::from_named_env("orders")?, output)
//! })?;
//! let producer = Producer::with_daemon("orders", MessageEncoder::json(), daemon);
//! producer.write_one(&order, &[]).await?;
//!
//! let consumer = Consumer::new("orders", settings, ConsumerInput::acknowledgeable(input), callback)?;
//! consumer.run(cancel).await?;
//! ```

mod acknowledge;
mod aggregator;
mod batch_consumer;
mod batcher;
mod consumer;
mod consumer_base;
mod daemon;
mod health;
pub mod metrics;
mod output_channel;
mod partitioned_aggregator;
mod producer;
mod registry;
mod retry;
mod settings;
mod split;
mod supervisor;

pub use acknowledge::{Acknowledger, ConsumerData, ConsumerInput, Source};
pub use aggregator::{AggregateFlush, Aggregator, MessageAggregator};
pub use batch_consumer::{BatchConsumer, BatchConsumerCallback};
pub use batcher::Batcher;
pub use consumer::{Consumer, ConsumerCallback};
pub use consumer_base::{tag_for_retry, BaseConsumer};
pub use daemon::{DaemonStatus, ProducerDaemon};
pub use health::{health_router, HealthCheck, HealthState};
pub use metrics::{init_metrics, ConsumerMetrics, DaemonMetrics};
pub use output_channel::OutputChannel;
pub use partitioned_aggregator::{bucket_hash_keys, PartitionedAggregator, PartitionerRand, RandomPartitioner};
pub use producer::Producer;
pub use registry::ProducerDaemonRegistry;
pub use retry::{DelayQueueRetryHandler, NoopRetryHandler, OutputRetryHandler, RetryRoute};
pub use settings::{
    AggregateMessageMode, BatchConsumerSettings, ConsumerSettings, ProducerDaemonSettings,
    RetrySettings,
};
pub use split::SplittingOutput;
pub use supervisor::TaskGroup;

pub use messaging::{
    AcknowledgeableInput, Attributes, Batch, CompressionType, EncodingType, Input, Message,
    MessageEncoder, Output, OutputCapabilities, RetryHandler, StreamError, WritableMessage,
};
