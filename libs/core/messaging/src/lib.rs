//! Message model and backend contracts for stream pipelines.
//!
//! This library provides the backend-agnostic pieces shared by producers,
//! consumers and queue backends:
//! - **Messages**: [`Message`], [`RawJsonMessage`] and the [`WritableMessage`] trait
//! - **Encoding**: [`MessageEncoder`] with JSON/text bodies and optional gzip
//! - **Backends**: [`Output`], [`Input`], [`AcknowledgeableInput`], [`RetryHandler`]
//! - **In-memory backends**: [`InMemoryOutput`], [`InMemoryInput`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   Message    ┌─────────────────┐   Batch    ┌───────────────┐
//! │  Your Code   │─────────────▶│ stream-pipeline │───────────▶│ impl Output   │
//! └──────────────┘              └─────────────────┘            └───────────────┘
//!        ▲                               ▲
//!        │ callback                      │ Message
//!        │                      ┌───────────────┐
//!        └──────────────────────│  impl Input   │
//!                               └───────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use messaging::{MessageEncoder, CompressionType};
//!
//! let encoder = MessageEncoder::json().with_compression(CompressionType::Gzip);
//! let msg = encoder.encode(&order, &[&attributes])?;
//! let (order, attributes): (Order, _) = encoder.decode(&msg)?;
//! ```

mod backend;
mod compression;
mod encoding;
mod error;
mod memory;
mod message;

pub use backend::{AcknowledgeableInput, Input, Output, OutputCapabilities, RetryHandler};
pub use compression::CompressionType;
pub use encoding::{EncodingType, MessageEncoder};
pub use error::{ErrorCategory, StreamError};
pub use memory::{InMemoryInput, InMemoryOutput};
pub use message::{
    Attributes, Batch, Message, RawJsonMessage, WritableMessage, ATTRIBUTE_AGGREGATE,
    ATTRIBUTE_AGGREGATE_COUNT, ATTRIBUTE_COMPRESSION, ATTRIBUTE_ENCODING,
    ATTRIBUTE_KINESIS_EXPLICIT_HASH_KEY, ATTRIBUTE_KINESIS_PARTITION_KEY, ATTRIBUTE_RETRY,
    ATTRIBUTE_RETRY_ID, ATTRIBUTE_RETRY_SQS, ATTRIBUTE_SQS_DELAY_SECONDS,
};
