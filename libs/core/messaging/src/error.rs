//! Error types for the stream pipeline.
//!
//! Errors carry an [`ErrorCategory`] that mirrors where in the pipeline they
//! originate:
//! - **Encoding**: a message body could not be encoded, compressed or decoded
//! - **Backend**: an input or output rejected a request
//! - **Retry**: a failed message could not be handed to the retry handler
//! - **Processing**: a consumer callback failed or panicked
//! - **Config**: invalid settings, detected at construction time
//! - **Shutdown**: the component was already closed

use std::fmt;
use thiserror::Error;

/// Category of error, used for log fields and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCategory {
    Encoding,
    Backend,
    Retry,
    Processing,
    Config,
    Shutdown,
}

/// Errors produced by messages, encoders, backends and pipeline components.
#[derive(Error, Debug)]
pub enum StreamError {
    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Body encoding, compression or base64 handling failed
    #[error("encoding error: {0}")]
    Encoding(String),

    /// I/O error from a compressor stream
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The backend rejected the request because it was too large
    #[error("request too large: {0}")]
    RequestTooLarge(String),

    /// Any other input/output backend failure
    #[error("backend error: {0}")]
    Backend(String),

    /// The operation was canceled before it completed
    #[error("operation canceled")]
    Canceled,

    /// Writing to a component that was already closed
    #[error("{0} is closed")]
    Closed(String),

    /// Handing a message to the retry handler failed
    #[error("retry error: {0}")]
    Retry(String),

    /// Consumer callback failure
    #[error("processing error: {0}")]
    Processing(String),

    /// A panic caught at a task or message boundary
    #[error("panic during {0}")]
    Panic(String),

    /// Invalid settings
    #[error("configuration error: {0}")]
    Config(String),

    /// Several errors from independent sub-operations
    #[error("{}", Multi(.0))]
    Multiple(Vec<StreamError>),
}

struct Multi<'a>(&'a [StreamError]);

impl fmt::Display for Multi<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred: ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl StreamError {
    pub fn encoding(message: impl Into<String>) -> Self {
        StreamError::Encoding(message.into())
    }

    pub fn backend(message: impl Into<String>) -> Self {
        StreamError::Backend(message.into())
    }

    pub fn request_too_large(message: impl Into<String>) -> Self {
        StreamError::RequestTooLarge(message.into())
    }

    pub fn processing(message: impl Into<String>) -> Self {
        StreamError::Processing(message.into())
    }

    pub fn retry(message: impl Into<String>) -> Self {
        StreamError::Retry(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        StreamError::Config(message.into())
    }

    /// Combine errors, unwrapping the single-error case.
    pub fn combine(mut errors: Vec<StreamError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(StreamError::Multiple(errors)),
        }
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            StreamError::Serialization(_) | StreamError::Encoding(_) | StreamError::Io(_) => {
                ErrorCategory::Encoding
            }
            StreamError::RequestTooLarge(_) | StreamError::Backend(_) | StreamError::Canceled => {
                ErrorCategory::Backend
            }
            StreamError::Closed(_) => ErrorCategory::Shutdown,
            StreamError::Retry(_) => ErrorCategory::Retry,
            StreamError::Processing(_) | StreamError::Panic(_) => ErrorCategory::Processing,
            StreamError::Config(_) => ErrorCategory::Config,
            StreamError::Multiple(errors) => errors
                .first()
                .map(StreamError::category)
                .unwrap_or(ErrorCategory::Backend),
        }
    }

    /// True if this error, or every nested error, is a request-too-large rejection.
    pub fn is_request_too_large(&self) -> bool {
        match self {
            StreamError::RequestTooLarge(_) => true,
            StreamError::Multiple(errors) => {
                !errors.is_empty() && errors.iter().all(StreamError::is_request_too_large)
            }
            _ => false,
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, StreamError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(StreamError::encoding("x").category(), ErrorCategory::Encoding);
        assert_eq!(StreamError::backend("x").category(), ErrorCategory::Backend);
        assert_eq!(StreamError::retry("x").category(), ErrorCategory::Retry);
        assert_eq!(StreamError::Closed("daemon".into()).category(), ErrorCategory::Shutdown);
        assert_eq!(ErrorCategory::Processing.to_string(), "processing");
    }

    #[test]
    fn test_combine() {
        assert!(StreamError::combine(vec![]).is_none());

        let single = StreamError::combine(vec![StreamError::backend("a")]).unwrap();
        assert!(matches!(single, StreamError::Backend(_)));

        let multi = StreamError::combine(vec![
            StreamError::request_too_large("a"),
            StreamError::request_too_large("b"),
        ])
        .unwrap();
        assert!(multi.is_request_too_large());
        assert!(multi.to_string().starts_with("2 errors occurred"));
    }

    #[test]
    fn test_mixed_multiple_is_not_too_large() {
        let multi = StreamError::Multiple(vec![
            StreamError::request_too_large("a"),
            StreamError::backend("b"),
        ]);
        assert!(!multi.is_request_too_large());
    }
}
