//! Output wrapper for backends that reject oversized requests.

use async_trait::async_trait;
use futures::future::BoxFuture;
use messaging::{Batch, Output, OutputCapabilities, StreamError};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes through `inner`, halving any batch the backend rejects as too large.
///
/// Batches are first chunked to the inner output's maximum batch size. A
/// rejected chunk of `n > 1` messages is retried as two halves of
/// `floor(n/2)` and `ceil(n/2)` messages, recursively. Errors of independent
/// chunks are combined.
pub struct SplittingOutput {
    inner: Arc<dyn Output>,
}

impl SplittingOutput {
    pub fn new(inner: Arc<dyn Output>) -> Self {
        Self { inner }
    }

    fn write_split(&self, batch: Batch) -> BoxFuture<'_, Result<(), StreamError>> {
        Box::pin(async move {
            let size = batch.len();

            match self.inner.write(batch.clone()).await {
                Err(e) if e.is_request_too_large() && size > 1 => {
                    let mut first = batch;
                    let second = first.split_off(size / 2);
                    debug!(
                        first = first.len(),
                        second = second.len(),
                        "request too large, splitting batch"
                    );

                    let errors: Vec<_> = [self.write_split(first).await, self.write_split(second).await]
                        .into_iter()
                        .filter_map(Result::err)
                        .collect();

                    StreamError::combine(errors).map_or(Ok(()), Err)
                }
                Err(e) if e.is_request_too_large() => {
                    warn!(error = %e, "single message is too large for the output");
                    Err(e)
                }
                other => other,
            }
        })
    }
}

#[async_trait]
impl Output for SplittingOutput {
    async fn write(&self, batch: Batch) -> Result<(), StreamError> {
        if batch.is_empty() {
            return Ok(());
        }

        let chunk_size = self
            .inner
            .capabilities()
            .max_batch_size
            .unwrap_or(batch.len())
            .max(1);

        let mut errors = Vec::new();
        for chunk in batch.chunks(chunk_size) {
            if let Err(e) = self.write_split(chunk.to_vec()).await {
                errors.push(e);
            }
        }

        StreamError::combine(errors).map_or(Ok(()), Err)
    }

    fn capabilities(&self) -> OutputCapabilities {
        self.inner.capabilities()
    }
}
