//! Error types for plugstream.

use std::io;

use thiserror::Error;

/// Terminal failure of a stream or request.
///
/// None of these propagate across the consumer boundary as errors; the
/// consumer always learns of failure through `destroy_stream` / `notify`.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("consumer rejected stream data")]
    RejectedByConsumer,

    #[error("consumer stalled for {0} zero-progress cycles")]
    ConsumerStalled(u32),

    #[error("transfer job failed")]
    SourceFailed,

    #[error("stream staging failed: {0}")]
    Staging(#[from] io::Error),
}
