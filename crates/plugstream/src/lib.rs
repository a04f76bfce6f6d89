//! Pull-based, rate-limited stream delivery for embedded plugin consumers.
//!
//! # Architecture
//!
//! The engine moves bytes from a source (a fetch job, an in-memory buffer,
//! or a one-shot script-evaluation result) into a consumer that only
//! accepts data through a capacity/accept interface:
//!
//! - [`data`] - immutable request/stream types and fixed constants
//! - [`ByteQueue`] / [`FileStaging`] - the queued byte range and the
//!   temporary file used by file-delivery modes
//! - [`Consumer`] / [`JobFactory`] - the seams toward the host plugin and
//!   the fetch environment
//! - [`Dispatcher`] - per-consumer-instance FIFO request queue that turns
//!   validated requests into streams
//! - [`mock`] - scripted collaborators for tests and embedders
//!
//! # Key guarantees
//!
//! - **Exactly-once delivery**: the byte cursor never moves backward and no
//!   chunk is reordered within a stream
//! - **Bounded stalling**: a consumer that accepts nothing is canceled
//!   after a fixed lifetime budget of zero-progress cycles
//! - **Single terminal transition**: finish/cancel is idempotent, so a job
//!   completion racing an external cancel notifies exactly once
//! - **Serialized dispatch**: requests per consumer instance start in FIFO
//!   submission order

mod consumer;
pub mod data;
mod dispatch;
mod error;
mod handshake;
mod job;
pub mod mock;
mod pump;
mod queue;
mod source;
mod staging;
mod stream;

pub use consumer::{Consumer, FrameHost, ScriptEvaluator};
pub use data::{
    DEFAULT_MIME, DeliveryMode, DestroyReason, NotifyReason, NotifyToken, POLL_INTERVAL,
    PendingRequest, PostData, STALL_BUDGET, STALL_WARN_AFTER,
};
pub use dispatch::{ALLOWED_SCHEMES, Dispatcher};
pub use error::StreamError;
pub use job::{JobControl, JobEvent, JobFactory, JobSpec, StartedJob};
pub use queue::ByteQueue;
pub use staging::FileStaging;
pub use stream::StreamCore;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a holder panicked. All engine
/// state stays usable for the terminal notification path.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
