//! Job backends that feed the delivery engine from real sources.
//!
//! The engine core is transport-agnostic: it consumes
//! [`JobEvent`](plugstream::JobEvent)s from whatever
//! [`JobFactory`](plugstream::JobFactory) the embedder wires in. This crate
//! provides the two production factories:
//!
//! - [`FileJobFactory`] replays local `file://` URLs in fixed-size chunks
//! - `ReqwestJobFactory` (behind the default `reqwest` feature) streams
//!   HTTP/HTTPS responses, including POST submissions and cache-bypassing
//!   reloads
//!
//! Both run each job as a spawned task whose suspend/resume control is a
//! watch flag checked between chunks, and whose kill aborts the task.

mod control;
mod file;
#[cfg(feature = "reqwest")]
mod http;

pub use control::TaskJobControl;
pub use file::FileJobFactory;
#[cfg(feature = "reqwest")]
pub use http::ReqwestJobFactory;

/// Events buffered between a job task and the stream driver.
pub(crate) const EVENT_BUFFER: usize = 32;

/// Bytes read per chunk when replaying a local file.
pub(crate) const FILE_CHUNK: usize = 16 * 1024;
