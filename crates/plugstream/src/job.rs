//! Fetch-job contract: the asynchronous byte source behind a job stream.
//!
//! Jobs deliver everything through an event channel instead of calling into
//! the engine, so a late callback can never re-enter the pump loop. The
//! engine owns the receiving end and interprets events on its own schedule.

use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::data::PostData;

/// What to fetch. Built by the dispatcher from a validated request.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub url: Url,
    /// POST payload; `None` means GET.
    pub post: Option<PostData>,
    /// Bypass intermediate caches.
    pub reload: bool,
}

/// Events a running job emits toward its stream.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// Content length, if the source knows it up front.
    TotalSize(u64),
    /// Detected MIME type; wins over the request hint when it arrives
    /// before the handshake.
    MimeType(String),
    /// A chunk of payload bytes, in offset order.
    Data(Bytes),
    /// The job is done producing. Always the last event of a well-behaved
    /// job.
    Finished { error: bool },
}

/// Control surface of a running job.
///
/// `suspend`/`resume` follow pump progress; `kill` must be safe to call at
/// any point and must stop the job quietly, with no further completion
/// callback expected.
pub trait JobControl: Send + 'static {
    fn suspend(&mut self);
    fn resume(&mut self);
    fn kill(&mut self);
}

/// A job that has been started: its control handle plus its event stream.
pub struct StartedJob {
    pub control: Box<dyn JobControl>,
    pub events: mpsc::Receiver<JobEvent>,
}

/// Creates and starts fetch jobs for the dispatcher.
pub trait JobFactory: Send + 'static {
    fn start(&self, spec: JobSpec) -> StartedJob;
}
