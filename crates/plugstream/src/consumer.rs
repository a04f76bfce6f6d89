//! Consumer-side contracts: the plugin sink, frame host, and script host.

use std::path::Path;

use tokio::sync::oneshot;
use url::Url;

use crate::data::{DeliveryMode, DestroyReason, NotifyReason, NotifyToken};

/// The pull-style, rate-limited sink the engine delivers into.
///
/// The capacity/accept pair is the only shared mutable boundary between the
/// engine and its host. `capacity` may legitimately return `0` while the
/// consumer is busy; `accept` may consume fewer bytes than offered, and a
/// negative return rejects the stream outright. Failures are reported
/// through [`destroy_stream`](Self::destroy_stream) and
/// [`notify`](Self::notify), never as errors.
pub trait Consumer: Send + 'static {
    /// One-time stream negotiation. The engine never offers seekable
    /// streams, so `seekable` is always `false`.
    fn begin_stream(&mut self, mime_type: &str, seekable: bool) -> DeliveryMode;

    /// Bytes the consumer can accept right now; may be zero.
    fn capacity(&mut self) -> i64;

    /// Offer bytes. Returns how many were actually consumed, which may be
    /// less than offered, zero, or negative to reject the stream.
    fn accept(&mut self, bytes: &[u8]) -> i64;

    /// Hand over the completed local file for a file-delivery-mode stream.
    fn deliver_as_file(&mut self, path: &Path);

    /// Terminal teardown of a stream the consumer was told about.
    fn destroy_stream(&mut self, reason: DestroyReason);

    /// Completion signal for the original requester. `token` is `None` only
    /// for force-notified streams.
    fn notify(&mut self, token: Option<NotifyToken>, reason: NotifyReason);
}

/// Hosting frame/window that receives requests with a named target.
///
/// Forwarding is best effort; an unresolvable target simply drops the
/// request.
pub trait FrameHost: Send + 'static {
    fn open_in_frame(&mut self, url: &Url, frame: &str);
}

/// Asynchronous script evaluation host.
///
/// The returned receiver resolves to `Some(result)` on success; `None` or a
/// dropped sender means the evaluation failed.
pub trait ScriptEvaluator: Send + 'static {
    fn evaluate(&mut self, source: &str) -> oneshot::Receiver<Option<String>>;
}
