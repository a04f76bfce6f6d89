//! Data layer: immutable request/stream types and fixed engine constants.

use std::time::Duration;

use bytes::Bytes;

/// Interval between pump retries while the consumer is not accepting data.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Total zero-progress pump cycles a stream tolerates over its whole life
/// before it is canceled. Counted across the stream, never reset.
pub const STALL_BUDGET: u32 = 8;

/// Consecutive zero-progress cycles after which a stall warning is logged.
pub const STALL_WARN_AFTER: u32 = 3;

/// MIME type reported to the consumer when nothing better is known.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// How the consumer wants stream content delivered, negotiated once per
/// stream by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Bytes are offered directly through `capacity`/`accept`.
    Streaming,
    /// Bytes are streamed and simultaneously staged to a local file that is
    /// handed over on successful completion.
    AsFileThenStream,
    /// No direct streaming at all; content is materialized as a local file
    /// and only the path is delivered.
    AsFileOnly,
}

impl DeliveryMode {
    /// Whether this mode requires a local file at finish time.
    pub fn needs_file(self) -> bool {
        matches!(self, DeliveryMode::AsFileThenStream | DeliveryMode::AsFileOnly)
    }
}

/// Reason passed to the consumer when a stream is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    Done,
    UserCancel,
    NetworkError,
}

/// Reason delivered with a completion notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReason {
    Done,
    NetworkError,
}

/// Opaque caller-supplied correlation id, echoed back with the terminal
/// notification of the request it was attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyToken(pub u64);

/// Payload of a POST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostData {
    pub body: Bytes,
    pub content_type: String,
}

/// A queued unit of work before it becomes a stream.
///
/// Requests are served strictly in FIFO order per consumer instance. A
/// request with a non-empty [`target_frame`](Self::target_frame) is forwarded
/// to the hosting frame and never allocates a stream.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Target URL, possibly relative to the dispatcher's base.
    pub url: String,
    /// POST payload; `None` means GET.
    pub post: Option<PostData>,
    /// Non-empty means "deliver to this named frame instead of the consumer".
    pub target_frame: Option<String>,
    /// Correlation id for the terminal notification, if the caller wants one.
    pub token: Option<NotifyToken>,
    /// Notify even without a token.
    pub force_notify: bool,
    /// Bypass intermediate caches when fetching.
    pub reload: bool,
}

impl PendingRequest {
    /// A plain GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            post: None,
            target_frame: None,
            token: None,
            force_notify: false,
            reload: false,
        }
    }

    /// A POST request with a payload.
    pub fn post(url: impl Into<String>, post: PostData) -> Self {
        Self {
            post: Some(post),
            ..Self::get(url)
        }
    }

    pub fn with_token(mut self, token: NotifyToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_target_frame(mut self, frame: impl Into<String>) -> Self {
        self.target_frame = Some(frame.into());
        self
    }

    pub fn with_force_notify(mut self) -> Self {
        self.force_notify = true;
        self
    }

    pub fn with_reload(mut self) -> Self {
        self.reload = true;
        self
    }
}
