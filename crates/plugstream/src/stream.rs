//! Stream state and lifecycle: creation, terminal finish, cancellation,
//! and the per-consumer-instance active-stream set.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tempfile::TempPath;
use tracing::{debug, warn};
use url::Url;

use crate::consumer::Consumer;
use crate::data::{DeliveryMode, DestroyReason, NotifyReason, NotifyToken};
use crate::error::StreamError;
use crate::lock;
use crate::queue::ByteQueue;
use crate::staging::FileStaging;

/// Why a stream is being finished. Collapsed into the consumer-facing
/// destroy/notify reasons by [`StreamCore::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinishReason {
    Done,
    Error,
    Cancel,
}

/// Mutable state of one logical unit of transfer.
///
/// A stream is attached to exactly one consumer for its entire lifetime and
/// transitions into a terminal state exactly once; every entry point checks
/// [`is_finished`](Self::is_finished) first, which makes late job callbacks
/// and racing cancellations harmless.
pub struct StreamCore<C: Consumer> {
    id: u64,
    url: Url,
    consumer: Arc<Mutex<C>>,
    set: Arc<Mutex<StreamSet>>,
    token: Option<NotifyToken>,
    force_notify: bool,

    pub(crate) mime: Option<String>,
    pub(crate) total_size: Option<u64>,
    pub(crate) mode: DeliveryMode,
    pub(crate) handshaken: bool,
    pub(crate) queue: ByteQueue,
    pub(crate) staging: Option<FileStaging>,
    pub(crate) local_path: Option<PathBuf>,

    finished: bool,
    pub(crate) cursor: u64,
    pub(crate) retries: u32,
    pub(crate) stall_cycles: u32,
    pub(crate) error: Option<StreamError>,
}

impl<C: Consumer> StreamCore<C> {
    pub(crate) fn new(
        id: u64,
        url: Url,
        consumer: Arc<Mutex<C>>,
        set: Arc<Mutex<StreamSet>>,
        token: Option<NotifyToken>,
        force_notify: bool,
    ) -> Self {
        debug!(id, url = %url, "stream created");
        Self {
            id,
            url,
            consumer,
            set,
            token,
            force_notify,
            mime: None,
            total_size: None,
            mode: DeliveryMode::Streaming,
            handshaken: false,
            queue: ByteQueue::new(),
            staging: None,
            local_path: None,
            finished: false,
            cursor: 0,
            retries: 0,
            stall_cycles: 0,
            error: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// How many bytes the consumer has accepted so far. Monotonically
    /// non-decreasing.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn error(&self) -> Option<&StreamError> {
        self.error.as_ref()
    }

    pub(crate) fn consumer(&self) -> &Arc<Mutex<C>> {
        &self.consumer
    }

    pub(crate) fn set_total_size(&mut self, size: u64) {
        self.total_size = Some(size);
    }

    /// Record a source-detected MIME type. Ignored once the handshake has
    /// already told the consumer something else.
    pub(crate) fn set_detected_mime(&mut self, mime: String) {
        if !self.handshaken {
            self.mime = Some(mime);
        }
    }

    pub(crate) fn queue_payload(&mut self, chunk: bytes::Bytes) {
        self.queue.load(chunk);
    }

    /// Whether the lifetime stall budget is spent.
    pub(crate) fn stalled_out(&self) -> bool {
        self.stall_cycles >= crate::data::STALL_BUDGET
    }

    /// Record a terminal error and finish. No-op on an already finished
    /// stream.
    pub(crate) fn fail(&mut self, error: StreamError) {
        if !self.finished {
            self.error = Some(error);
            self.finish(FinishReason::Error);
        }
    }

    /// External cancellation, e.g. the consumer instance being torn down.
    /// Safe to call at any suspension point.
    pub(crate) fn cancel(&mut self) {
        self.finish(FinishReason::Cancel);
    }

    /// Terminal finish. Idempotent: only the first call has any observable
    /// effect.
    ///
    /// On success the staged file (or the reused local path) is handed to
    /// the consumer before the destroy/notify pair; on error or cancel any
    /// staging is discarded, which deletes it.
    pub(crate) fn finish(&mut self, reason: FinishReason) {
        if self.finished {
            return;
        }
        self.finished = true;

        let mut reason = reason;
        let mut handoff: Option<TempPath> = None;
        if reason == FinishReason::Done {
            match self.staging.take().map(FileStaging::close) {
                Some(Ok(path)) => handoff = Some(path),
                Some(Err(e)) => {
                    warn!(id = self.id, error = %e, "closing staged file failed");
                    self.error = Some(StreamError::Staging(e));
                    reason = FinishReason::Error;
                }
                None => {}
            }
        } else {
            // Auto-deletes on drop.
            self.staging = None;
        }

        debug!(id = self.id, ?reason, cursor = self.cursor, "stream finished");

        {
            let mut consumer = lock(&self.consumer);
            match reason {
                FinishReason::Done => {
                    if let Some(path) = &handoff {
                        consumer.deliver_as_file(path);
                    } else if self.mode.needs_file()
                        && let Some(local) = &self.local_path
                    {
                        consumer.deliver_as_file(local);
                    }
                    if self.handshaken {
                        consumer.destroy_stream(DestroyReason::Done);
                    }
                    if self.token.is_some() || self.force_notify {
                        consumer.notify(self.token, NotifyReason::Done);
                    }
                }
                FinishReason::Error | FinishReason::Cancel => {
                    if self.handshaken {
                        consumer.destroy_stream(if reason == FinishReason::Cancel {
                            DestroyReason::UserCancel
                        } else {
                            DestroyReason::NetworkError
                        });
                    }
                    if self.token.is_some() || self.force_notify {
                        consumer.notify(self.token, NotifyReason::NetworkError);
                    }
                }
            }
        }

        let mut set = lock(&self.set);
        set.detach(self.id);
        if let Some(path) = handoff {
            set.retire(path);
        }
    }
}

type Canceler = Box<dyn FnMut() + Send>;

/// Per-consumer-instance registry of live streams.
///
/// Owns the cancel hooks for every active stream and retains delivered
/// temporary files for as long as the instance lives. Lock ordering: a
/// stream core lock may be taken first and the set lock second, never the
/// other way around.
pub(crate) struct StreamSet {
    next_id: u64,
    closed: bool,
    active: HashMap<u64, Canceler>,
    retired: Vec<TempPath>,
}

impl StreamSet {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 0,
            closed: false,
            active: HashMap::new(),
            retired: Vec::new(),
        }
    }

    /// Allocate an id for a new stream, or refuse if the instance has been
    /// shut down (a parked script evaluation may resolve after teardown).
    pub(crate) fn allocate(&mut self) -> Option<u64> {
        if self.closed {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        Some(id)
    }

    pub(crate) fn attach(&mut self, id: u64, canceler: Canceler) {
        self.active.insert(id, canceler);
    }

    pub(crate) fn detach(&mut self, id: u64) {
        self.active.remove(&id);
    }

    pub(crate) fn retire(&mut self, path: TempPath) {
        self.retired.push(path);
    }

    /// Mark the set closed and hand back every cancel hook. The caller
    /// must invoke them outside the set lock.
    pub(crate) fn close(&mut self) -> Vec<Canceler> {
        self.closed = true;
        self.active.drain().map(|(_, c)| c).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.active.len()
    }
}
