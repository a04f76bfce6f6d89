//! Per-consumer-instance request queue and dispatcher.
//!
//! Requests are served strictly in FIFO submission order. Each dispatch
//! tick drains the queue entirely: frame-targeted requests are forwarded
//! without ever becoming streams, `javascript:` requests are parked with
//! the script evaluator, and everything else that passes the protocol
//! allow-list becomes a job-backed stream.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};
use url::Url;

use crate::consumer::{Consumer, FrameHost, ScriptEvaluator};
use crate::data::{NotifyReason, NotifyToken, PendingRequest};
use crate::job::{JobFactory, JobSpec};
use crate::lock;
use crate::source::{drive_buffer, drive_job};
use crate::stream::{StreamCore, StreamSet};

/// Schemes that may reach the network. Anything else is dropped before a
/// stream exists — a security filter, not a transient failure, so no
/// notification fires either.
pub const ALLOWED_SCHEMES: &[&str] = &["http", "https", "ftp", "file"];

/// Serializes request handling for one consumer instance.
pub struct Dispatcher<C: Consumer, F: JobFactory> {
    consumer: Arc<Mutex<C>>,
    jobs: F,
    frames: Box<dyn FrameHost>,
    scripts: Box<dyn ScriptEvaluator>,
    base: Url,
    queue: VecDeque<PendingRequest>,
    set: Arc<Mutex<StreamSet>>,
}

impl<C: Consumer, F: JobFactory> Dispatcher<C, F> {
    pub fn new(
        consumer: C,
        jobs: F,
        frames: impl FrameHost,
        scripts: impl ScriptEvaluator,
        base: Url,
    ) -> Self {
        Self {
            consumer: Arc::new(Mutex::new(consumer)),
            jobs,
            frames: Box::new(frames),
            scripts: Box::new(scripts),
            base,
            queue: VecDeque::new(),
            set: Arc::new(Mutex::new(StreamSet::new())),
        }
    }

    /// Shared handle to the consumer, for host-side access outside the
    /// engine.
    pub fn consumer(&self) -> Arc<Mutex<C>> {
        Arc::clone(&self.consumer)
    }

    /// Queue a request for the next dispatch tick.
    pub fn enqueue(&mut self, request: PendingRequest) {
        self.queue.push_back(request);
    }

    /// Drain the request queue entirely, in submission order.
    pub fn dispatch(&mut self) {
        while let Some(request) = self.queue.pop_front() {
            self.dispatch_one(request);
        }
    }

    /// Number of streams currently live, for host bookkeeping.
    pub fn active_streams(&self) -> usize {
        lock(&self.set).len()
    }

    /// Tear the instance down: cancel every active stream, kill in-flight
    /// jobs quietly, and refuse anything still parked.
    pub fn shutdown(&mut self) {
        self.queue.clear();
        let cancels = lock(&self.set).close();
        debug!(streams = cancels.len(), "instance shutdown, canceling streams");
        for mut cancel in cancels {
            cancel();
        }
    }

    fn dispatch_one(&mut self, request: PendingRequest) {
        if request.url.is_empty() {
            // Nothing to load; the requester still hears about it.
            self.notify_requester(&request, NotifyReason::NetworkError);
            return;
        }

        let url = match self.base.join(&request.url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = request.url, error = %e, "dropping unparsable request URL");
                return;
            }
        };

        if url.scheme() == "javascript" {
            self.dispatch_script(url, request);
            return;
        }

        if !ALLOWED_SCHEMES.contains(&url.scheme()) {
            warn!(url = %url, "dropping request with disallowed scheme");
            return;
        }

        if let Some(frame) = request
            .target_frame
            .as_deref()
            .filter(|frame| !frame.is_empty())
        {
            // Never becomes a stream: forwarded and acknowledged directly.
            self.frames.open_in_frame(&url, frame);
            self.notify_requester(&request, NotifyReason::Done);
            return;
        }

        self.start_job_stream(url, request);
    }

    fn notify_requester(&self, request: &PendingRequest, reason: NotifyReason) {
        if request.token.is_some() || request.force_notify {
            lock(&self.consumer).notify(request.token, reason);
        }
    }

    fn start_job_stream(&mut self, url: Url, request: PendingRequest) {
        let Some(core) = self.new_stream(url.clone(), request.token, request.force_notify) else {
            return;
        };

        // A local file-only stream needs no job at all: negotiate now and
        // short-circuit if the consumer only wants the path.
        if url.scheme() == "file" {
            let mut locked = lock(&core);
            if let Err(e) = locked.handshake() {
                locked.fail(e);
                return;
            }
            if locked.local_file_short_circuit() {
                locked.finish(crate::stream::FinishReason::Done);
                return;
            }
        }

        let started = self.jobs.start(JobSpec {
            url,
            post: request.post,
            reload: request.reload,
        });
        let control = Arc::new(Mutex::new(started.control));
        {
            let core = Arc::clone(&core);
            let control = Arc::clone(&control);
            let id = lock(&core).id();
            lock(&self.set).attach(
                id,
                Box::new(move || {
                    lock(&core).cancel();
                    lock(&control).kill();
                }),
            );
        }
        tokio::spawn(drive_job(core, control, started.events));
    }

    fn dispatch_script(&mut self, url: Url, request: PendingRequest) {
        // Everything after the scheme is the program text.
        let source = url.as_str().trim_start_matches("javascript:").to_string();
        let result = self.scripts.evaluate(&source);
        debug!(url = %url, "script evaluation parked");

        let consumer = Arc::clone(&self.consumer);
        let set = Arc::clone(&self.set);
        let token = request.token;
        let force_notify = request.force_notify;
        tokio::spawn(async move {
            match result.await {
                Ok(Some(text)) => {
                    let Some(core) =
                        result_stream(consumer, set, url, token, force_notify)
                    else {
                        return;
                    };
                    drive_buffer(core, Bytes::from(text), true).await;
                }
                Ok(None) | Err(_) => {
                    warn!("script evaluation failed");
                    if token.is_some() || force_notify {
                        lock(&consumer).notify(token, NotifyReason::NetworkError);
                    }
                }
            }
        });
    }

    /// Start a stream for a payload that is already resident in memory.
    ///
    /// Delivered on the poll timer like any buffer source; the URL is only
    /// used for correlation and the local-file handshake rules.
    pub fn deliver_buffer(
        &mut self,
        url: &str,
        mime: Option<String>,
        payload: Bytes,
        token: Option<NotifyToken>,
    ) {
        let url = match self.base.join(url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url, error = %e, "dropping buffer delivery with unparsable URL");
                return;
            }
        };
        let Some(core) = self.new_stream(url, token, false) else {
            return;
        };
        if let Some(mime) = mime {
            lock(&core).set_detected_mime(mime);
        }
        tokio::spawn(drive_buffer(core, payload, false));
    }

    fn new_stream(
        &mut self,
        url: Url,
        token: Option<NotifyToken>,
        force_notify: bool,
    ) -> Option<Arc<Mutex<StreamCore<C>>>> {
        new_stream_in(&self.consumer, &self.set, url, token, force_notify)
    }
}

/// Allocate, register, and return a stream core, or `None` once the
/// instance has shut down.
fn new_stream_in<C: Consumer>(
    consumer: &Arc<Mutex<C>>,
    set: &Arc<Mutex<StreamSet>>,
    url: Url,
    token: Option<NotifyToken>,
    force_notify: bool,
) -> Option<Arc<Mutex<StreamCore<C>>>> {
    let id = lock(set).allocate()?;
    let core = Arc::new(Mutex::new(StreamCore::new(
        id,
        url,
        Arc::clone(consumer),
        Arc::clone(set),
        token,
        force_notify,
    )));
    {
        let core = Arc::clone(&core);
        lock(set).attach(id, Box::new(move || lock(&core).cancel()));
    }
    Some(core)
}

fn result_stream<C: Consumer>(
    consumer: Arc<Mutex<C>>,
    set: Arc<Mutex<StreamSet>>,
    url: Url,
    token: Option<NotifyToken>,
    force_notify: bool,
) -> Option<Arc<Mutex<StreamCore<C>>>> {
    let core = new_stream_in(&consumer, &set, url, token, force_notify)?;
    lock(&core).set_detected_mime("text/plain".to_string());
    Some(core)
}
