//! Scripted collaborators for testing the engine without a real plugin,
//! browser frame, script host, or network.
//!
//! Every mock is a cheap clone over shared state, so tests keep a probe
//! clone and hand the original to the engine.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use url::Url;

use crate::consumer::{Consumer, FrameHost, ScriptEvaluator};
use crate::data::{DeliveryMode, DestroyReason, NotifyReason, NotifyToken, PostData};
use crate::job::{JobControl, JobEvent, JobFactory, JobSpec, StartedJob};
use crate::lock;

/// Observable calls the engine made on a [`MockConsumer`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerEvent {
    BeginStream { mime: String, seekable: bool },
    DeliverAsFile(PathBuf),
    DestroyStream(DestroyReason),
    Notify {
        token: Option<NotifyToken>,
        reason: NotifyReason,
    },
}

#[derive(Debug)]
struct ConsumerState {
    mode: DeliveryMode,
    capacity_script: VecDeque<i64>,
    default_capacity: i64,
    reject_after: Option<usize>,
    events: Vec<ConsumerEvent>,
    accepted: Vec<u8>,
    accept_calls: usize,
    capacity_calls: usize,
}

/// A consumer whose capacity and acceptance behavior is scripted.
///
/// By default it negotiates [`DeliveryMode::Streaming`] and accepts
/// everything offered. `with_capacity_script` answers the next capacity
/// queries from the script, then falls back to the default capacity.
#[derive(Debug, Clone)]
pub struct MockConsumer {
    state: Arc<Mutex<ConsumerState>>,
}

impl MockConsumer {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ConsumerState {
                mode: DeliveryMode::Streaming,
                capacity_script: VecDeque::new(),
                default_capacity: i64::MAX,
                reject_after: None,
                events: Vec::new(),
                accepted: Vec::new(),
                accept_calls: 0,
                capacity_calls: 0,
            })),
        }
    }

    pub fn with_mode(self, mode: DeliveryMode) -> Self {
        lock(&self.state).mode = mode;
        self
    }

    pub fn with_capacity_script(self, script: Vec<i64>) -> Self {
        lock(&self.state).capacity_script = script.into();
        self
    }

    pub fn with_default_capacity(self, capacity: i64) -> Self {
        lock(&self.state).default_capacity = capacity;
        self
    }

    /// Reject (return `-1`) once this many bytes have been accepted.
    pub fn with_reject_after(self, bytes: usize) -> Self {
        lock(&self.state).reject_after = Some(bytes);
        self
    }

    pub fn events(&self) -> Vec<ConsumerEvent> {
        lock(&self.state).events.clone()
    }

    /// Every byte this consumer actually accepted, in order.
    pub fn accepted(&self) -> Vec<u8> {
        lock(&self.state).accepted.clone()
    }

    pub fn accept_calls(&self) -> usize {
        lock(&self.state).accept_calls
    }

    pub fn capacity_calls(&self) -> usize {
        lock(&self.state).capacity_calls
    }
}

impl Default for MockConsumer {
    fn default() -> Self {
        Self::new()
    }
}

impl Consumer for MockConsumer {
    fn begin_stream(&mut self, mime_type: &str, seekable: bool) -> DeliveryMode {
        let mut state = lock(&self.state);
        state.events.push(ConsumerEvent::BeginStream {
            mime: mime_type.to_string(),
            seekable,
        });
        state.mode
    }

    fn capacity(&mut self) -> i64 {
        let mut state = lock(&self.state);
        state.capacity_calls += 1;
        state
            .capacity_script
            .pop_front()
            .unwrap_or(state.default_capacity)
    }

    fn accept(&mut self, bytes: &[u8]) -> i64 {
        let mut state = lock(&self.state);
        state.accept_calls += 1;
        if let Some(limit) = state.reject_after
            && state.accepted.len() >= limit
        {
            return -1;
        }
        state.accepted.extend_from_slice(bytes);
        bytes.len() as i64
    }

    fn deliver_as_file(&mut self, path: &Path) {
        lock(&self.state)
            .events
            .push(ConsumerEvent::DeliverAsFile(path.to_path_buf()));
    }

    fn destroy_stream(&mut self, reason: DestroyReason) {
        lock(&self.state)
            .events
            .push(ConsumerEvent::DestroyStream(reason));
    }

    fn notify(&mut self, token: Option<NotifyToken>, reason: NotifyReason) {
        lock(&self.state)
            .events
            .push(ConsumerEvent::Notify { token, reason });
    }
}

/// Control calls recorded by a scripted job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobLog {
    pub suspends: usize,
    pub resumes: usize,
    pub kills: usize,
}

/// What the dispatcher asked the factory to start.
#[derive(Debug, Clone, PartialEq)]
pub struct StartRecord {
    pub url: String,
    pub post: Option<PostData>,
    pub reload: bool,
}

type HeldSender = Arc<Mutex<Option<mpsc::Sender<JobEvent>>>>;

#[derive(Debug, Default)]
struct FactoryState {
    default_script: Vec<JobEvent>,
    scripts: HashMap<String, Vec<JobEvent>>,
    started: Vec<StartRecord>,
    logs: Vec<Arc<Mutex<JobLog>>>,
    // Keeps scripted jobs "running" until they are killed: the channel
    // only closes once the sender is dropped.
    senders: Vec<HeldSender>,
}

/// A job factory that replays scripted event sequences instead of doing
/// I/O. All events are buffered into the job channel up front; suspend and
/// resume are merely recorded.
#[derive(Debug, Clone, Default)]
pub struct MockJobFactory {
    state: Arc<Mutex<FactoryState>>,
}

impl MockJobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script used for any URL without a dedicated script.
    pub fn with_default_script(self, events: Vec<JobEvent>) -> Self {
        lock(&self.state).default_script = events;
        self
    }

    pub fn with_script(self, url: impl Into<String>, events: Vec<JobEvent>) -> Self {
        lock(&self.state).scripts.insert(url.into(), events);
        self
    }

    /// Jobs started so far, in creation order.
    pub fn started(&self) -> Vec<StartRecord> {
        lock(&self.state).started.clone()
    }

    /// Control log of the `index`-th started job.
    pub fn job_log(&self, index: usize) -> JobLog {
        let state = lock(&self.state);
        lock(&state.logs[index]).clone()
    }
}

struct MockJobControl {
    log: Arc<Mutex<JobLog>>,
    sender: HeldSender,
}

impl JobControl for MockJobControl {
    fn suspend(&mut self) {
        lock(&self.log).suspends += 1;
    }

    fn resume(&mut self) {
        lock(&self.log).resumes += 1;
    }

    fn kill(&mut self) {
        lock(&self.log).kills += 1;
        // Closes the event channel, as a killed job goes quiet.
        *lock(&self.sender) = None;
    }
}

impl JobFactory for MockJobFactory {
    fn start(&self, spec: JobSpec) -> StartedJob {
        let mut state = lock(&self.state);
        let events = state
            .scripts
            .get(spec.url.as_str())
            .cloned()
            .unwrap_or_else(|| state.default_script.clone());
        state.started.push(StartRecord {
            url: spec.url.to_string(),
            post: spec.post,
            reload: spec.reload,
        });

        let log = Arc::new(Mutex::new(JobLog::default()));
        state.logs.push(Arc::clone(&log));

        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            // Capacity covers the whole script.
            let _ = tx.try_send(event);
        }
        let sender: HeldSender = Arc::new(Mutex::new(Some(tx)));
        state.senders.push(Arc::clone(&sender));
        StartedJob {
            control: Box::new(MockJobControl { log, sender }),
            events: rx,
        }
    }
}

/// Records frame-targeted forwards.
#[derive(Debug, Clone, Default)]
pub struct RecordingFrameHost {
    opened: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingFrameHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<(String, String)> {
        lock(&self.opened).clone()
    }
}

impl FrameHost for RecordingFrameHost {
    fn open_in_frame(&mut self, url: &Url, frame: &str) {
        lock(&self.opened).push((url.to_string(), frame.to_string()));
    }
}

#[derive(Debug, Default)]
struct EvaluatorState {
    results: VecDeque<Option<String>>,
    sources: Vec<String>,
}

/// A script evaluator that resolves immediately with queued results.
/// An empty queue resolves to `None` (evaluation failure).
#[derive(Debug, Clone, Default)]
pub struct MockEvaluator {
    state: Arc<Mutex<EvaluatorState>>,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(self, result: Option<String>) -> Self {
        lock(&self.state).results.push_back(result);
        self
    }

    /// Program texts this evaluator was handed, in order.
    pub fn sources(&self) -> Vec<String> {
        lock(&self.state).sources.clone()
    }
}

impl ScriptEvaluator for MockEvaluator {
    fn evaluate(&mut self, source: &str) -> oneshot::Receiver<Option<String>> {
        let mut state = lock(&self.state);
        state.sources.push(source.to_string());
        let result = state.results.pop_front().unwrap_or(None);
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        rx
    }
}
