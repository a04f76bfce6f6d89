use plugstream::JobControl;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Control handle for a job running as a spawned task.
///
/// Suspend and resume flip a watch flag the task checks between chunks, so
/// a suspended job stops producing events after at most one in-flight
/// chunk. Kill aborts the task outright; dropping the task's event sender
/// closes the channel, which the stream driver observes as the job going
/// away.
pub struct TaskJobControl {
    pause: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TaskJobControl {
    pub(crate) fn new(pause: watch::Sender<bool>, handle: JoinHandle<()>) -> Self {
        Self { pause, handle }
    }
}

impl JobControl for TaskJobControl {
    fn suspend(&mut self) {
        let _ = self.pause.send(true);
    }

    fn resume(&mut self) {
        let _ = self.pause.send(false);
    }

    fn kill(&mut self) {
        self.handle.abort();
    }
}

/// Block between chunks while the job is suspended. A dropped control
/// handle reads as resumed, letting an orphaned job drain normally.
pub(crate) async fn wait_resumed(pause: &mut watch::Receiver<bool>) {
    while *pause.borrow() {
        if pause.changed().await.is_err() {
            return;
        }
    }
}
