use bytes::Bytes;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use plugstream::{JobEvent, JobFactory, JobSpec, StartedJob};

use crate::control::{TaskJobControl, wait_resumed};
use crate::{EVENT_BUFFER, FILE_CHUNK};

/// Replays `file://` URLs as a chunked event stream.
///
/// Used directly for local content a consumer wants streamed, and as the
/// local-scheme fallback of the HTTP factory. Delivery modes that only
/// need the file path never reach a job at all; this factory serves the
/// streaming modes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileJobFactory;

impl FileJobFactory {
    pub fn new() -> Self {
        Self
    }
}

impl JobFactory for FileJobFactory {
    fn start(&self, spec: JobSpec) -> StartedJob {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (pause_tx, pause_rx) = watch::channel(false);
        let handle = tokio::spawn(run_file(spec, tx, pause_rx));
        StartedJob {
            control: Box::new(TaskJobControl::new(pause_tx, handle)),
            events: rx,
        }
    }
}

pub(crate) async fn run_file(
    spec: JobSpec,
    tx: mpsc::Sender<JobEvent>,
    mut pause: watch::Receiver<bool>,
) {
    let Ok(path) = spec.url.to_file_path() else {
        let _ = tx.send(JobEvent::Finished { error: true }).await;
        return;
    };

    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "local file open failed");
            let _ = tx.send(JobEvent::Finished { error: true }).await;
            return;
        }
    };

    if let Ok(meta) = file.metadata().await
        && tx.send(JobEvent::TotalSize(meta.len())).await.is_err()
    {
        return;
    }

    let mut buf = vec![0u8; FILE_CHUNK];
    loop {
        wait_resumed(&mut pause).await;
        match file.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if tx.send(JobEvent::Data(chunk)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "local file read failed");
                let _ = tx.send(JobEvent::Finished { error: true }).await;
                return;
            }
        }
    }
    let _ = tx.send(JobEvent::Finished { error: false }).await;
}
