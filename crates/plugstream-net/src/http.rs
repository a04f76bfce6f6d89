use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use plugstream::{JobEvent, JobFactory, JobSpec, StartedJob};

use crate::EVENT_BUFFER;
use crate::control::{TaskJobControl, wait_resumed};
use crate::file::run_file;

/// Streams HTTP and HTTPS responses through `reqwest`.
///
/// GET by default; a request carrying post data becomes a POST with the
/// recorded content type. Reload requests send `Cache-Control: no-cache`
/// so intermediaries revalidate. `file://` URLs fall through to the local
/// file reader.
#[derive(Debug, Clone, Default)]
pub struct ReqwestJobFactory {
    client: reqwest::Client,
}

impl ReqwestJobFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl JobFactory for ReqwestJobFactory {
    fn start(&self, spec: JobSpec) -> StartedJob {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let (pause_tx, pause_rx) = watch::channel(false);
        let handle = if spec.url.scheme() == "file" {
            tokio::spawn(run_file(spec, tx, pause_rx))
        } else {
            tokio::spawn(run_http(self.client.clone(), spec, tx, pause_rx))
        };
        StartedJob {
            control: Box::new(TaskJobControl::new(pause_tx, handle)),
            events: rx,
        }
    }
}

async fn run_http(
    client: reqwest::Client,
    spec: JobSpec,
    tx: mpsc::Sender<JobEvent>,
    mut pause: watch::Receiver<bool>,
) {
    let mut request = match &spec.post {
        Some(post) => client
            .post(spec.url.clone())
            .header(reqwest::header::CONTENT_TYPE, post.content_type.clone())
            .body(post.body.clone()),
        None => client.get(spec.url.clone()),
    };
    if spec.reload {
        request = request.header(reqwest::header::CACHE_CONTROL, "no-cache");
    }

    let response = match request.send().await.and_then(|r| r.error_for_status()) {
        Ok(response) => response,
        Err(e) => {
            debug!(url = %spec.url, error = %e, "request failed");
            let _ = tx.send(JobEvent::Finished { error: true }).await;
            return;
        }
    };

    if let Some(len) = response.content_length()
        && tx.send(JobEvent::TotalSize(len)).await.is_err()
    {
        return;
    }
    // The MIME type is the media type alone, without parameters.
    if let Some(mime) = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
    {
        let mime = mime.trim().to_string();
        if !mime.is_empty() && tx.send(JobEvent::MimeType(mime)).await.is_err() {
            return;
        }
    }

    let mut body = response.bytes_stream();
    loop {
        wait_resumed(&mut pause).await;
        match body.next().await {
            Some(Ok(chunk)) => {
                if tx.send(JobEvent::Data(chunk)).await.is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                debug!(url = %spec.url, error = %e, "response body failed");
                let _ = tx.send(JobEvent::Finished { error: true }).await;
                return;
            }
            None => break,
        }
    }
    let _ = tx.send(JobEvent::Finished { error: false }).await;
}
