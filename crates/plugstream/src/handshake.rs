//! One-time delivery-mode negotiation with the consumer.

use tracing::debug;

use crate::consumer::Consumer;
use crate::data::DEFAULT_MIME;
use crate::error::StreamError;
use crate::lock;
use crate::staging::FileStaging;
use crate::stream::StreamCore;

impl<C: Consumer> StreamCore<C> {
    /// Negotiate how the consumer wants this stream delivered.
    ///
    /// Runs exactly once per stream; a second call is a no-op. If the
    /// negotiated mode requires a local file, staging is opened here —
    /// unless the source is already a local file, whose path is reused
    /// verbatim instead of copying.
    pub(crate) fn handshake(&mut self) -> Result<(), StreamError> {
        if self.handshaken {
            return Ok(());
        }
        self.handshaken = true;

        let mime = self.mime.as_deref().unwrap_or(DEFAULT_MIME).to_string();
        let mode = lock(self.consumer()).begin_stream(&mime, false);
        self.mode = mode;
        debug!(id = self.id(), mime, ?mode, "stream handshake");

        if mode.needs_file() {
            if self.url().scheme() == "file" {
                self.local_path = self.url().to_file_path().ok();
            }
            if self.local_path.is_none() {
                self.staging = Some(FileStaging::create()?);
            }
        }
        Ok(())
    }

    /// True when the negotiated mode is file-only and the source already is
    /// a local file: the stream finishes right after the handshake with
    /// zero bytes pumped.
    pub(crate) fn local_file_short_circuit(&self) -> bool {
        self.mode == crate::data::DeliveryMode::AsFileOnly && self.local_path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use url::Url;

    use super::*;
    use crate::data::DeliveryMode;
    use crate::mock::{ConsumerEvent, MockConsumer};
    use crate::stream::StreamSet;

    fn core(consumer: MockConsumer, url: &str) -> StreamCore<MockConsumer> {
        StreamCore::new(
            0,
            Url::parse(url).unwrap(),
            Arc::new(Mutex::new(consumer)),
            Arc::new(Mutex::new(StreamSet::new())),
            None,
            false,
        )
    }

    #[test]
    fn negotiates_once() {
        let consumer = MockConsumer::new();
        let probe = consumer.clone();
        let mut core = core(consumer, "http://host/data.bin");

        core.handshake().unwrap();
        core.handshake().unwrap();

        let begins = probe
            .events()
            .iter()
            .filter(|e| matches!(e, ConsumerEvent::BeginStream { .. }))
            .count();
        assert_eq!(begins, 1);
        assert_eq!(core.mode(), DeliveryMode::Streaming);
        assert!(core.staging.is_none());
    }

    #[test]
    fn falls_back_to_default_mime() {
        let consumer = MockConsumer::new();
        let probe = consumer.clone();
        let mut core = core(consumer, "http://host/data.bin");
        core.handshake().unwrap();

        assert!(probe.events().contains(&ConsumerEvent::BeginStream {
            mime: DEFAULT_MIME.to_string(),
            seekable: false,
        }));
    }

    #[test]
    fn file_mode_opens_staging_for_remote_source() {
        let consumer = MockConsumer::new().with_mode(DeliveryMode::AsFileThenStream);
        let mut core = core(consumer, "http://host/data.bin");
        core.handshake().unwrap();

        assert!(core.staging.is_some());
        assert!(core.local_path.is_none());
        assert!(!core.local_file_short_circuit());
    }

    #[test]
    fn local_source_reuses_path_without_staging() {
        let consumer = MockConsumer::new().with_mode(DeliveryMode::AsFileOnly);
        let mut core = core(consumer, "file:///opt/media/movie.swf");
        core.handshake().unwrap();

        assert!(core.staging.is_none());
        assert_eq!(
            core.local_path.as_deref(),
            Some(std::path::Path::new("/opt/media/movie.swf"))
        );
        assert!(core.local_file_short_circuit());
    }

    #[test]
    fn detected_mime_wins_over_default() {
        let consumer = MockConsumer::new();
        let probe = consumer.clone();
        let mut core = core(consumer, "http://host/movie.swf");
        core.set_detected_mime("application/x-shockwave-flash".to_string());
        core.handshake().unwrap();

        assert!(probe.events().contains(&ConsumerEvent::BeginStream {
            mime: "application/x-shockwave-flash".to_string(),
            seekable: false,
        }));
    }
}
