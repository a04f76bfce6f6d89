//! Delivery of bytes arriving asynchronously from a fetch job.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::debug;

use crate::consumer::Consumer;
use crate::data::POLL_INTERVAL;
use crate::error::StreamError;
use crate::job::{JobControl, JobEvent};
use crate::lock;
use crate::pump::PumpOutcome;
use crate::stream::{FinishReason, StreamCore};

pub(crate) type SharedControl = Arc<Mutex<Box<dyn JobControl>>>;

/// Drive a job-backed stream: queue each arriving chunk, pump it through,
/// and keep the job suspended while the consumer is not keeping up.
///
/// All job callbacks arrive as events on a channel, so nothing here is ever
/// re-entered from inside a job callback. A stream that was finished
/// externally (cancel) is detected at the next event or retry tick; the
/// late event is ignored and the job is killed quietly.
pub(crate) async fn drive_job<C: Consumer>(
    core: Arc<Mutex<StreamCore<C>>>,
    control: SharedControl,
    mut events: mpsc::Receiver<JobEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            JobEvent::TotalSize(size) => {
                let mut core = lock(&core);
                if core.is_finished() {
                    return;
                }
                core.set_total_size(size);
            }
            JobEvent::MimeType(mime) => {
                let mut core = lock(&core);
                if core.is_finished() {
                    return;
                }
                core.set_detected_mime(mime);
                // The detected type is the best information we will get;
                // negotiate now, before any data arrives.
                if let Err(e) = core.handshake() {
                    core.fail(e);
                    lock(&control).kill();
                    return;
                }
                if core.local_file_short_circuit() {
                    core.finish(FinishReason::Done);
                    lock(&control).kill();
                    return;
                }
            }
            JobEvent::Data(chunk) => {
                {
                    let mut core = lock(&core);
                    if core.is_finished() {
                        lock(&control).kill();
                        return;
                    }
                    if let Err(e) = core.handshake() {
                        core.fail(e);
                        lock(&control).kill();
                        return;
                    }
                    if core.local_file_short_circuit() {
                        core.finish(FinishReason::Done);
                        lock(&control).kill();
                        return;
                    }
                    core.queue_payload(chunk);
                }
                if !pump_until_drained(&core, &control).await {
                    return;
                }
            }
            JobEvent::Finished { error } => {
                let mut core = lock(&core);
                if core.is_finished() {
                    return;
                }
                if error {
                    core.fail(StreamError::SourceFailed);
                } else {
                    // A zero-byte success still announces the stream so the
                    // consumer sees a begin/destroy pair.
                    match core.handshake() {
                        Ok(()) => core.finish(FinishReason::Done),
                        Err(e) => core.fail(e),
                    }
                }
                return;
            }
        }
    }

    // The job vanished without reporting completion.
    let mut core = lock(&core);
    if !core.is_finished() {
        core.fail(StreamError::SourceFailed);
    }
}

/// Pump the queued chunk until it drains, suspending the job and retrying
/// on a timer while the consumer makes no progress. Returns `false` when
/// the stream reached a terminal state.
async fn pump_until_drained<C: Consumer>(
    core: &Arc<Mutex<StreamCore<C>>>,
    control: &SharedControl,
) -> bool {
    let mut suspended = false;
    loop {
        let outcome = {
            let mut core = lock(core);
            if core.is_finished() {
                lock(control).kill();
                return false;
            }
            match core.pump() {
                Ok(outcome) => outcome,
                Err(e) => {
                    core.fail(e);
                    lock(control).kill();
                    return false;
                }
            }
        };

        match outcome {
            PumpOutcome::Drained => break,
            PumpOutcome::Rejected => {
                lock(core).finish(FinishReason::Error);
                lock(control).kill();
                return false;
            }
            PumpOutcome::Stalled => {
                if lock(core).stalled_out() {
                    lock(core).finish(FinishReason::Error);
                    lock(control).kill();
                    return false;
                }
                if !suspended {
                    debug!("suspending job while the consumer catches up");
                    lock(control).suspend();
                    suspended = true;
                }
                sleep(POLL_INTERVAL).await;
            }
        }
    }
    if suspended {
        debug!("queued chunk drained, resuming job");
        lock(control).resume();
    }
    true
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use url::Url;

    use super::*;
    use crate::data::{DestroyReason, NotifyReason, NotifyToken};
    use crate::mock::{ConsumerEvent, MockConsumer, MockJobFactory};
    use crate::stream::StreamSet;

    fn spawnable(
        consumer: MockConsumer,
        token: Option<NotifyToken>,
    ) -> Arc<Mutex<StreamCore<MockConsumer>>> {
        Arc::new(Mutex::new(StreamCore::new(
            0,
            Url::parse("http://host/movie.swf").unwrap(),
            Arc::new(Mutex::new(consumer)),
            Arc::new(Mutex::new(StreamSet::new())),
            token,
            false,
        )))
    }

    fn run_scripted(events: Vec<JobEvent>) -> (MockJobFactory, SharedControl, mpsc::Receiver<JobEvent>) {
        let factory = MockJobFactory::new().with_default_script(events);
        let started = crate::job::JobFactory::start(
            &factory,
            crate::job::JobSpec {
                url: Url::parse("http://host/movie.swf").unwrap(),
                post: None,
                reload: false,
            },
        );
        let control: SharedControl = Arc::new(Mutex::new(started.control));
        (factory, control, started.events)
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_chunks_in_order() {
        let consumer = MockConsumer::new();
        let probe = consumer.clone();
        let core = spawnable(consumer, Some(NotifyToken(3)));

        let (_factory, control, events) = run_scripted(vec![
            JobEvent::MimeType("application/pdf".to_string()),
            JobEvent::TotalSize(8),
            JobEvent::Data(Bytes::from_static(b"abcd")),
            JobEvent::Data(Bytes::from_static(b"efgh")),
            JobEvent::Finished { error: false },
        ]);
        drive_job(core.clone(), control, events).await;

        assert_eq!(probe.accepted(), b"abcdefgh");
        assert_eq!(lock(&core).cursor(), 8);
        assert!(probe.events().contains(&ConsumerEvent::BeginStream {
            mime: "application/pdf".to_string(),
            seekable: false,
        }));
        assert!(
            probe
                .events()
                .contains(&ConsumerEvent::DestroyStream(DestroyReason::Done))
        );
        assert!(probe.events().contains(&ConsumerEvent::Notify {
            token: Some(NotifyToken(3)),
            reason: NotifyReason::Done,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn suspends_while_stalled_then_resumes() {
        // First chunk drains immediately; the second stalls twice before
        // the consumer recovers.
        let consumer = MockConsumer::new().with_capacity_script(vec![4, 0, 0, i64::MAX]);
        let probe = consumer.clone();
        let core = spawnable(consumer, None);

        let (factory, control, events) = run_scripted(vec![
            JobEvent::Data(Bytes::from_static(b"abcd")),
            JobEvent::Data(Bytes::from_static(b"efgh")),
            JobEvent::Finished { error: false },
        ]);
        drive_job(core.clone(), control, events).await;

        assert_eq!(probe.accepted(), b"abcdefgh");
        let log = factory.job_log(0);
        assert_eq!(log.suspends, 1);
        assert_eq!(log.resumes, 1);
        assert_eq!(log.kills, 0);
        // Retries reset once the consumer accepted again.
        assert_eq!(lock(&core).retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn kills_job_when_stall_budget_is_spent() {
        let consumer = MockConsumer::new().with_default_capacity(0);
        let probe = consumer.clone();
        let core = spawnable(consumer, Some(NotifyToken(5)));

        let (factory, control, events) = run_scripted(vec![
            JobEvent::Data(Bytes::from_static(b"abcd")),
            JobEvent::Finished { error: false },
        ]);
        drive_job(core.clone(), control, events).await;

        assert_eq!(factory.job_log(0).kills, 1);
        assert!(
            probe
                .events()
                .contains(&ConsumerEvent::DestroyStream(DestroyReason::NetworkError))
        );
        assert!(probe.events().contains(&ConsumerEvent::Notify {
            token: Some(NotifyToken(5)),
            reason: NotifyReason::NetworkError,
        }));
        assert!(matches!(
            lock(&core).error(),
            Some(StreamError::ConsumerStalled(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn job_failure_finishes_in_error_despite_partial_delivery() {
        let consumer = MockConsumer::new();
        let probe = consumer.clone();
        let core = spawnable(consumer, None);

        let (_factory, control, events) = run_scripted(vec![
            JobEvent::Data(Bytes::from_static(b"partial")),
            JobEvent::Finished { error: true },
        ]);
        drive_job(core.clone(), control, events).await;

        // Delivered bytes are not rolled back.
        assert_eq!(probe.accepted(), b"partial");
        assert!(
            probe
                .events()
                .contains(&ConsumerEvent::DestroyStream(DestroyReason::NetworkError))
        );
        assert!(matches!(lock(&core).error(), Some(StreamError::SourceFailed)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_byte_success_still_pairs_begin_and_destroy() {
        let consumer = MockConsumer::new();
        let probe = consumer.clone();
        let core = spawnable(consumer, None);

        let (_factory, control, events) = run_scripted(vec![JobEvent::Finished { error: false }]);
        drive_job(core, control, events).await;

        assert!(
            probe
                .events()
                .iter()
                .any(|e| matches!(e, ConsumerEvent::BeginStream { .. }))
        );
        assert!(
            probe
                .events()
                .contains(&ConsumerEvent::DestroyStream(DestroyReason::Done))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn canceled_stream_ignores_late_events() {
        let consumer = MockConsumer::new();
        let probe = consumer.clone();
        let core = spawnable(consumer, None);

        lock(&core).cancel();
        let (factory, control, events) = run_scripted(vec![
            JobEvent::Data(Bytes::from_static(b"late")),
            JobEvent::Finished { error: false },
        ]);
        drive_job(core, control, events).await;

        assert_eq!(probe.accept_calls(), 0);
        assert_eq!(factory.job_log(0).kills, 1);
        // The cancel itself produced no destroy either: the stream was
        // never announced to the consumer.
        assert!(
            !probe
                .events()
                .iter()
                .any(|e| matches!(e, ConsumerEvent::DestroyStream(_)))
        );
    }
}
