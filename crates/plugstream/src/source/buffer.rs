//! Timer-driven delivery of payloads that are already resident in memory.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::time::sleep;

use crate::consumer::Consumer;
use crate::data::POLL_INTERVAL;
use crate::lock;
use crate::pump::PumpOutcome;
use crate::stream::{FinishReason, StreamCore};

/// Drive a buffer-backed stream to completion.
///
/// Each timer tick pumps once. With `single_shot` set (result payloads,
/// e.g. script-evaluation output) the stream finishes unconditionally after
/// exactly one pump cycle, even if the buffer did not fully drain: results
/// are ephemeral and not worth retrying, and truncation is accepted.
pub(crate) async fn drive_buffer<C: Consumer>(
    core: Arc<Mutex<StreamCore<C>>>,
    payload: Bytes,
    single_shot: bool,
) {
    {
        let mut core = lock(&core);
        if core.is_finished() {
            return;
        }
        if let Err(e) = core.handshake() {
            core.fail(e);
            return;
        }
        if core.local_file_short_circuit() {
            core.finish(FinishReason::Done);
            return;
        }
        core.set_total_size(payload.len() as u64);
        core.queue_payload(payload);
    }

    loop {
        sleep(POLL_INTERVAL).await;

        let mut core = lock(&core);
        if core.is_finished() {
            return;
        }
        let outcome = match core.pump() {
            Ok(outcome) => outcome,
            Err(e) => {
                core.fail(e);
                return;
            }
        };

        if single_shot {
            core.finish(match outcome {
                PumpOutcome::Rejected => FinishReason::Error,
                _ => FinishReason::Done,
            });
            return;
        }

        match outcome {
            PumpOutcome::Drained => {
                core.finish(FinishReason::Done);
                return;
            }
            PumpOutcome::Rejected => {
                core.finish(FinishReason::Error);
                return;
            }
            PumpOutcome::Stalled => {
                if core.stalled_out() {
                    core.finish(FinishReason::Error);
                    return;
                }
                // Re-arm the timer and try again next tick.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;
    use crate::data::{DeliveryMode, DestroyReason, NotifyReason, NotifyToken, STALL_BUDGET};
    use crate::mock::{ConsumerEvent, MockConsumer};
    use crate::stream::StreamSet;

    fn spawnable(
        consumer: MockConsumer,
        url: &str,
        token: Option<NotifyToken>,
    ) -> Arc<Mutex<StreamCore<MockConsumer>>> {
        Arc::new(Mutex::new(StreamCore::new(
            0,
            Url::parse(url).unwrap(),
            Arc::new(Mutex::new(consumer)),
            Arc::new(Mutex::new(StreamSet::new())),
            token,
            false,
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn drains_across_ticks_when_capacity_is_limited() {
        let consumer = MockConsumer::new().with_capacity_script(vec![4, 0, 4, 4]);
        let probe = consumer.clone();
        let core = spawnable(consumer, "http://host/buf", Some(NotifyToken(1)));

        drive_buffer(core.clone(), Bytes::from_static(b"0123456789ab"), false).await;

        assert_eq!(probe.accepted(), b"0123456789ab");
        assert_eq!(lock(&core).cursor(), 12);
        assert!(
            probe
                .events()
                .contains(&ConsumerEvent::DestroyStream(DestroyReason::Done))
        );
        assert!(probe.events().contains(&ConsumerEvent::Notify {
            token: Some(NotifyToken(1)),
            reason: NotifyReason::Done,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_capacity_cancels_after_exactly_the_budget() {
        let consumer = MockConsumer::new().with_default_capacity(0);
        let probe = consumer.clone();
        let core = spawnable(consumer, "http://host/buf", None);

        drive_buffer(core.clone(), Bytes::from_static(b"stuck"), false).await;

        // One capacity query per pump cycle, and exactly the budget's worth
        // of cycles before the cancel.
        assert_eq!(probe.capacity_calls(), STALL_BUDGET as usize);
        assert_eq!(probe.accept_calls(), 0);
        assert!(
            probe
                .events()
                .contains(&ConsumerEvent::DestroyStream(DestroyReason::NetworkError))
        );
        assert_eq!(lock(&core).cursor(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn single_shot_finishes_done_even_when_truncated() {
        // Consumer only has room for 3 of the 7 result bytes; the
        // remainder is dropped deliberately.
        let consumer = MockConsumer::new().with_capacity_script(vec![3, 0]);
        let probe = consumer.clone();
        let core = spawnable(consumer, "http://host/result", Some(NotifyToken(9)));

        drive_buffer(core.clone(), Bytes::from_static(b"r3sult!"), true).await;

        assert_eq!(probe.accepted(), b"r3s");
        assert_eq!(lock(&core).cursor(), 3);
        assert!(
            probe
                .events()
                .contains(&ConsumerEvent::DestroyStream(DestroyReason::Done))
        );
        assert!(probe.events().contains(&ConsumerEvent::Notify {
            token: Some(NotifyToken(9)),
            reason: NotifyReason::Done,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn single_shot_rejection_is_an_error() {
        let consumer = MockConsumer::new().with_reject_after(0);
        let probe = consumer.clone();
        let core = spawnable(consumer, "http://host/result", None);

        drive_buffer(core, Bytes::from_static(b"nope"), true).await;

        assert!(
            probe
                .events()
                .contains(&ConsumerEvent::DestroyStream(DestroyReason::NetworkError))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn local_file_only_source_skips_pumping() {
        let consumer = MockConsumer::new().with_mode(DeliveryMode::AsFileOnly);
        let probe = consumer.clone();
        let core = spawnable(consumer, "file:///srv/doc.pdf", Some(NotifyToken(4)));

        drive_buffer(core.clone(), Bytes::from_static(b"ignored"), false).await;

        assert_eq!(probe.accept_calls(), 0);
        assert_eq!(lock(&core).cursor(), 0);
        assert!(probe.events().contains(&ConsumerEvent::DeliverAsFile(
            std::path::PathBuf::from("/srv/doc.pdf")
        )));
        assert!(
            probe
                .events()
                .contains(&ConsumerEvent::DestroyStream(DestroyReason::Done))
        );
    }
}
