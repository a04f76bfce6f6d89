//! The flow-control loop: drain queued bytes into the consumer at the pace
//! the consumer dictates.

use tracing::warn;

use crate::consumer::Consumer;
use crate::data::{DeliveryMode, STALL_BUDGET, STALL_WARN_AFTER};
use crate::error::StreamError;
use crate::lock;
use crate::stream::StreamCore;

/// Result of one pump cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpOutcome {
    /// The currently queued range is fully drained.
    Drained,
    /// The consumer made no progress this cycle; retry later. Check
    /// [`StreamCore::stalled_out`] for budget exhaustion.
    Stalled,
    /// The consumer rejected the stream; no retry.
    Rejected,
}

impl<C: Consumer> StreamCore<C> {
    /// Offer the queued bytes to the consumer in consumer-chosen chunk
    /// sizes until the queue drains or the consumer stops accepting.
    ///
    /// Partial acceptance (a positive return smaller than offered) advances
    /// the cursor and keeps looping; zero capacity or a zero accept ends
    /// the cycle as a stall; a negative accept rejects the stream. In
    /// file-only mode the whole queued range goes to staging instead and no
    /// partial-acceptance semantics apply.
    pub(crate) fn pump(&mut self) -> Result<PumpOutcome, StreamError> {
        if self.mode == DeliveryMode::AsFileOnly {
            return self.pump_to_staging();
        }

        while !self.queue.is_drained() {
            let capacity = lock(self.consumer()).capacity();
            if capacity <= 0 {
                return Ok(self.record_stall());
            }

            let chunk = (capacity as usize).min(self.queue.remaining());
            let sent = lock(self.consumer()).accept(&self.queue.pending()[..chunk]);
            if sent < 0 {
                self.error = Some(StreamError::RejectedByConsumer);
                return Ok(PumpOutcome::Rejected);
            }
            if sent == 0 {
                return Ok(self.record_stall());
            }

            let sent = (sent as usize).min(chunk);
            if self.mode == DeliveryMode::AsFileThenStream
                && let Some(staging) = self.staging.as_mut()
            {
                staging.append(&self.queue.pending()[..sent])?;
            }
            self.queue.advance(sent);
            self.cursor += sent as u64;
            self.retries = 0;
        }
        Ok(PumpOutcome::Drained)
    }

    fn pump_to_staging(&mut self) -> Result<PumpOutcome, StreamError> {
        let n = self.queue.remaining();
        if n > 0 {
            if let Some(staging) = self.staging.as_mut() {
                staging.append(self.queue.pending())?;
            }
            self.queue.advance(n);
            self.cursor += n as u64;
            self.retries = 0;
        }
        Ok(PumpOutcome::Drained)
    }

    fn record_stall(&mut self) -> PumpOutcome {
        self.retries += 1;
        self.stall_cycles += 1;
        if self.retries == STALL_WARN_AFTER {
            warn!(
                id = self.id(),
                retries = self.retries,
                "consumer stalled, will keep retrying"
            );
        }
        if self.stall_cycles >= STALL_BUDGET {
            self.error = Some(StreamError::ConsumerStalled(self.stall_cycles));
        }
        PumpOutcome::Stalled
    }
}
