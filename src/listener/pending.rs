//! Per-source pending queue and coalescing state machine
//!
//! Lifecycle: capturing → (queued ⇄ coalescing) → ended → closed. Frames
//! queue up until the downstream speaker acknowledges the stream start, then
//! move into a coalesce buffer that is flushed either when it reaches the
//! coalescing threshold or when the driver's bounded flush timer fires.
//!
//! The queue itself is pure state; timers and sockets live in the driver
//! ([`crate::listener::agent`]), which keeps every transition unit-testable.

use bytes::Bytes;
use std::collections::VecDeque;

use crate::protocol::FrameRecord;

/// Result of offering one captured frame to the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored in the raw queue awaiting the ack
    Queued,

    /// Raw queue at capacity; the incoming frame was dropped
    Dropped,

    /// Appended to the coalesce buffer; `ready` is true when the buffer has
    /// reached the coalescing threshold and should flush now
    Coalesced { ready: bool },
}

/// Pending frames for one active source
pub struct PendingQueue {
    raw: VecDeque<Bytes>,
    coalesce: Vec<Bytes>,
    acked: bool,
    ended: bool,
    /// Next sequence to assign; increments once per frame, not per message
    next_sequence: u32,
    raw_cap: usize,
    threshold: usize,
    dropped: u64,
}

impl PendingQueue {
    pub fn new(raw_cap: usize, threshold: usize) -> Self {
        Self {
            raw: VecDeque::new(),
            coalesce: Vec::new(),
            acked: false,
            ended: false,
            next_sequence: 1,
            raw_cap,
            threshold,
            dropped: 0,
        }
    }

    /// Offer one captured frame
    ///
    /// Pre-ack frames go to the raw queue, which drops the incoming frame
    /// (not the head) at capacity: the head frames are the ones the speaker
    /// will want first once it acks.
    pub fn push_frame(&mut self, frame: Bytes) -> PushOutcome {
        if !self.acked {
            if self.raw.len() >= self.raw_cap {
                self.dropped += 1;
                return PushOutcome::Dropped;
            }
            self.raw.push_back(frame);
            return PushOutcome::Queued;
        }

        self.coalesce.push(frame);
        PushOutcome::Coalesced {
            ready: self.coalesce.len() >= self.threshold,
        }
    }

    /// Apply the speaker's ack: move the raw queue into the coalesce buffer
    /// in FIFO order. Returns true when the buffer already meets the
    /// coalescing threshold and should flush immediately.
    pub fn acknowledge(&mut self) -> bool {
        self.acked = true;
        self.coalesce.extend(self.raw.drain(..));
        self.coalesce.len() >= self.threshold
    }

    /// Mark the upstream burst as ended
    pub fn end(&mut self) {
        self.ended = true;
    }

    /// Take the coalesce buffer as sequenced records for one wire message
    pub fn take_flush(&mut self) -> Vec<FrameRecord> {
        self.coalesce
            .drain(..)
            .map(|payload| {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                FrameRecord { sequence, payload }
            })
            .collect()
    }

    /// Whether flushable frames are waiting (used to arm the flush timer)
    pub fn has_pending(&self) -> bool {
        !self.coalesce.is_empty()
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Frames dropped at the raw-queue capacity bound
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    #[cfg(test)]
    fn raw_len(&self) -> usize {
        self.raw.len()
    }
}
