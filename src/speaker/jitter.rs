//! Dedupe and pacing jitter buffer
//!
//! Bounded FIFO of frames awaiting emission for the currently playing
//! source. Absorbs arrival burstiness behind a warm-up threshold and bounds
//! latency growth by dropping the oldest frame on overflow.

use bytes::Bytes;
use std::collections::VecDeque;

/// Result of offering a sequenced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    Accepted,
    /// Sequence at or below the dedupe cursor; frame discarded
    Duplicate,
}

/// Jitter buffer for one playing source
pub struct JitterBuffer {
    frames: VecDeque<Bytes>,
    capacity: usize,
    warmup: usize,
    /// Dedupe cursor: last accepted sequence number
    last_sequence: u32,
    /// Pacing has begun; warm-up no longer gates emission
    started: bool,
    duplicates: u64,
    overflows: u64,
}

impl JitterBuffer {
    pub fn new(capacity: usize, warmup: usize) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity,
            warmup,
            last_sequence: 0,
            started: false,
            duplicates: 0,
            overflows: 0,
        }
    }

    /// Offer one sequenced frame
    ///
    /// Any sequence at or below the cursor is a duplicate (or stale
    /// retransmission) and is discarded; duplicates are only counted, never
    /// resequenced.
    pub fn accept(&mut self, sequence: u32, payload: Bytes) -> Accept {
        if sequence <= self.last_sequence {
            self.duplicates += 1;
            tracing::debug!(
                "duplicate frame seq={} last={}",
                sequence,
                self.last_sequence
            );
            return Accept::Duplicate;
        }
        self.last_sequence = sequence;
        self.push(payload);
        Accept::Accepted
    }

    /// Buffer an unframed legacy payload, bypassing sequence dedupe
    pub fn push_legacy(&mut self, payload: Bytes) {
        self.push(payload);
    }

    fn push(&mut self, payload: Bytes) {
        if self.frames.len() >= self.capacity {
            // Drop the oldest to bound latency while keeping newest data
            self.frames.pop_front();
            self.overflows += 1;
            tracing::warn!("jitter buffer overflow, dropping oldest frame");
        }
        self.frames.push_back(payload);
    }

    /// Pop one frame for a pacer tick
    ///
    /// Returns None until the warm-up threshold has been reached, and on
    /// empty ticks afterwards (the tick is skipped, never blocked on or
    /// padded with stale audio).
    pub fn pop_paced(&mut self) -> Option<Bytes> {
        if !self.started {
            if self.frames.len() < self.warmup {
                return None;
            }
            self.started = true;
            tracing::info!("jitter buffer warmed up ({} frames)", self.frames.len());
        }
        self.frames.pop_front()
    }

    /// Take everything that remains, in order (terminal drain burst)
    pub fn drain(&mut self) -> Vec<Bytes> {
        self.frames.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn last_sequence(&self) -> u32 {
        self.last_sequence
    }

    pub fn stats(&self) -> JitterStats {
        JitterStats {
            level: self.frames.len(),
            capacity: self.capacity,
            duplicates: self.duplicates,
            overflows: self.overflows,
        }
    }
}

/// Jitter buffer statistics
#[derive(Debug, Clone)]
pub struct JitterStats {
    pub level: usize,
    pub capacity: usize,
    pub duplicates: u64,
    pub overflows: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(byte: u8) -> Bytes {
        Bytes::from(vec![byte])
    }

    #[test]
    fn test_unique_frames_emit_in_order() {
        let mut jitter = JitterBuffer::new(100, 3);

        for seq in 1..=5u32 {
            assert_eq!(jitter.accept(seq, payload(seq as u8)), Accept::Accepted);
        }

        let mut emitted = Vec::new();
        while let Some(frame) = jitter.pop_paced() {
            emitted.push(frame[0]);
        }
        assert_eq!(emitted, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_duplicate_is_idempotent() {
        let mut jitter = JitterBuffer::new(100, 1);

        assert_eq!(jitter.accept(1, payload(1)), Accept::Accepted);
        assert_eq!(jitter.accept(1, payload(1)), Accept::Duplicate);
        assert_eq!(jitter.len(), 1);
        assert_eq!(jitter.stats().duplicates, 1);
    }

    #[test]
    fn test_stale_sequence_keeps_cursor() {
        let mut jitter = JitterBuffer::new(100, 1);
        for seq in 1..=5u32 {
            jitter.accept(seq, payload(seq as u8));
        }

        assert_eq!(jitter.accept(5, payload(5)), Accept::Duplicate);
        assert_eq!(jitter.accept(3, payload(3)), Accept::Duplicate);
        assert_eq!(jitter.last_sequence(), 5);
    }

    #[test]
    fn test_warmup_gates_first_emission() {
        let mut jitter = JitterBuffer::new(100, 3);

        jitter.accept(1, payload(1));
        jitter.accept(2, payload(2));
        assert!(jitter.pop_paced().is_none());

        jitter.accept(3, payload(3));
        assert_eq!(jitter.pop_paced().unwrap()[0], 1);

        // Once started, emission continues below the threshold
        assert_eq!(jitter.pop_paced().unwrap()[0], 2);
        assert_eq!(jitter.pop_paced().unwrap()[0], 3);
        // Empty tick is skipped, not an error
        assert!(jitter.pop_paced().is_none());

        jitter.accept(4, payload(4));
        assert_eq!(jitter.pop_paced().unwrap()[0], 4);
    }

    #[test]
    fn test_overflow_drops_oldest_and_bounds_len() {
        let mut jitter = JitterBuffer::new(3, 1);

        for seq in 1..=10u32 {
            jitter.accept(seq, payload(seq as u8));
            assert!(jitter.len() <= 3);
        }

        let kept: Vec<u8> = jitter.drain().iter().map(|f| f[0]).collect();
        assert_eq!(kept, vec![8, 9, 10]);
        assert_eq!(jitter.stats().overflows, 7);
    }

    #[test]
    fn test_legacy_payload_bypasses_dedupe() {
        let mut jitter = JitterBuffer::new(100, 1);
        jitter.accept(5, payload(5));
        jitter.push_legacy(payload(9));
        assert_eq!(jitter.len(), 2);
        assert_eq!(jitter.last_sequence(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_emission_spans_frame_periods() {
        use std::time::Duration;

        let mut jitter = JitterBuffer::new(100, 2);
        jitter.accept(1, payload(1));
        jitter.accept(2, payload(2));
        jitter.accept(3, payload(3));

        let period = Duration::from_millis(20);
        let mut pacer = tokio::time::interval(period);
        let start = tokio::time::Instant::now();

        let mut played = Vec::new();
        for _ in 0..3 {
            pacer.tick().await;
            played.push(jitter.pop_paced().unwrap()[0]);
        }

        assert_eq!(played, vec![1, 2, 3]);
        // First tick is immediate; the remaining two each take one period
        assert_eq!(start.elapsed(), period * 2);
    }

    #[test]
    fn test_drain_returns_remainder_in_order() {
        let mut jitter = JitterBuffer::new(100, 10);
        for seq in 1..=4u32 {
            jitter.accept(seq, payload(seq as u8));
        }
        // Below warm-up, but a stream end drains everything
        let drained: Vec<u8> = jitter.drain().iter().map(|f| f[0]).collect();
        assert_eq!(drained, vec![1, 2, 3, 4]);
        assert!(jitter.is_empty());
    }
}
