//! Per-sender sequence tracking.
//!
//! Every frame carries a sequence number that its sender increments by one
//! per frame. A receiver accepts a frame only if its sequence is strictly
//! greater than the last accepted one from that sender:
//! - equal sequence: duplicate delivery, dropped
//! - lower sequence: arrived after a newer frame, dropped
//!
//! Jumps forward are accepted; the skipped numbers are counted so the
//! client can report them, but they are never re-requested.

/// Outcome of offering a sequence number to a [`SequenceTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceVerdict {
    /// Newer than anything seen; deliver it.
    Accepted,
    /// Same sequence as the last accepted frame.
    Duplicate,
    /// Older than the last accepted frame.
    Stale,
}

impl SequenceVerdict {
    /// Whether the frame should be delivered.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Tracks the highest accepted sequence from one sender.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    /// Last accepted sequence (0 = nothing accepted yet).
    last_accepted: u64,
    /// Frames rejected as duplicate or stale.
    dropped: u64,
    /// Sequence numbers jumped over by accepted frames.
    skipped: u64,
}

impl SequenceTracker {
    /// Create a tracker that has accepted nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a sequence number; the tracker advances only on `Accepted`.
    pub fn offer(&mut self, sequence: u64) -> SequenceVerdict {
        if sequence > self.last_accepted {
            self.skipped += sequence - self.last_accepted - 1;
            self.last_accepted = sequence;
            SequenceVerdict::Accepted
        } else if sequence == self.last_accepted {
            self.dropped += 1;
            SequenceVerdict::Duplicate
        } else {
            self.dropped += 1;
            SequenceVerdict::Stale
        }
    }

    /// The last accepted sequence (0 if none).
    pub fn last_accepted(&self) -> u64 {
        self.last_accepted
    }

    /// Number of frames dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Number of sequence numbers that were never seen before a newer one.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Forget everything (peer reconnected with a fresh counter).
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Outbound sequence counter. Starts at 1 and never reuses a value.
#[derive(Debug, Clone)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    /// Create a counter whose first value is 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Take the next sequence number.
    pub fn next_sequence(&mut self) -> u64 {
        let current = self.next;
        self.next = self.next.saturating_add(1);
        current
    }

    /// Peek at the value the next call will return.
    pub fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
