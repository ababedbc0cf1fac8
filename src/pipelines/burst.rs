// SPDX-License-Identifier: GPL-3.0-only

//! Burst assembly
//!
//! Collects exactly N packed frames into one atomic unit. The
//! accumulator is an explicit state machine — transitions happen only
//! through its methods, so frames cannot be slipped into a completed or
//! aborted burst, and a discarded burst always releases every buffer it
//! held (frame drop returns the pooled buffer).

use crate::errors::BurstError;
use crate::frame::RawFrame;
use tracing::{debug, info, warn};

/// Burst session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurstState {
    /// Accepting frames until the configured count is reached
    Collecting,
    /// The full frame list was handed off; awaiting reset before reuse
    Complete,
    /// The burst was discarded and its buffers released; awaiting reset
    Aborted,
}

/// Outcome of offering one frame to the accumulator
#[derive(Debug)]
pub enum AddOutcome {
    /// Frame accepted, burst still collecting
    Collected {
        /// Frames still missing
        remaining: usize,
    },
    /// Count reached: the full, ordered frame list, ownership included.
    /// The accumulator no longer tracks these frames.
    Complete(Vec<RawFrame>),
    /// The accumulator is not collecting; the frame comes straight back
    /// so the caller can dispose of it
    Rejected(RawFrame),
}

/// Aggregates frames for one burst session
#[derive(Debug)]
pub struct BurstAccumulator {
    frame_count: usize,
    frames: Vec<RawFrame>,
    state: BurstState,
}

impl BurstAccumulator {
    /// Create an accumulator collecting `frame_count` frames per burst
    pub fn new(frame_count: usize) -> Self {
        Self {
            frame_count,
            frames: Vec::with_capacity(frame_count),
            state: BurstState::Collecting,
        }
    }

    /// Current state
    pub fn state(&self) -> BurstState {
        self.state
    }

    /// Frames collected so far
    pub fn collected(&self) -> usize {
        self.frames.len()
    }

    /// Configured frames per burst
    pub fn frame_count(&self) -> usize {
        self.frame_count
    }

    /// Offer a frame.
    ///
    /// While collecting, frames accumulate in arrival order; the frame
    /// that reaches the configured count transitions to `Complete` and
    /// the whole ordered list transfers to the caller. Outside
    /// `Collecting` the frame is rejected and returned.
    pub fn add_frame(&mut self, frame: RawFrame) -> AddOutcome {
        if self.state != BurstState::Collecting {
            warn!(
                state = ?self.state,
                timestamp_ns = frame.timestamp_ns,
                "Frame offered outside collection, rejecting"
            );
            return AddOutcome::Rejected(frame);
        }

        self.frames.push(frame);
        if self.frames.len() == self.frame_count {
            self.state = BurstState::Complete;
            let frames = std::mem::take(&mut self.frames);
            info!(frames = frames.len(), "Burst complete");
            AddOutcome::Complete(frames)
        } else {
            let remaining = self.frame_count - self.frames.len();
            debug!(
                collected = self.frames.len(),
                remaining, "Burst frame collected"
            );
            AddOutcome::Collected { remaining }
        }
    }

    /// Pull the first collected frame out, keeping the rest in place.
    /// Used by the single-shot fallback before an abort discards the
    /// remainder.
    pub fn take_first(&mut self) -> Option<RawFrame> {
        if self.frames.is_empty() {
            None
        } else {
            Some(self.frames.remove(0))
        }
    }

    /// Discard the burst after a per-frame failure.
    ///
    /// Every collected frame is dropped, returning its buffer to the
    /// pool, and the state moves to `Aborted`. The returned error carries
    /// the collected count for the caller to propagate.
    pub fn abort(&mut self) -> BurstError {
        let collected = self.frames.len();
        self.frames.clear();
        self.state = BurstState::Aborted;
        warn!(collected, "Burst aborted, buffers released");
        BurstError::PartialAbort { collected }
    }

    /// Release any held frames and return to `Collecting`.
    ///
    /// Callable at any time — session teardown goes through here too.
    pub fn reset(&mut self) {
        if !self.frames.is_empty() {
            debug!(released = self.frames.len(), "Accumulator reset released frames");
        }
        self.frames.clear();
        self.state = BurstState::Collecting;
    }
}
