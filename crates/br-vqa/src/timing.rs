//! Frame timing
//!
//! VQA streams carry an integral frame rate. [`FrameTimer`] turns it into
//! due times against a millisecond clock, with a little slack so a tick
//! arriving just early still presents, and a resync when playback has
//! fallen too far behind to catch up frame by frame.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============ Frame Rate ============

/// Nominal frames per second from the stream header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    fps: u32,
}

impl FrameRate {
    /// Rate used when a header says 0
    pub const DEFAULT: FrameRate = FrameRate { fps: 15 };

    pub const fn new(fps: u32) -> Self {
        Self { fps }
    }

    #[inline]
    pub fn fps(&self) -> u32 {
        self.fps
    }

    #[inline]
    pub fn as_f64(&self) -> f64 {
        self.fps as f64
    }

    /// Frame duration in microseconds
    pub fn frame_duration_us(&self) -> u64 {
        1_000_000 / self.fps.max(1) as u64
    }

    /// Audio samples per frame at `sample_rate`
    pub fn samples_per_frame(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / self.as_f64().max(1.0)
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fps", self.fps)
    }
}

// ============ Frame Timer ============

/// Due-time accumulator for time-gated playback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimer {
    frame_us: u64,
    slack_us: u64,
    max_drift_frames: u32,
    /// `None` means the next frame is due immediately
    next_due_us: Option<u64>,
}

impl FrameTimer {
    /// `max_drift_frames == 0` disables resynchronisation
    pub fn new(rate: FrameRate, slack_ms: u64, max_drift_frames: u32) -> Self {
        Self {
            frame_us: rate.frame_duration_us(),
            slack_us: slack_ms * 1000,
            max_drift_frames,
            next_due_us: None,
        }
    }

    #[inline]
    pub fn frame_duration_us(&self) -> u64 {
        self.frame_us
    }

    /// Due time of the next frame in milliseconds, `None` if due now
    pub fn next_due_ms(&self) -> Option<u64> {
        self.next_due_us.map(|us| us / 1000)
    }

    /// Whether a frame may be presented at `now_ms`
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.next_due_us {
            None => true,
            Some(due) => now_ms * 1000 + self.slack_us >= due,
        }
    }

    /// Timer after presenting a frame at `now_ms`
    pub fn scheduled_next(&self, now_ms: u64) -> Self {
        let now_us = now_ms * 1000;
        let base = self.next_due_us.unwrap_or(now_us);
        let mut next_due = base + self.frame_us;

        let lag = now_us.saturating_sub(base);
        if self.max_drift_frames > 0 && lag > self.frame_us * self.max_drift_frames as u64 {
            log::debug!(
                "[FrameTimer] {} ms behind, resynchronising",
                lag / 1000
            );
            next_due = now_us + self.frame_us;
        }

        Self {
            next_due_us: Some(next_due),
            ..*self
        }
    }

    /// Make the next frame due immediately
    pub fn reset(&mut self) {
        self.next_due_us = None;
    }
}
