//! Playback scheduling
//!
//! [`PlaybackState`] is the whole cursor/loop state of a player as one
//! value. [`PlaybackState::step`] is a pure transition: given a tick it
//! returns the next state and what the player has to do (nothing, wrap,
//! report exhaustion, or present one frame).
//!
//! Per step, in order:
//!
//! 1. cursor past the range end with repeats left: wrap to the range
//!    begin, applying a pending loop change if there is one
//! 2. cursor past the range end with no repeats left: exhausted
//! 3. time-gated and the frame is not due yet: hold
//! 4. advancing disabled: hold
//! 5. otherwise advance one frame

use crate::loops::LoopRange;
use crate::timing::FrameTimer;
use crate::{VqaError, VqaResult};

// ============ Loop Change ============

/// How many more times the active range wraps before exhausting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepeatCount {
    Forever,
    Remaining(u32),
}

impl RepeatCount {
    /// Map the engine's integer convention (`-1` forever, `n >= 0` wraps left)
    pub fn from_legacy(value: i32) -> Self {
        if value < 0 {
            Self::Forever
        } else {
            Self::Remaining(value as u32)
        }
    }

    pub fn legacy(self) -> i32 {
        match self {
            Self::Forever => -1,
            Self::Remaining(n) => n.min(i32::MAX as u32) as i32,
        }
    }

    #[inline]
    pub fn is_exhausted(self) -> bool {
        self == Self::Remaining(0)
    }

    /// Count after one plain wrap
    fn decremented(self) -> Self {
        match self {
            Self::Forever => Self::Forever,
            Self::Remaining(n) => Self::Remaining(n.saturating_sub(1)),
        }
    }
}

impl From<i32> for RepeatCount {
    fn from(value: i32) -> Self {
        Self::from_legacy(value)
    }
}

/// When a loop change takes effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopSetMode {
    /// Replace the range and seek to its begin now
    Immediate,
    /// Replace the range without moving the cursor
    JustStart,
    /// Apply at the next wrap
    ///
    /// Promoted to [`LoopSetMode::Immediate`] while no repeats are left,
    /// since no wrap would ever happen.
    Enqueue,
}

/// A requested range with its repeat count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopChange {
    pub range: LoopRange,
    pub repeats: RepeatCount,
    /// Loop id when the range came from the loop table
    pub loop_id: Option<u32>,
}

// ============ Transitions ============

/// Input of one scheduling step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub now_ms: u64,
    pub advance_frame: bool,
    pub use_time: bool,
}

/// Outcome of one scheduling step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to present
    Hold,
    /// Cursor went back to the range begin
    Wrapped {
        pending_applied: bool,
        ended_loop: Option<u32>,
        started_loop: Option<u32>,
    },
    /// Past the end with no repeats left
    Exhausted,
    /// Present `frame`
    Advance { frame: u32 },
}

// ============ Playback State ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackState {
    pub frame_count: u32,
    /// Last presented frame
    pub current_frame: Option<u32>,
    /// Frame to present next, `None` for the range begin
    pub next_frame: Option<u32>,
    pub range: LoopRange,
    pub repeats: RepeatCount,
    pub loop_id: Option<u32>,
    pub pending: Option<LoopChange>,
    pub timer: FrameTimer,
}

impl PlaybackState {
    /// State of a freshly opened stream: the whole timeline, played once
    pub fn new(frame_count: u32, timer: FrameTimer) -> Self {
        Self {
            frame_count,
            current_frame: None,
            next_frame: None,
            range: LoopRange::whole(frame_count),
            repeats: RepeatCount::Remaining(0),
            loop_id: None,
            pending: None,
            timer,
        }
    }

    /// Frame the cursor points at
    #[inline]
    pub fn cursor(&self) -> u32 {
        self.next_frame.unwrap_or(self.range.begin)
    }

    pub fn step(&self, tick: Tick) -> (Self, Step) {
        let mut next = *self;
        let cursor = self.cursor();
        next.next_frame = Some(cursor);

        if cursor > self.range.end {
            if self.repeats.is_exhausted() {
                return (next, Step::Exhausted);
            }

            let pending_applied = match next.pending.take() {
                Some(change) => {
                    next.range = change.range;
                    next.repeats = change.repeats;
                    next.loop_id = change.loop_id;
                    true
                }
                None => {
                    next.repeats = self.repeats.decremented();
                    false
                }
            };
            next.next_frame = Some(next.range.begin);

            return (
                next,
                Step::Wrapped {
                    pending_applied,
                    ended_loop: self.loop_id,
                    started_loop: next.loop_id,
                },
            );
        }

        if tick.use_time && !self.timer.is_due(tick.now_ms) {
            return (next, Step::Hold);
        }
        if !tick.advance_frame {
            return (next, Step::Hold);
        }

        next.current_frame = Some(cursor);
        next.next_frame = Some(cursor + 1);
        next.timer = self.timer.scheduled_next(tick.now_ms);
        (next, Step::Advance { frame: cursor })
    }

    /// Validate and apply a loop change, returning the mode actually used
    ///
    /// On error the state is untouched.
    pub fn apply_loop_change(
        &self,
        change: LoopChange,
        mode: LoopSetMode,
    ) -> VqaResult<(Self, LoopSetMode)> {
        change.range.validate(self.frame_count)?;

        let mode = if mode == LoopSetMode::Enqueue && self.repeats.is_exhausted() {
            LoopSetMode::Immediate
        } else {
            mode
        };

        let mut next = *self;
        match mode {
            LoopSetMode::Enqueue => {
                next.pending = Some(change);
            }
            LoopSetMode::JustStart | LoopSetMode::Immediate => {
                next.range = change.range;
                next.repeats = change.repeats;
                next.loop_id = change.loop_id;
                next.pending = None;
                if mode == LoopSetMode::Immediate {
                    next.next_frame = Some(change.range.begin);
                    next.timer.reset();
                }
            }
        }
        Ok((next, mode))
    }

    /// Move the cursor, keeping the active range
    pub fn seek(&self, frame: u32) -> VqaResult<Self> {
        if frame >= self.frame_count {
            return Err(VqaError::FrameOutOfRange {
                frame,
                frame_count: self.frame_count,
            });
        }
        let mut next = *self;
        next.next_frame = Some(frame);
        next.timer.reset();
        Ok(next)
    }
}
