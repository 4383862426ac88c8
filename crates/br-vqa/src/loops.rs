//! Loop table
//!
//! Loops are named inclusive frame ranges read from the `LINF` chunk. Known
//! bad loop ends in shipped assets are corrected through [`LoopOverride`]
//! entries applied right after the table is parsed.

use serde::{Deserialize, Serialize};

use crate::{VqaError, VqaResult};

/// Inclusive frame range `begin..=end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoopRange {
    pub begin: u32,
    pub end: u32,
}

impl LoopRange {
    pub const fn new(begin: u32, end: u32) -> Self {
        Self { begin, end }
    }

    /// Range covering every frame of a stream
    pub const fn whole(frame_count: u32) -> Self {
        Self {
            begin: 0,
            end: frame_count.saturating_sub(1),
        }
    }

    /// Check `begin < end < frame_count`
    pub fn validate(&self, frame_count: u32) -> VqaResult<()> {
        if self.begin < self.end && self.end < frame_count {
            Ok(())
        } else {
            Err(VqaError::InvalidRange {
                begin: self.begin,
                end: self.end,
                frame_count,
            })
        }
    }

    #[inline]
    pub fn contains(&self, frame: u32) -> bool {
        frame >= self.begin && frame <= self.end
    }

    /// Number of frames in the range
    #[inline]
    pub fn frames(&self) -> u32 {
        self.end.saturating_sub(self.begin) + 1
    }
}

/// Replacement loop end for one loop of one named stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopOverride {
    /// Stream name, compared case-insensitively
    pub stream: String,
    pub loop_id: u32,
    pub end: u32,
}

impl LoopOverride {
    pub fn new(stream: impl Into<String>, loop_id: u32, end: u32) -> Self {
        Self {
            stream: stream.into(),
            loop_id,
            end,
        }
    }

    pub fn matches(&self, stream: &str) -> bool {
        self.stream.eq_ignore_ascii_case(stream)
    }
}

/// Loops of one opened stream, indexed by loop id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopTable {
    loops: Vec<Option<LoopRange>>,
}

impl LoopTable {
    /// Build a table from raw `LIND` entries
    ///
    /// Overrides for `stream` are applied first, then every entry is
    /// checked against `frame_count`. Entries that fail are dropped and
    /// behave as unknown loop ids.
    pub fn from_raw(
        stream: &str,
        raw: &[LoopRange],
        frame_count: u32,
        overrides: &[LoopOverride],
    ) -> Self {
        let mut entries = raw.to_vec();

        for o in overrides.iter().filter(|o| o.matches(stream)) {
            match entries.get_mut(o.loop_id as usize) {
                Some(range) => {
                    log::info!(
                        "[LoopTable] {}: loop {} end {} -> {}",
                        stream,
                        o.loop_id,
                        range.end,
                        o.end
                    );
                    range.end = o.end;
                }
                None => log::warn!(
                    "[LoopTable] {}: override for missing loop {}",
                    stream,
                    o.loop_id
                ),
            }
        }

        let loops = entries
            .into_iter()
            .enumerate()
            .map(|(id, range)| match range.validate(frame_count) {
                Ok(()) => Some(range),
                Err(e) => {
                    log::warn!("[LoopTable] {}: dropping loop {}: {}", stream, id, e);
                    None
                }
            })
            .collect();

        Self { loops }
    }

    /// Range of a valid loop
    pub fn get(&self, loop_id: u32) -> VqaResult<LoopRange> {
        self.loops
            .get(loop_id as usize)
            .copied()
            .flatten()
            .ok_or(VqaError::LoopNotFound(loop_id))
    }

    /// Number of `LIND` slots, valid or not
    pub fn slot_count(&self) -> usize {
        self.loops.len()
    }

    /// Number of valid loops
    pub fn len(&self) -> usize {
        self.loops.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(id, begin, end)` for every valid loop
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32, u32)> + '_ {
        self.loops
            .iter()
            .enumerate()
            .filter_map(|(id, range)| range.map(|r| (id as u32, r.begin, r.end)))
    }
}
