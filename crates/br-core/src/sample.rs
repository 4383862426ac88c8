//! Sample types and PCM chunk definitions

use serde::{Deserialize, Serialize};

/// Type alias for decoded audio samples (signed 16-bit PCM)
pub type Sample = i16;

/// Sample rates found in VQA audio tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz11025 = 11025,
    Hz22050 = 22050,
    Hz44100 = 44100,
}

impl SampleRate {
    /// Map a raw header value to a supported rate
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            11025 => Some(Self::Hz11025),
            22050 => Some(Self::Hz22050),
            44100 => Some(Self::Hz44100),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f64(self) -> f64 {
        self as u32 as f64
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz22050
    }
}

/// Layout of a PCM stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: SampleRate,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn mono(sample_rate: SampleRate) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Duration of `frames` sample frames in milliseconds
    pub fn duration_ms(&self, frames: usize) -> f64 {
        frames as f64 * 1000.0 / self.sample_rate.as_f64()
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::mono(SampleRate::default())
    }
}

/// One decoded block of interleaved PCM, usually one video frame's worth
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PcmChunk {
    /// Interleaved samples
    pub samples: Vec<Sample>,
    /// Index of the video frame this chunk belongs to
    pub frame: u32,
}

impl PcmChunk {
    pub fn new(frame: u32, samples: Vec<Sample>) -> Self {
        Self { samples, frame }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
