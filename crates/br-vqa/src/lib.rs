//! br-vqa: VQA playback for the Blade Runner engine
//!
//! Westwood VQA (Vector Quantized Animation) streams multiplex video, an
//! optional ADPCM audio track and per-frame side-channel data (z-buffer,
//! camera view, lights, screen effects).
//!
//! - Container reading with loop table and frame index
//! - Codebook/block-command video decoding into RGB555 surfaces
//! - Preloaded audio queueing
//! - Tick-driven scheduling with loop repeat/enqueue semantics

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use br_audio::AudioError;
use br_core::AudioFormat;

pub mod audio;
pub mod builder;
pub mod chunk;
pub mod codebook_cache;
pub mod config;
pub mod container;
pub mod decoder;
pub mod lcw;
pub mod loops;
pub mod player;
pub mod resource;
pub mod scheduler;
pub mod side_channel;
pub mod timing;

pub use audio::AudioDecoder;
pub use builder::{FrameSpec, VqaBuilder};
pub use codebook_cache::{CacheStats, CodebookCache};
pub use config::PlayerConfig;
pub use container::{ChannelMask, FrameChunks, Packed, VqaReader};
pub use decoder::{BlockCommand, Codebook, VideoDecoder};
pub use loops::{LoopOverride, LoopRange, LoopTable};
pub use player::{
    LoopEnded, LoopEndedCallback, UpdateOutcome, UpdateRequest, VqaPlayer, loop_ended_channel,
};
pub use resource::{DirectoryResources, MemoryResources, ReadSeek, ResourceProvider};
pub use scheduler::{LoopChange, LoopSetMode, PlaybackState, RepeatCount, Step, Tick};
pub use side_channel::{Light, LightKind, Lights, ScreenEffect, ScreenEffects, View, ZBuffer};
pub use timing::{FrameRate, FrameTimer};

// ============ Error Types ============

#[derive(Error, Debug)]
pub enum VqaError {
    #[error("Unrecognized or corrupt VQA header: {0}")]
    Format(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame {frame} out of range (frame count {frame_count})")]
    FrameOutOfRange { frame: u32, frame_count: u32 },

    #[error("Invalid frame range {begin}..={end} (frame count {frame_count})")]
    InvalidRange { begin: u32, end: u32, frame_count: u32 },

    #[error("Loop {0} not found")]
    LoopNotFound(u32),

    #[error("Failed to decode frame data: {0}")]
    Decode(String),

    #[error("No VQA stream is open")]
    NotOpen,

    #[error("Playback aborted after earlier failure: {0}")]
    Faulted(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type VqaResult<T> = Result<T, VqaError>;

// ============ Stream Info ============

/// Stream metadata taken from the VQHD header
#[derive(Debug, Clone, PartialEq)]
pub struct VqaInfo {
    /// Resource name the stream was opened from
    pub name: String,
    /// VQHD version field
    pub version: u16,
    /// Total frames, indices `0..frame_count`
    pub frame_count: u32,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Block width in pixels
    pub block_width: u32,
    /// Block height in pixels
    pub block_height: u32,
    /// Nominal playback rate
    pub frame_rate: FrameRate,
    /// Position of the frame inside the destination surface
    pub offset_x: u32,
    pub offset_y: u32,
    /// Upper bound for block command streams, 0 if unknown
    pub max_vptr_size: u32,
    /// Audio track layout, `None` if the stream is silent
    pub audio: Option<AudioFormat>,
}

impl VqaInfo {
    #[inline]
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Blocks per frame row
    #[inline]
    pub fn blocks_per_row(&self) -> u32 {
        self.width / self.block_width
    }

    /// Total blocks per frame
    #[inline]
    pub fn block_count(&self) -> u32 {
        self.blocks_per_row() * (self.height / self.block_height)
    }
}

/// Player guarded for use from several threads; hold the lock across each call
pub type SharedPlayer = Arc<Mutex<VqaPlayer>>;

/// Wrap a player for multi-threaded embedders
pub fn shared(player: VqaPlayer) -> SharedPlayer {
    Arc::new(Mutex::new(player))
}
