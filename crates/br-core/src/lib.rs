//! br-core: Shared types for the Blade Runner VQA playback workspace
//!
//! This crate provides the foundational types used across all br-* crates:
//! PCM sample formats, the RGB555 pixel surface and the millisecond clocks
//! that drive time-gated playback.

mod sample;
mod surface;
mod time;

pub use sample::*;
pub use surface::*;
pub use time::*;
