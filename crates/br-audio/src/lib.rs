//! br-audio: Audio output seam for VQA playback
//!
//! The player never talks to a sound device directly. It fills a
//! [`QueuingAudioStream`] with decoded PCM and hands the stream to an
//! [`AudioOutput`], which pulls samples whenever its device needs them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ queue_chunk ┌───────────────────┐  read  ┌───────────────┐
//! │  VqaPlayer   │────────────▶│ QueuingAudioStream│◀───────│ AudioOutput   │
//! │ (game tick)  │             │ (shared queue)    │        │ (mixer thread)│
//! └──────────────┘             └───────────────────┘        └───────────────┘
//! ```

mod error;
mod mixer;
mod stream;

pub use error::*;
pub use mixer::*;
pub use stream::*;
