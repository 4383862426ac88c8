//! Player configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::loops::LoopOverride;
use crate::{VqaError, VqaResult};

/// Tuning knobs of a [`crate::VqaPlayer`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Audio chunks queued before the stream starts playing
    pub audio_preload_chunks: u32,
    /// A frame counts as due this many milliseconds early
    pub frame_time_slack_ms: u64,
    /// Resync to the clock when more than this many frames behind (0 = never)
    pub max_drift_frames: u32,
    /// Honour the `use_time` flag of updates; off for tools stepping frames
    pub time_gated: bool,
    /// Decoded codebooks kept for seeking
    pub codebook_cache_size: usize,
    /// Loop end corrections for streams with broken loop tables
    pub loop_overrides: Vec<LoopOverride>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            audio_preload_chunks: 14,
            frame_time_slack_ms: 4,
            max_drift_frames: 3,
            time_gated: true,
            codebook_cache_size: 16,
            loop_overrides: Vec::new(),
        }
    }
}

impl PlayerConfig {
    /// Every update with `advance_frame` presents a frame, whatever the clock says
    pub fn untimed() -> Self {
        Self {
            time_gated: false,
            ..Self::default()
        }
    }

    /// Add a loop end override
    pub fn with_loop_override(mut self, stream: impl Into<String>, loop_id: u32, end: u32) -> Self {
        self.loop_overrides
            .push(LoopOverride::new(stream, loop_id, end));
        self
    }

    /// Overrides that apply to `stream`
    pub fn overrides_for<'a>(&'a self, stream: &'a str) -> impl Iterator<Item = &'a LoopOverride> {
        self.loop_overrides.iter().filter(move |o| o.matches(stream))
    }

    pub fn validate(&self) -> VqaResult<()> {
        if self.codebook_cache_size == 0 {
            return Err(VqaError::Config(
                "codebook_cache_size must be at least 1".into(),
            ));
        }
        if let Some(o) = self.loop_overrides.iter().find(|o| o.stream.is_empty()) {
            return Err(VqaError::Config(format!(
                "loop override for loop {} has no stream name",
                o.loop_id
            )));
        }
        Ok(())
    }

    /// Parse and validate JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> VqaResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| VqaError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> VqaResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| VqaError::Config(e.to_string()))
    }

    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> VqaResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&json)
    }
}
