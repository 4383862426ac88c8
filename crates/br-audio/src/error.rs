//! Audio error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Audio output is not ready")]
    NotReady,

    #[error("Stream already finished, cannot queue frame {0}")]
    StreamFinished(u32),

    #[error("Unknown sound handle: {0}")]
    UnknownHandle(u64),

    #[error("Format mismatch: {0}")]
    FormatMismatch(String),
}

pub type AudioResult<T> = Result<T, AudioError>;
