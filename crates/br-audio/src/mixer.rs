//! Audio outputs
//!
//! [`AudioOutput`] is the contract the player consumes. [`SoftwareMixer`] is
//! an in-process implementation: the embedder calls [`SoftwareMixer::mix`]
//! from its device callback and gets the sum of every playing stream.

use parking_lot::Mutex;

use br_core::Sample;

use crate::{AudioError, AudioResult, QueuingAudioStream};

/// Opaque identifier of a playing stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundHandle(pub u64);

/// Sink for queued PCM streams
pub trait AudioOutput: Send + Sync {
    /// Whether the output can accept streams at all
    fn is_ready(&self) -> bool;

    /// Start pulling samples from `stream`
    fn play_stream(&self, stream: QueuingAudioStream) -> AudioResult<SoundHandle>;

    /// Stop and forget a stream; unknown handles are ignored
    fn stop(&self, handle: SoundHandle);

    /// Whether `handle` is still attached
    fn is_playing(&self, handle: SoundHandle) -> bool;
}

struct Voice {
    handle: SoundHandle,
    stream: QueuingAudioStream,
}

struct MixerInner {
    voices: Vec<Voice>,
    next_handle: u64,
    scratch: Vec<Sample>,
}

/// Software mixer summing all playing streams
pub struct SoftwareMixer {
    inner: Mutex<MixerInner>,
    ready: bool,
}

impl SoftwareMixer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MixerInner {
                voices: Vec::new(),
                next_handle: 1,
                scratch: Vec::new(),
            }),
            ready: true,
        }
    }

    /// A mixer reporting no device; players fall back to silent playback
    pub fn unavailable() -> Self {
        Self {
            ready: false,
            ..Self::new()
        }
    }

    /// Number of attached streams
    pub fn active_streams(&self) -> usize {
        self.inner.lock().voices.len()
    }

    /// Mix all playing streams into `output` (overwrites it)
    ///
    /// Streams that are finished and drained are detached.
    pub fn mix(&self, output: &mut [Sample]) {
        output.fill(0);

        let mut inner = self.inner.lock();
        let MixerInner { voices, scratch, .. } = &mut *inner;
        scratch.resize(output.len(), 0);

        for voice in voices.iter() {
            let n = voice.stream.read(&mut scratch[..]);
            for (out, &sample) in output.iter_mut().zip(&scratch[..n]) {
                *out = out.saturating_add(sample);
            }
        }

        voices.retain(|voice| {
            let drained = voice.stream.is_drained();
            if drained {
                log::debug!("[SoftwareMixer] Stream {:?} drained", voice.handle);
            }
            !drained
        });
    }
}

impl Default for SoftwareMixer {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioOutput for SoftwareMixer {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn play_stream(&self, stream: QueuingAudioStream) -> AudioResult<SoundHandle> {
        if !self.ready {
            return Err(AudioError::NotReady);
        }

        let mut inner = self.inner.lock();
        let handle = SoundHandle(inner.next_handle);
        inner.next_handle += 1;
        inner.voices.push(Voice { handle, stream });

        log::debug!("[SoftwareMixer] Playing stream {:?}", handle);
        Ok(handle)
    }

    fn stop(&self, handle: SoundHandle) {
        let mut inner = self.inner.lock();
        inner.voices.retain(|voice| voice.handle != handle);
    }

    fn is_playing(&self, handle: SoundHandle) -> bool {
        self.inner
            .lock()
            .voices
            .iter()
            .any(|voice| voice.handle == handle)
    }
}
