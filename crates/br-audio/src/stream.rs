//! Queuing audio stream
//!
//! A FIFO of decoded PCM chunks shared between one producer (the player)
//! and one consumer (the audio output). Cloning yields another handle to
//! the same queue.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use br_core::{AudioFormat, PcmChunk, Sample};

use crate::{AudioError, AudioResult};

struct StreamInner {
    format: AudioFormat,
    chunks: VecDeque<PcmChunk>,
    /// Read offset into the front chunk
    read_pos: usize,
    /// No more chunks will be queued
    finished: bool,
    /// Chunks ever queued
    queued_total: u64,
    /// Samples handed to the consumer
    samples_read: u64,
}

/// Shared chunk queue feeding an [`AudioOutput`](crate::AudioOutput)
#[derive(Clone)]
pub struct QueuingAudioStream {
    inner: Arc<Mutex<StreamInner>>,
}

impl QueuingAudioStream {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StreamInner {
                format,
                chunks: VecDeque::new(),
                read_pos: 0,
                finished: false,
                queued_total: 0,
                samples_read: 0,
            })),
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.inner.lock().format
    }

    /// Append a chunk to the end of the queue
    ///
    /// Queuing after [`finish`](Self::finish) is a caller bug and is rejected.
    pub fn queue_chunk(&self, chunk: PcmChunk) -> AudioResult<()> {
        let mut inner = self.inner.lock();
        if inner.finished {
            return Err(AudioError::StreamFinished(chunk.frame));
        }
        if chunk.is_empty() {
            return Ok(());
        }
        inner.queued_total += 1;
        inner.chunks.push_back(chunk);
        Ok(())
    }

    /// Mark the stream complete; queued data can still be read
    pub fn finish(&self) {
        self.inner.lock().finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.inner.lock().finished
    }

    /// Finished and fully consumed
    pub fn is_drained(&self) -> bool {
        let inner = self.inner.lock();
        inner.finished && inner.chunks.is_empty()
    }

    /// Chunks not yet fully consumed
    pub fn pending_chunks(&self) -> usize {
        self.inner.lock().chunks.len()
    }

    /// Total chunks accepted since creation
    pub fn queued_total(&self) -> u64 {
        self.inner.lock().queued_total
    }

    /// Total samples handed out by [`read`](Self::read)
    pub fn samples_read(&self) -> u64 {
        self.inner.lock().samples_read
    }

    /// Drop everything queued
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.chunks.clear();
        inner.read_pos = 0;
    }

    /// Pull up to `output.len()` samples
    ///
    /// Returns number of samples actually read
    pub fn read(&self, output: &mut [Sample]) -> usize {
        let mut inner = self.inner.lock();
        let mut written = 0;

        while written < output.len() {
            let read_pos = inner.read_pos;
            let Some(front) = inner.chunks.front() else {
                break;
            };

            let front_len = front.samples.len();
            let available = &front.samples[read_pos..];
            let n = available.len().min(output.len() - written);
            output[written..written + n].copy_from_slice(&available[..n]);
            written += n;

            if read_pos + n >= front_len {
                inner.chunks.pop_front();
                inner.read_pos = 0;
            } else {
                inner.read_pos = read_pos + n;
            }
        }

        inner.samples_read += written as u64;
        written
    }
}
