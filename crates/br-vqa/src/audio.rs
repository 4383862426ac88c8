//! SND2 audio decoding
//!
//! Westwood IMA ADPCM: 4-bit codes, low nibble first, mono 16-bit output.
//! Predictor state runs on from one frame's chunk to the next.

use br_core::{AudioFormat, PcmChunk, Sample};

const STEP_TABLE: [i32; 89] = [
    7, 8, 9, 10, 11, 12, 13, 14, 16, 17, 19, 21, 23, 25, 28, 31, 34, 37, 41, 45, 50, 55, 60, 66,
    73, 80, 88, 97, 107, 118, 130, 143, 157, 173, 190, 209, 230, 253, 279, 307, 337, 371, 408,
    449, 494, 544, 598, 658, 724, 796, 876, 963, 1060, 1166, 1282, 1411, 1552, 1707, 1878, 2066,
    2272, 2499, 2749, 3024, 3327, 3660, 4026, 4428, 4871, 5358, 5894, 6484, 7132, 7845, 8630,
    9493, 10442, 11487, 12635, 13899, 15289, 16818, 18500, 20350, 22385, 24623, 27086, 29794,
    32767,
];

const INDEX_TABLE: [i32; 8] = [-1, -1, -1, -1, 2, 4, 6, 8];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct AdpcmState {
    predictor: i32,
    step_index: i32,
}

impl AdpcmState {
    fn expand(&mut self, code: u8) -> Sample {
        let step = STEP_TABLE[self.step_index as usize];
        let mut diff = step >> 3;
        if code & 1 != 0 {
            diff += step >> 2;
        }
        if code & 2 != 0 {
            diff += step >> 1;
        }
        if code & 4 != 0 {
            diff += step;
        }
        if code & 8 != 0 {
            diff = -diff;
        }

        self.predictor = (self.predictor + diff).clamp(i16::MIN as i32, i16::MAX as i32);
        self.step_index = (self.step_index + INDEX_TABLE[(code & 7) as usize]).clamp(0, 88);
        self.predictor as Sample
    }

    fn quantize(&mut self, sample: Sample) -> u8 {
        let step = STEP_TABLE[self.step_index as usize];
        let mut delta = sample as i32 - self.predictor;
        let mut code = 0u8;
        if delta < 0 {
            code = 8;
            delta = -delta;
        }
        let mut threshold = step;
        for bit in [4u8, 2, 1] {
            if delta >= threshold {
                code |= bit;
                delta -= threshold;
            }
            threshold >>= 1;
        }
        // Keep the encoder's predictor identical to the decoder's
        self.expand(code);
        code
    }
}

/// Stateful SND2 decoder
#[derive(Debug, Clone)]
pub struct AudioDecoder {
    format: AudioFormat,
    state: AdpcmState,
}

impl AudioDecoder {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            state: AdpcmState::default(),
        }
    }

    #[inline]
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Decode one frame's chunk, two samples per byte
    pub fn decode(&mut self, frame: u32, data: &[u8]) -> PcmChunk {
        let mut samples = Vec::with_capacity(data.len() * 2);
        for &byte in data {
            samples.push(self.state.expand(byte & 0x0F));
            samples.push(self.state.expand(byte >> 4));
        }
        PcmChunk::new(frame, samples)
    }

    /// Drop predictor state, required after any seek
    pub fn reset(&mut self) {
        self.state = AdpcmState::default();
    }
}

/// Encode PCM into SND2 data, starting from a fresh predictor
///
/// An odd trailing sample is padded with its own value.
pub fn encode(samples: &[Sample]) -> Vec<u8> {
    let mut state = AdpcmState::default();
    samples
        .chunks(2)
        .map(|pair| {
            let lo = state.quantize(pair[0]);
            let hi = state.quantize(*pair.get(1).unwrap_or(&pair[0]));
            lo | (hi << 4)
        })
        .collect()
}
