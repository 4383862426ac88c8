//! WVQA authoring
//!
//! [`VqaBuilder`] lays out a complete container in memory from header
//! fields, loops and per-frame content. Used to produce fixtures and by
//! tools that repackage decoded assets.

use br_core::{Sample, SampleRate};

use crate::audio;
use crate::chunk::{self, Tag};
use crate::container::RawHeader;
use crate::decoder::{BlockCommand, Codebook};
use crate::lcw;
use crate::loops::LoopRange;
use crate::side_channel::{Lights, ScreenEffects, View, ZBuffer};
use crate::{VqaError, VqaResult};

/// Size of the FORM header plus form type
const FORM_PREAMBLE: usize = 12;

// ============ Frame ============

/// Content of one frame
#[derive(Debug, Clone, Default)]
pub struct FrameSpec {
    codebook: Option<(Codebook, bool)>,
    commands: Option<(Vec<BlockCommand>, bool)>,
    audio: Option<Vec<u8>>,
    zbuffer: Option<Vec<u8>>,
    view: Option<Vec<u8>>,
    lights: Option<Vec<u8>>,
    screen_effects: Option<Vec<u8>>,
    extra: Vec<(Tag, Vec<u8>)>,
    unindexed: bool,
}

impl FrameSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new codebook in this frame (`CBF0`, or `CBFZ` when compressed)
    pub fn codebook(mut self, codebook: Codebook, compressed: bool) -> Self {
        self.codebook = Some((codebook, compressed));
        self
    }

    /// Block commands (`VPTR`, or `VPTZ` when compressed)
    pub fn commands(mut self, commands: Vec<BlockCommand>, compressed: bool) -> Self {
        self.commands = Some((commands, compressed));
        self
    }

    /// PCM for this frame, stored as ADPCM
    ///
    /// Each frame is encoded from a fresh predictor, so only the first
    /// frame of a run decodes exactly as encoded.
    pub fn audio(mut self, samples: &[Sample]) -> Self {
        self.audio = Some(audio::encode(samples));
        self
    }

    /// Pre-encoded `SND2` payload
    pub fn audio_raw(mut self, data: Vec<u8>) -> Self {
        self.audio = Some(data);
        self
    }

    /// `ZBUF` payload, see [`ZBuffer::encode_full`] and [`ZBuffer::encode_runs`]
    pub fn zbuffer(mut self, payload: Vec<u8>) -> Self {
        self.zbuffer = Some(payload);
        self
    }

    pub fn view(mut self, view: &View) -> Self {
        self.view = Some(view.to_payload());
        self
    }

    pub fn lights(mut self, lights: &Lights) -> Self {
        self.lights = Some(lights.to_payload());
        self
    }

    pub fn screen_effects(mut self, effects: &ScreenEffects) -> Self {
        self.screen_effects = Some(effects.to_payload());
        self
    }

    /// Arbitrary chunk stored ahead of the frame's channels
    pub fn raw_chunk(mut self, tag: Tag, payload: Vec<u8>) -> Self {
        self.extra.push((tag, payload));
        self
    }

    /// Keep this frame's codebook out of `CINF`
    pub fn unindexed(mut self) -> Self {
        self.unindexed = true;
        self
    }

    fn has_indexed_codebook(&self) -> bool {
        self.codebook.is_some() && !self.unindexed
    }

    /// Serialized frame and the size of its codebook chunk payload
    fn write(&self) -> VqaResult<(Vec<u8>, u32)> {
        let mut out = Vec::new();
        for (tag, payload) in &self.extra {
            chunk::write_chunk(&mut out, *tag, payload);
        }

        let channels = [
            (chunk::SND2, &self.audio),
            (chunk::ZBUF, &self.zbuffer),
            (chunk::VIEW, &self.view),
            (chunk::LITE, &self.lights),
            (chunk::AESC, &self.screen_effects),
        ];
        for (tag, payload) in channels {
            if let Some(payload) = payload {
                chunk::write_chunk(&mut out, tag, payload);
            }
        }

        let mut vqfr = Vec::new();
        let mut codebook_size = 0;
        if let Some((codebook, compressed)) = &self.codebook {
            let raw = codebook.to_bytes();
            let (tag, payload) = if *compressed {
                (chunk::CBFZ, lcw::compress(&raw))
            } else {
                (chunk::CBF0, raw)
            };
            codebook_size = payload.len() as u32;
            chunk::write_chunk(&mut vqfr, tag, &payload);
        }
        if let Some((commands, compressed)) = &self.commands {
            let mut raw = Vec::new();
            for command in commands {
                command.write(&mut raw)?;
            }
            let (tag, payload) = if *compressed {
                (chunk::VPTZ, lcw::compress(&raw))
            } else {
                (chunk::VPTR, raw)
            };
            chunk::write_chunk(&mut vqfr, tag, &payload);
        }
        chunk::write_chunk(&mut out, chunk::VQFR, &vqfr);

        Ok((out, codebook_size))
    }
}

// ============ Container ============

/// In-memory WVQA writer
#[derive(Debug, Clone)]
pub struct VqaBuilder {
    header: RawHeader,
    loops: Vec<LoopRange>,
    frames: Vec<FrameSpec>,
    index_codebooks: bool,
    extra: Vec<(Tag, Vec<u8>)>,
}

impl VqaBuilder {
    /// Silent 15 fps stream with 4x2 blocks
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            header: RawHeader {
                version: 2,
                flags: 0,
                frame_count: 0,
                width,
                height,
                block_width: 4,
                block_height: 2,
                frame_rate: 15,
                codebook_parts: 8,
                colors: 0,
                max_blocks: 0,
                offset_x: 0,
                offset_y: 0,
                max_vptr_size: 0,
                sample_rate: 0,
                channels: 0,
                bits: 0,
                max_cbfz_size: 0,
            },
            loops: Vec::new(),
            frames: Vec::new(),
            index_codebooks: true,
            extra: Vec::new(),
        }
    }

    pub fn block_size(mut self, width: u8, height: u8) -> Self {
        self.header.block_width = width;
        self.header.block_height = height;
        self
    }

    pub fn frame_rate(mut self, fps: u8) -> Self {
        self.header.frame_rate = fps;
        self
    }

    /// Position of the frame in the target surface
    pub fn offset(mut self, x: u16, y: u16) -> Self {
        self.header.offset_x = x;
        self.header.offset_y = y;
        self
    }

    /// Declare a mono 16-bit audio track
    pub fn audio(mut self, rate: SampleRate) -> Self {
        self.header.flags |= 1;
        self.header.sample_rate = rate.as_u32() as u16;
        self.header.channels = 1;
        self.header.bits = 16;
        self
    }

    /// Append a loop; ids follow insertion order
    pub fn add_loop(mut self, begin: u16, end: u16) -> Self {
        self.loops.push(LoopRange::new(begin as u32, end as u32));
        self
    }

    pub fn frame(mut self, frame: FrameSpec) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn frames(mut self, frames: impl IntoIterator<Item = FrameSpec>) -> Self {
        self.frames.extend(frames);
        self
    }

    /// Leave out `CINF`; codebooks are then only found by playing forward
    pub fn without_codebook_index(mut self) -> Self {
        self.index_codebooks = false;
        self
    }

    /// Extra top-level chunk placed before `FINF`
    pub fn unknown_chunk(mut self, tag: Tag, payload: Vec<u8>) -> Self {
        self.extra.push((tag, payload));
        self
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn build(&self) -> VqaResult<Vec<u8>> {
        let frame_count = u16::try_from(self.frames.len())
            .map_err(|_| VqaError::Format(format!("{} frames", self.frames.len())))?;

        let mut frame_data = Vec::with_capacity(self.frames.len());
        let mut codebook_index = Vec::new();
        for (i, frame) in self.frames.iter().enumerate() {
            let (data, codebook_size) = frame.write()?;
            if frame.has_indexed_codebook() {
                codebook_index.push((i as u16, codebook_size));
            }
            frame_data.push(data);
        }

        let mut header = self.header;
        header.frame_count = frame_count;
        header.max_cbfz_size = codebook_index.iter().map(|&(_, s)| s).max().unwrap_or(0);
        let mut vqhd = Vec::new();
        header.write(&mut vqhd);

        let mut body = Vec::new();
        chunk::write_chunk(&mut body, chunk::VQHD, &vqhd);

        if !self.loops.is_empty() {
            let mut linh = Vec::new();
            linh.extend_from_slice(&(self.loops.len() as u16).to_le_bytes());
            linh.extend_from_slice(&0u32.to_le_bytes());
            let mut lind = Vec::new();
            for range in &self.loops {
                lind.extend_from_slice(&(range.begin as u16).to_le_bytes());
                lind.extend_from_slice(&(range.end as u16).to_le_bytes());
            }
            let mut linf = Vec::new();
            chunk::write_chunk(&mut linf, chunk::LINH, &linh);
            chunk::write_chunk(&mut linf, chunk::LIND, &lind);
            chunk::write_chunk(&mut body, chunk::LINF, &linf);
        }

        if self.index_codebooks && !codebook_index.is_empty() {
            let mut cinh = Vec::new();
            cinh.extend_from_slice(&(codebook_index.len() as u16).to_le_bytes());
            cinh.extend_from_slice(&0u16.to_le_bytes());
            let mut cind = Vec::new();
            for (frame, size) in &codebook_index {
                cind.extend_from_slice(&frame.to_le_bytes());
                cind.extend_from_slice(&size.to_le_bytes());
            }
            let mut cinf = Vec::new();
            chunk::write_chunk(&mut cinf, chunk::CINH, &cinh);
            chunk::write_chunk(&mut cinf, chunk::CIND, &cind);
            chunk::write_chunk(&mut body, chunk::CINF, &cinf);
        }

        for (tag, payload) in &self.extra {
            chunk::write_chunk(&mut body, *tag, payload);
        }

        // Frames start right after FINF; all chunk boundaries are even
        let finf_len = 8 + 4 * self.frames.len();
        let mut offset = FORM_PREAMBLE + body.len() + finf_len;
        let mut finf = Vec::with_capacity(finf_len - 8);
        for data in &frame_data {
            finf.extend_from_slice(&((offset >> 1) as u32).to_le_bytes());
            offset += data.len();
        }
        chunk::write_chunk(&mut body, chunk::FINF, &finf);
        for data in &frame_data {
            body.extend_from_slice(data);
        }

        let mut out = Vec::with_capacity(FORM_PREAMBLE + body.len());
        out.extend_from_slice(&chunk::FORM);
        out.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        out.extend_from_slice(&chunk::WVQA);
        out.extend_from_slice(&body);
        Ok(out)
    }
}
