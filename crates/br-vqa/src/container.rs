//! WVQA container reading
//!
//! # Layout
//!
//! ```text
//! FORM <size> WVQA
//!   VQHD  header (always first)
//!   LINF  { LINH, LIND }   loop table
//!   CINF  { CINH, CIND }   frames carrying a new codebook
//!   FINF  frame offsets
//!   per frame: [SND2] [ZBUF] [VIEW] [LITE] [AESC] VQFR { CBF0|CBFZ, VPTR|VPTZ }
//! ```
//!
//! The header chunks are parsed once at open; frames are read on demand by
//! seeking to their `FINF` offset.

use std::borrow::Cow;
use std::io::{self, Read, Seek, SeekFrom};
use std::ops::BitOr;

use br_core::{AudioFormat, SampleRate};

use crate::chunk::{self, ByteReader, ChunkHeader, SubChunks, Tag, tag_name};
use crate::loops::{LoopOverride, LoopRange, LoopTable};
use crate::timing::FrameRate;
use crate::{VqaError, VqaInfo, VqaResult, lcw};

const VQHD_SIZE: u32 = 42;
const FLAG_HAS_AUDIO: u16 = 1;
const FINF_OFFSET_MASK: u32 = 0x0FFF_FFFF;

// ============ Channel Mask ============

/// Which per-frame chunks [`VqaReader::read_frame`] loads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChannelMask(u8);

impl ChannelMask {
    pub const NONE: Self = Self(0);
    pub const VIDEO: Self = Self(1);
    pub const AUDIO: Self = Self(1 << 1);
    pub const ZBUFFER: Self = Self(1 << 2);
    pub const VIEW: Self = Self(1 << 3);
    pub const LIGHTS: Self = Self(1 << 4);
    pub const SCREEN_EFFECTS: Self = Self(1 << 5);
    pub const SIDE_CHANNELS: Self = Self(0b11_1100);
    pub const ALL: Self = Self(0b11_1111);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ChannelMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ============ Frame Chunks ============

/// Payload stored raw or LCW-compressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packed {
    Raw(Vec<u8>),
    Lcw(Vec<u8>),
}

impl Packed {
    /// Plain bytes, at most `limit` of them
    pub fn unpack(&self, limit: usize) -> VqaResult<Cow<'_, [u8]>> {
        match self {
            Packed::Raw(data) if data.len() > limit => Err(VqaError::Decode(format!(
                "{} bytes exceed the {} byte limit",
                data.len(),
                limit
            ))),
            Packed::Raw(data) => Ok(Cow::Borrowed(data)),
            Packed::Lcw(data) => lcw::decompress(data, limit).map(Cow::Owned),
        }
    }
}

/// Chunks of one frame; channels not requested or not stored are `None`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameChunks {
    pub frame: u32,
    pub codebook: Option<Packed>,
    pub vptr: Option<Packed>,
    pub audio: Option<Vec<u8>>,
    pub zbuffer: Option<Vec<u8>>,
    pub view: Option<Vec<u8>>,
    pub lights: Option<Vec<u8>>,
    pub screen_effects: Option<Vec<u8>>,
}

impl FrameChunks {
    /// Channel and storage of a side-channel or audio chunk
    fn channel_slot(&mut self, tag: Tag) -> Option<(ChannelMask, &mut Option<Vec<u8>>)> {
        match tag {
            chunk::SND2 => Some((ChannelMask::AUDIO, &mut self.audio)),
            chunk::ZBUF => Some((ChannelMask::ZBUFFER, &mut self.zbuffer)),
            chunk::VIEW => Some((ChannelMask::VIEW, &mut self.view)),
            chunk::LITE => Some((ChannelMask::LIGHTS, &mut self.lights)),
            chunk::AESC => Some((ChannelMask::SCREEN_EFFECTS, &mut self.screen_effects)),
            _ => None,
        }
    }
}

// ============ Reader ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CodebookEntry {
    frame: u32,
    size: u32,
}

/// Map running out of bytes while parsing headers to a format error
fn header_io(e: io::Error) -> VqaError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        VqaError::Format("unexpected end of stream".into())
    } else {
        VqaError::Io(e)
    }
}

/// Demultiplexer over a seekable WVQA stream
pub struct VqaReader<R> {
    stream: R,
    stream_len: u64,
    info: VqaInfo,
    loops: LoopTable,
    frame_offsets: Vec<u64>,
    codebooks: Vec<CodebookEntry>,
}

impl<R: Read + Seek> VqaReader<R> {
    /// Parse the header chunks
    ///
    /// `overrides` matching `name` patch loop ends before loops are validated.
    pub fn open(mut stream: R, name: &str, overrides: &[LoopOverride]) -> VqaResult<Self> {
        let stream_len = stream.seek(SeekFrom::End(0))?;
        stream.seek(SeekFrom::Start(0))?;

        let form = chunk::read_chunk_header(&mut stream).map_err(header_io)?;
        let mut form_type = [0u8; 4];
        stream.read_exact(&mut form_type).map_err(header_io)?;
        if form.tag != chunk::FORM || form_type != chunk::WVQA {
            return Err(VqaError::Format(format!(
                "not a WVQA stream ({} {})",
                tag_name(form.tag),
                tag_name(form_type)
            )));
        }
        let end = (ChunkHeader::SIZE + form.size as u64).min(stream_len);

        let mut header = None;
        let mut raw_loops = Vec::new();
        let mut codebooks = Vec::new();
        let mut finf = None;
        let mut pos = ChunkHeader::SIZE + 4;

        while pos + ChunkHeader::SIZE <= end {
            let head = chunk::read_chunk_header(&mut stream).map_err(header_io)?;

            if header.is_none() && head.tag != chunk::VQHD {
                return Err(VqaError::Format(format!(
                    "expected VQHD, found {}",
                    tag_name(head.tag)
                )));
            }
            // Header chunks all precede the first frame
            if is_frame_chunk(head.tag) {
                break;
            }
            if pos + ChunkHeader::SIZE + head.size as u64 > stream_len {
                return Err(VqaError::Format(format!(
                    "{} chunk of {} bytes runs past the end of the stream",
                    tag_name(head.tag),
                    head.size
                )));
            }

            match head.tag {
                chunk::VQHD | chunk::LINF | chunk::CINF | chunk::FINF => {
                    let payload = chunk::read_payload(&mut stream, &head).map_err(header_io)?;
                    match head.tag {
                        chunk::VQHD => header = Some(RawHeader::parse(&payload)?),
                        chunk::LINF => raw_loops = parse_linf(&payload)?,
                        chunk::CINF => codebooks = parse_cinf(&payload)?,
                        _ => finf = Some(payload),
                    }
                }
                _ => {
                    log::debug!("[VqaReader] Skipping {} chunk", tag_name(head.tag));
                    chunk::skip_payload(&mut stream, &head)?;
                }
            }
            pos += ChunkHeader::SIZE + head.padded_size();
        }

        let header = header.ok_or_else(|| VqaError::Format("missing VQHD".into()))?;
        let finf = finf.ok_or_else(|| VqaError::Format("missing FINF".into()))?;
        let info = header.into_info(name)?;

        let frame_offsets = parse_finf(&finf, info.frame_count, stream_len)?;
        validate_codebooks(&codebooks, info.frame_count)?;
        let loops = LoopTable::from_raw(name, &raw_loops, info.frame_count, overrides);

        log::info!(
            "[VqaReader] Opened {}: {} frames {}x{} @ {}, {} loops, audio {}",
            name,
            info.frame_count,
            info.width,
            info.height,
            info.frame_rate,
            loops.len(),
            if info.has_audio() { "yes" } else { "no" }
        );

        Ok(Self {
            stream,
            stream_len,
            info,
            loops,
            frame_offsets,
            codebooks,
        })
    }

    #[inline]
    pub fn info(&self) -> &VqaInfo {
        &self.info
    }

    #[inline]
    pub fn loops(&self) -> &LoopTable {
        &self.loops
    }

    #[inline]
    pub fn frame_count(&self) -> u32 {
        self.info.frame_count
    }

    pub fn loop_begin_and_end(&self, loop_id: u32) -> VqaResult<(u32, u32)> {
        self.loops.get(loop_id).map(|r| (r.begin, r.end))
    }

    /// Byte offset of a frame's first chunk
    pub fn frame_offset(&self, frame: u32) -> Option<u64> {
        self.frame_offsets.get(frame as usize).copied()
    }

    /// Index of the codebook in force at `frame`, `None` without a `CINF`
    pub fn codebook_slot(&self, frame: u32) -> Option<usize> {
        let after = self.codebooks.partition_point(|e| e.frame <= frame);
        after.checked_sub(1)
    }

    /// Frame carrying codebook `slot`
    pub fn codebook_frame(&self, slot: usize) -> Option<u32> {
        self.codebooks.get(slot).map(|e| e.frame)
    }

    /// Fetch the packed codebook of `slot` from its frame
    pub fn read_codebook(&mut self, slot: usize) -> VqaResult<Packed> {
        let entry = *self
            .codebooks
            .get(slot)
            .ok_or_else(|| VqaError::Decode(format!("no codebook slot {}", slot)))?;
        self.read_frame(entry.frame, ChannelMask::VIDEO)?
            .codebook
            .ok_or_else(|| {
                VqaError::Decode(format!(
                    "frame {} is indexed for codebook {} but carries none",
                    entry.frame, slot
                ))
            })
    }

    /// Read the chunks of `frame` selected by `mask`
    pub fn read_frame(&mut self, frame: u32, mask: ChannelMask) -> VqaResult<FrameChunks> {
        let offset = self
            .frame_offset(frame)
            .ok_or(VqaError::FrameOutOfRange {
                frame,
                frame_count: self.info.frame_count,
            })?;
        let limit = self
            .frame_offset(frame + 1)
            .filter(|&next| next > offset)
            .unwrap_or(self.stream_len);

        self.stream.seek(SeekFrom::Start(offset))?;
        let mut chunks = FrameChunks {
            frame,
            ..FrameChunks::default()
        };
        let mut pos = offset;

        loop {
            if pos + ChunkHeader::SIZE > limit {
                return Err(VqaError::Format(format!("frame {} has no VQFR chunk", frame)));
            }
            let head = chunk::read_chunk_header(&mut self.stream).map_err(header_io)?;
            if pos + ChunkHeader::SIZE + head.size as u64 > self.stream_len {
                return Err(VqaError::Format(format!(
                    "frame {}: {} chunk runs past the end of the stream",
                    frame,
                    tag_name(head.tag)
                )));
            }

            if head.tag == chunk::VQFR {
                if mask.contains(ChannelMask::VIDEO) {
                    let payload = chunk::read_payload(&mut self.stream, &head)?;
                    parse_vqfr(&payload, &mut chunks)?;
                }
                return Ok(chunks);
            }

            match chunks.channel_slot(head.tag) {
                Some((channel, target)) if mask.contains(channel) => {
                    *target = Some(chunk::read_payload(&mut self.stream, &head)?);
                }
                _ => {
                    chunk::skip_payload(&mut self.stream, &head)?;
                }
            }
            pos += ChunkHeader::SIZE + head.padded_size();
        }
    }
}

fn is_frame_chunk(tag: Tag) -> bool {
    matches!(
        tag,
        chunk::SND2 | chunk::ZBUF | chunk::VIEW | chunk::LITE | chunk::AESC | chunk::VQFR
    )
}

fn parse_vqfr(payload: &[u8], chunks: &mut FrameChunks) -> VqaResult<()> {
    for item in SubChunks::new(payload, "VQFR", VqaError::Decode) {
        let (tag, data) = item?;
        match tag {
            chunk::CBF0 => chunks.codebook = Some(Packed::Raw(data.to_vec())),
            chunk::CBFZ => chunks.codebook = Some(Packed::Lcw(data.to_vec())),
            chunk::VPTR => chunks.vptr = Some(Packed::Raw(data.to_vec())),
            chunk::VPTZ => chunks.vptr = Some(Packed::Lcw(data.to_vec())),
            other => log::trace!("[VqaReader] Ignoring VQFR/{}", tag_name(other)),
        }
    }
    Ok(())
}

// ============ Header Chunks ============

/// VQHD fields as stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawHeader {
    pub version: u16,
    pub flags: u16,
    pub frame_count: u16,
    pub width: u16,
    pub height: u16,
    pub block_width: u8,
    pub block_height: u8,
    pub frame_rate: u8,
    pub codebook_parts: u8,
    pub colors: u16,
    pub max_blocks: u16,
    pub offset_x: u16,
    pub offset_y: u16,
    pub max_vptr_size: u16,
    pub sample_rate: u16,
    pub channels: u8,
    pub bits: u8,
    pub max_cbfz_size: u32,
}

impl RawHeader {
    fn parse(payload: &[u8]) -> VqaResult<Self> {
        if payload.len() < VQHD_SIZE as usize {
            return Err(VqaError::Format(format!(
                "VQHD is {} bytes, expected {}",
                payload.len(),
                VQHD_SIZE
            )));
        }
        let mut src = ByteReader::new(payload, "VQHD", VqaError::Format);
        let version = src.u16()?;
        let flags = src.u16()?;
        let frame_count = src.u16()?;
        let width = src.u16()?;
        let height = src.u16()?;
        let block_width = src.u8()?;
        let block_height = src.u8()?;
        let frame_rate = src.u8()?;
        let codebook_parts = src.u8()?;
        let colors = src.u16()?;
        let max_blocks = src.u16()?;
        let offset_x = src.u16()?;
        let offset_y = src.u16()?;
        let max_vptr_size = src.u16()?;
        let sample_rate = src.u16()?;
        let channels = src.u8()?;
        let bits = src.u8()?;
        src.skip(6)?;
        let max_cbfz_size = src.u32()?;

        Ok(Self {
            version,
            flags,
            frame_count,
            width,
            height,
            block_width,
            block_height,
            frame_rate,
            codebook_parts,
            colors,
            max_blocks,
            offset_x,
            offset_y,
            max_vptr_size,
            sample_rate,
            channels,
            bits,
            max_cbfz_size,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        for v in [
            self.version,
            self.flags,
            self.frame_count,
            self.width,
            self.height,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&[
            self.block_width,
            self.block_height,
            self.frame_rate,
            self.codebook_parts,
        ]);
        for v in [
            self.colors,
            self.max_blocks,
            self.offset_x,
            self.offset_y,
            self.max_vptr_size,
            self.sample_rate,
        ] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&[self.channels, self.bits]);
        out.extend_from_slice(&[0; 6]);
        out.extend_from_slice(&self.max_cbfz_size.to_le_bytes());
        out.extend_from_slice(&[0; 4]);
    }

    fn into_info(self, name: &str) -> VqaResult<VqaInfo> {
        let bad = |what: String| Err(VqaError::Format(what));

        if self.frame_count == 0 {
            return bad("frame count is 0".into());
        }
        if self.block_width == 0 || self.block_height == 0 {
            return bad(format!(
                "block size {}x{}",
                self.block_width, self.block_height
            ));
        }
        if self.width == 0
            || self.height == 0
            || self.width % self.block_width as u16 != 0
            || self.height % self.block_height as u16 != 0
        {
            return bad(format!(
                "frame size {}x{} is not a multiple of block size {}x{}",
                self.width, self.height, self.block_width, self.block_height
            ));
        }
        if self.frame_rate == 0 {
            return bad("frame rate is 0".into());
        }

        let audio = if self.flags & FLAG_HAS_AUDIO != 0 {
            let Some(rate) = SampleRate::from_hz(self.sample_rate as u32) else {
                return bad(format!("unsupported sample rate {}", self.sample_rate));
            };
            if self.channels != 1 {
                return bad(format!("{} audio channels, only mono is supported", self.channels));
            }
            Some(AudioFormat::mono(rate))
        } else {
            None
        };

        Ok(VqaInfo {
            name: name.to_string(),
            version: self.version,
            frame_count: self.frame_count as u32,
            width: self.width as u32,
            height: self.height as u32,
            block_width: self.block_width as u32,
            block_height: self.block_height as u32,
            frame_rate: FrameRate::new(self.frame_rate as u32),
            offset_x: self.offset_x as u32,
            offset_y: self.offset_y as u32,
            max_vptr_size: self.max_vptr_size as u32,
            audio,
        })
    }
}

fn parse_linf(payload: &[u8]) -> VqaResult<Vec<LoopRange>> {
    let mut count = None;
    let mut loops = Vec::new();

    for item in SubChunks::new(payload, "LINF", VqaError::Format) {
        let (tag, data) = item?;
        match tag {
            chunk::LINH => {
                let mut src = ByteReader::new(data, "LINH", VqaError::Format);
                count = Some(src.u16()? as usize);
            }
            chunk::LIND => {
                let n = count.ok_or_else(|| VqaError::Format("LIND before LINH".into()))?;
                let mut src = ByteReader::new(data, "LIND", VqaError::Format);
                loops = (0..n)
                    .map(|_| -> VqaResult<LoopRange> {
                        Ok(LoopRange::new(src.u16()? as u32, src.u16()? as u32))
                    })
                    .collect::<VqaResult<_>>()?;
            }
            _ => {}
        }
    }
    Ok(loops)
}

fn parse_cinf(payload: &[u8]) -> VqaResult<Vec<CodebookEntry>> {
    let mut count = None;
    let mut entries = Vec::new();

    for item in SubChunks::new(payload, "CINF", VqaError::Format) {
        let (tag, data) = item?;
        match tag {
            chunk::CINH => {
                let mut src = ByteReader::new(data, "CINH", VqaError::Format);
                count = Some(src.u16()? as usize);
            }
            chunk::CIND => {
                let n = count.ok_or_else(|| VqaError::Format("CIND before CINH".into()))?;
                let mut src = ByteReader::new(data, "CIND", VqaError::Format);
                entries = (0..n)
                    .map(|_| -> VqaResult<CodebookEntry> {
                        Ok(CodebookEntry {
                            frame: src.u16()? as u32,
                            size: src.u32()?,
                        })
                    })
                    .collect::<VqaResult<_>>()?;
            }
            _ => {}
        }
    }
    Ok(entries)
}

fn validate_codebooks(entries: &[CodebookEntry], frame_count: u32) -> VqaResult<()> {
    if let Some(first) = entries.first() {
        if first.frame != 0 {
            return Err(VqaError::Format(format!(
                "first codebook is at frame {}, not 0",
                first.frame
            )));
        }
    }
    for pair in entries.windows(2) {
        if pair[1].frame <= pair[0].frame {
            return Err(VqaError::Format(format!(
                "codebook index not increasing ({} then {})",
                pair[0].frame, pair[1].frame
            )));
        }
    }
    if let Some(last) = entries.last() {
        if last.frame >= frame_count {
            return Err(VqaError::Format(format!(
                "codebook at frame {} past frame count {}",
                last.frame, frame_count
            )));
        }
        log::trace!("[VqaReader] Last codebook packed size {}", last.size);
    }
    Ok(())
}

fn parse_finf(payload: &[u8], frame_count: u32, stream_len: u64) -> VqaResult<Vec<u64>> {
    let mut src = ByteReader::new(payload, "FINF", VqaError::Format);
    (0..frame_count)
        .map(|frame| -> VqaResult<u64> {
            let offset = ((src.u32()? & FINF_OFFSET_MASK) as u64) << 1;
            if offset + ChunkHeader::SIZE > stream_len {
                return Err(VqaError::Format(format!(
                    "frame {} offset {} is past the end of the stream",
                    frame, offset
                )));
            }
            Ok(offset)
        })
        .collect()
}
