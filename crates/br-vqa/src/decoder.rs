//! Video decoding
//!
//! A frame is a stream of block commands indexing into the current
//! codebook. Blocks not touched by a command keep the previous frame's
//! pixels, so the decoder owns a back buffer that persists across frames.

use std::io::{Read, Seek};
use std::sync::Arc;

use br_core::Surface;

use crate::chunk::ByteReader;
use crate::codebook_cache::{CacheStats, CodebookCache};
use crate::container::{FrameChunks, Packed, VqaReader};
use crate::{VqaError, VqaInfo, VqaResult};

/// Largest entry index a block command can address
const MAX_CODEBOOK_ENTRIES: usize = 0x2000;

// ============ Codebook ============

/// Table of `block_width x block_height` RGB555 tiles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codebook {
    block_width: usize,
    block_height: usize,
    pixels: Vec<u16>,
}

impl Codebook {
    /// Trailing pixels that do not fill a whole entry are ignored
    pub fn new(block_width: usize, block_height: usize, pixels: Vec<u16>) -> Self {
        Self {
            block_width,
            block_height,
            pixels,
        }
    }

    /// Parse little-endian RGB555 entries
    pub fn from_bytes(block_width: usize, block_height: usize, data: &[u8]) -> VqaResult<Self> {
        let entry_bytes = block_width * block_height * 2;
        if entry_bytes == 0 || data.len() % entry_bytes != 0 {
            return Err(VqaError::Decode(format!(
                "codebook of {} bytes is not a whole number of {}-byte entries",
                data.len(),
                entry_bytes
            )));
        }
        let pixels = data
            .chunks_exact(2)
            .map(|p| u16::from_le_bytes([p[0], p[1]]))
            .collect();
        Ok(Self::new(block_width, block_height, pixels))
    }

    #[inline]
    fn entry_pixels(&self) -> usize {
        self.block_width * self.block_height
    }

    pub fn len(&self) -> usize {
        self.pixels.len() / self.entry_pixels().max(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pixels of one entry, row-major
    pub fn entry(&self, index: usize) -> Option<&[u16]> {
        if index >= self.len() {
            return None;
        }
        let n = self.entry_pixels();
        Some(&self.pixels[index * n..(index + 1) * n])
    }

    pub fn byte_size(&self) -> usize {
        self.pixels.len() * 2
    }

    /// Serialize back to the on-disk layout
    pub fn to_bytes(&self) -> Vec<u8> {
        self.pixels.iter().flat_map(|p| p.to_le_bytes()).collect()
    }
}

// ============ Block Commands ============

/// One command of a `VPTR` stream
///
/// The top three bits of each little-endian word select the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockCommand {
    /// Leave `count` blocks unchanged (1..=0x2000)
    Skip(u16),
    /// Entry 0..=0xFF written to `count` blocks (even, 2..=64)
    Repeat { entry: u16, count: u16 },
    /// Entry `first` followed by one block per byte of `rest` (even length, 2..=64)
    List { first: u16, rest: Vec<u8> },
    /// Entry 0..=0x1FFF written once
    Single(u16),
    /// Entry 0..=0x1FFF written to `count` blocks
    Fill { entry: u16, count: u8 },
}

impl BlockCommand {
    /// Read the next command
    pub fn read(src: &mut ByteReader<'_>) -> VqaResult<Self> {
        let word = src.u16()?;
        let pairs = || (((word >> 8) & 0x1F) + 1) * 2;

        match word >> 13 {
            0 => Ok(Self::Skip((word & 0x1FFF) + 1)),
            1 => Ok(Self::Repeat {
                entry: word & 0xFF,
                count: pairs(),
            }),
            2 => {
                let rest = src.bytes(pairs() as usize)?.to_vec();
                Ok(Self::List {
                    first: word & 0xFF,
                    rest,
                })
            }
            3 => Ok(Self::Single(word & 0x1FFF)),
            4 => Ok(Self::Fill {
                entry: word & 0x1FFF,
                count: src.u8()?,
            }),
            op => Err(src.error(format!("unknown block command {} (word {:#06x})", op, word))),
        }
    }

    /// Append the encoded command, rejecting values the format cannot hold
    pub fn write(&self, out: &mut Vec<u8>) -> VqaResult<()> {
        let unencodable = || VqaError::Format(format!("cannot encode {:?}", self));
        let pair_bits = |count: usize| -> VqaResult<u16> {
            if count < 2 || count > 64 || count % 2 != 0 {
                return Err(unencodable());
            }
            Ok(((count / 2 - 1) as u16) << 8)
        };

        match self {
            Self::Skip(count) => {
                if *count == 0 || *count > 0x2000 {
                    return Err(unencodable());
                }
                out.extend_from_slice(&(count - 1).to_le_bytes());
            }
            Self::Repeat { entry, count } => {
                if *entry > 0xFF {
                    return Err(unencodable());
                }
                let word = (1 << 13) | pair_bits(*count as usize)? | entry;
                out.extend_from_slice(&word.to_le_bytes());
            }
            Self::List { first, rest } => {
                if *first > 0xFF {
                    return Err(unencodable());
                }
                let word = (2 << 13) | pair_bits(rest.len())? | first;
                out.extend_from_slice(&word.to_le_bytes());
                out.extend_from_slice(rest);
            }
            Self::Single(entry) => {
                if *entry > 0x1FFF {
                    return Err(unencodable());
                }
                out.extend_from_slice(&((3 << 13) | entry).to_le_bytes());
            }
            Self::Fill { entry, count } => {
                if *entry > 0x1FFF {
                    return Err(unencodable());
                }
                out.extend_from_slice(&((4 << 13) | entry).to_le_bytes());
                out.push(*count);
            }
        }
        Ok(())
    }
}

// ============ Video Decoder ============

/// Codebook in use
struct ActiveCodebook {
    /// `CINF` slot in force when it was loaded, `None` for unindexed streams
    slot: Option<usize>,
    /// First frame it applies to
    since: u32,
    codebook: Arc<Codebook>,
}

/// Decodes frames into a persistent back buffer and blits it to surfaces
pub struct VideoDecoder {
    width: usize,
    height: usize,
    block_width: usize,
    block_height: usize,
    blocks_per_row: usize,
    block_count: usize,
    offset_x: u32,
    offset_y: u32,
    vptr_limit: usize,
    codebook_limit: usize,
    back_buffer: Vec<u16>,
    cache: CodebookCache,
    active: Option<ActiveCodebook>,
    last_frame: Option<u32>,
}

impl VideoDecoder {
    pub fn new(info: &VqaInfo, cache_size: usize) -> Self {
        let block_count = info.block_count() as usize;
        let entry_bytes = (info.block_width * info.block_height * 2) as usize;
        // Worst case is one 3-byte command per block
        let vptr_limit = (info.max_vptr_size as usize).max(block_count * 4 + 64);

        Self {
            width: info.width as usize,
            height: info.height as usize,
            block_width: info.block_width as usize,
            block_height: info.block_height as usize,
            blocks_per_row: info.blocks_per_row() as usize,
            block_count,
            offset_x: info.offset_x,
            offset_y: info.offset_y,
            vptr_limit,
            codebook_limit: entry_bytes * MAX_CODEBOOK_ENTRIES,
            back_buffer: vec![0; info.width as usize * info.height as usize],
            cache: CodebookCache::new(cache_size),
            active: None,
            last_frame: None,
        }
    }

    /// Last successfully decoded frame
    #[inline]
    pub fn last_frame(&self) -> Option<u32> {
        self.last_frame
    }

    /// Pixels of the last decoded frame, `width * height` row-major
    pub fn back_buffer(&self) -> &[u16] {
        &self.back_buffer
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Decode `chunks` on top of the previous frame and present the result
    pub fn decode_frame<R: Read + Seek>(
        &mut self,
        reader: &mut VqaReader<R>,
        chunks: &FrameChunks,
        surface: Option<&mut Surface>,
    ) -> VqaResult<()> {
        let frame = chunks.frame;
        let codebook = self.codebook_for(reader, chunks)?;

        if let Some(vptr) = &chunks.vptr {
            let commands = vptr.unpack(self.vptr_limit)?;
            self.apply_commands(&codebook, &commands)?;
        }

        self.last_frame = Some(frame);
        if let Some(surface) = surface {
            self.present(surface);
        }
        Ok(())
    }

    /// Re-blit the last decoded frame without touching decode state
    pub fn redraw(&self, surface: &mut Surface) -> Option<u32> {
        let frame = self.last_frame?;
        self.present(surface);
        Some(frame)
    }

    fn present(&self, surface: &mut Surface) {
        surface.blit(
            &self.back_buffer,
            self.width as u32,
            self.offset_x,
            self.offset_y,
        );
    }

    fn codebook_for<R: Read + Seek>(
        &mut self,
        reader: &mut VqaReader<R>,
        chunks: &FrameChunks,
    ) -> VqaResult<Arc<Codebook>> {
        let slot = reader.codebook_slot(chunks.frame);

        // A codebook stored in this very frame wins; one missing from the
        // index stays in force until the next indexed codebook
        if let Some(packed) = &chunks.codebook {
            let codebook = Arc::new(self.unpack_codebook(packed)?);
            match slot {
                Some(s) if reader.codebook_frame(s) == Some(chunks.frame) => {
                    self.cache.insert(s, Arc::clone(&codebook));
                }
                Some(_) => log::debug!(
                    "[VideoDecoder] Frame {} carries a codebook missing from the index",
                    chunks.frame
                ),
                None => {}
            }
            self.active = Some(ActiveCodebook {
                slot,
                since: chunks.frame,
                codebook: Arc::clone(&codebook),
            });
            return Ok(codebook);
        }

        let Some(slot) = slot else {
            // Unindexed stream: keep using whatever codebook came last
            return self
                .active
                .as_ref()
                .map(|active| Arc::clone(&active.codebook))
                .ok_or_else(|| {
                    VqaError::Decode(format!("no codebook available for frame {}", chunks.frame))
                });
        };

        if let Some(active) = &self.active {
            if active.slot == Some(slot) && chunks.frame >= active.since {
                return Ok(Arc::clone(&active.codebook));
            }
        }

        let codebook = match self.cache.get(slot) {
            Some(codebook) => codebook,
            None => {
                log::debug!(
                    "[VideoDecoder] Loading codebook {} for frame {}",
                    slot,
                    chunks.frame
                );
                let packed = reader.read_codebook(slot)?;
                let codebook = Arc::new(self.unpack_codebook(&packed)?);
                self.cache.insert(slot, Arc::clone(&codebook));
                codebook
            }
        };
        self.active = Some(ActiveCodebook {
            slot: Some(slot),
            since: reader.codebook_frame(slot).unwrap_or(chunks.frame),
            codebook: Arc::clone(&codebook),
        });
        Ok(codebook)
    }

    fn unpack_codebook(&self, packed: &Packed) -> VqaResult<Codebook> {
        let data = packed.unpack(self.codebook_limit)?;
        Codebook::from_bytes(self.block_width, self.block_height, &data)
    }

    fn apply_commands(&mut self, codebook: &Codebook, commands: &[u8]) -> VqaResult<()> {
        let mut src = ByteReader::new(commands, "VPTR", VqaError::Decode);
        let mut block = 0usize;

        // A lone trailing byte is padding
        while src.remaining() >= 2 {
            match BlockCommand::read(&mut src)? {
                BlockCommand::Skip(count) => {
                    block += count as usize;
                    if block > self.block_count {
                        return Err(self.overrun(block));
                    }
                }
                BlockCommand::Repeat { entry, count } => {
                    for _ in 0..count {
                        self.put_block(codebook, block, entry as usize)?;
                        block += 1;
                    }
                }
                BlockCommand::List { first, rest } => {
                    self.put_block(codebook, block, first as usize)?;
                    block += 1;
                    for entry in rest {
                        self.put_block(codebook, block, entry as usize)?;
                        block += 1;
                    }
                }
                BlockCommand::Single(entry) => {
                    self.put_block(codebook, block, entry as usize)?;
                    block += 1;
                }
                BlockCommand::Fill { entry, count } => {
                    for _ in 0..count {
                        self.put_block(codebook, block, entry as usize)?;
                        block += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn overrun(&self, block: usize) -> VqaError {
        VqaError::Decode(format!(
            "block commands run past the last block ({} of {})",
            block, self.block_count
        ))
    }

    fn put_block(&mut self, codebook: &Codebook, block: usize, entry: usize) -> VqaResult<()> {
        if block >= self.block_count {
            return Err(self.overrun(block + 1));
        }
        let pixels = codebook.entry(entry).ok_or_else(|| {
            VqaError::Decode(format!(
                "codebook entry {} out of range ({} entries)",
                entry,
                codebook.len()
            ))
        })?;

        let bx = block % self.blocks_per_row * self.block_width;
        let by = block / self.blocks_per_row * self.block_height;
        for (row, line) in pixels.chunks_exact(self.block_width).enumerate() {
            let start = (by + row) * self.width + bx;
            self.back_buffer[start..start + self.block_width].copy_from_slice(line);
        }
        debug_assert!(by + self.block_height <= self.height);
        Ok(())
    }
}
