//! IFF chunk primitives
//!
//! Chunk headers are a 4-byte tag plus a big-endian size; payloads are
//! padded to an even length. Fields inside payloads are little-endian.

use std::io::{self, Read, Seek, SeekFrom};

use crate::{VqaError, VqaResult};

/// Four-character chunk identifier
pub type Tag = [u8; 4];

pub const FORM: Tag = *b"FORM";
pub const WVQA: Tag = *b"WVQA";
pub const VQHD: Tag = *b"VQHD";
pub const LINF: Tag = *b"LINF";
pub const LINH: Tag = *b"LINH";
pub const LIND: Tag = *b"LIND";
pub const CINF: Tag = *b"CINF";
pub const CINH: Tag = *b"CINH";
pub const CIND: Tag = *b"CIND";
pub const FINF: Tag = *b"FINF";
pub const SND2: Tag = *b"SND2";
pub const ZBUF: Tag = *b"ZBUF";
pub const VIEW: Tag = *b"VIEW";
pub const LITE: Tag = *b"LITE";
pub const AESC: Tag = *b"AESC";
pub const VQFR: Tag = *b"VQFR";
pub const CBF0: Tag = *b"CBF0";
pub const CBFZ: Tag = *b"CBFZ";
pub const VPTR: Tag = *b"VPTR";
pub const VPTZ: Tag = *b"VPTZ";

/// Printable form of a tag for log and error messages
pub fn tag_name(tag: Tag) -> String {
    tag.iter()
        .map(|&b| if b.is_ascii_graphic() { b as char } else { '?' })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub tag: Tag,
    pub size: u32,
}

impl ChunkHeader {
    pub const SIZE: u64 = 8;

    /// Payload size including the pad byte
    #[inline]
    pub fn padded_size(&self) -> u64 {
        self.size as u64 + (self.size as u64 & 1)
    }
}

pub fn read_chunk_header<R: Read>(reader: &mut R) -> io::Result<ChunkHeader> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(ChunkHeader {
        tag: [buf[0], buf[1], buf[2], buf[3]],
        size: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
    })
}

/// Read a payload and step over its pad byte
pub fn read_payload<R: Read + Seek>(reader: &mut R, header: &ChunkHeader) -> io::Result<Vec<u8>> {
    let mut data = vec![0u8; header.size as usize];
    reader.read_exact(&mut data)?;
    if header.size & 1 == 1 {
        reader.seek(SeekFrom::Current(1))?;
    }
    Ok(data)
}

pub fn skip_payload<R: Seek>(reader: &mut R, header: &ChunkHeader) -> io::Result<u64> {
    reader.seek(SeekFrom::Current(header.padded_size() as i64))
}

/// Serialize a chunk, padding odd payloads
pub fn write_chunk(out: &mut Vec<u8>, tag: Tag, payload: &[u8]) {
    out.extend_from_slice(&tag);
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 != 0 {
        out.push(0);
    }
}

// ============ Payload Reader ============

/// Little-endian cursor over a chunk payload
///
/// Running past the end yields the error built by `corrupt`, so header
/// parsing reports [`VqaError::Format`] and frame parsing [`VqaError::Decode`].
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
    corrupt: fn(String) -> VqaError,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], what: &'static str, corrupt: fn(String) -> VqaError) -> Self {
        Self {
            data,
            pos: 0,
            what,
            corrupt,
        }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Build this reader's error kind with a message
    pub fn error(&self, message: impl Into<String>) -> VqaError {
        (self.corrupt)(format!("{}: {}", self.what, message.into()))
    }

    pub fn bytes(&mut self, n: usize) -> VqaResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(self.error(format!(
                "truncated at offset {} (wanted {} bytes, {} left)",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> VqaResult<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.bytes(N)?);
        Ok(buf)
    }

    pub fn skip(&mut self, n: usize) -> VqaResult<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> VqaResult<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> VqaResult<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> VqaResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn f32(&mut self) -> VqaResult<f32> {
        Ok(f32::from_le_bytes(self.array()?))
    }
}

// ============ Sub-chunks ============

/// Iterator over the chunks nested in a container payload
pub struct SubChunks<'a> {
    reader: ByteReader<'a>,
}

impl<'a> SubChunks<'a> {
    pub fn new(data: &'a [u8], what: &'static str, corrupt: fn(String) -> VqaError) -> Self {
        Self {
            reader: ByteReader::new(data, what, corrupt),
        }
    }

    fn next_chunk(&mut self) -> VqaResult<(Tag, &'a [u8])> {
        let tag_bytes = self.reader.bytes(4)?;
        let tag = [tag_bytes[0], tag_bytes[1], tag_bytes[2], tag_bytes[3]];
        let size_bytes = self.reader.bytes(4)?;
        let size =
            u32::from_be_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]);
        let payload = self.reader.bytes(size as usize)?;
        if size & 1 == 1 && !self.reader.is_empty() {
            self.reader.skip(1)?;
        }
        Ok((tag, payload))
    }
}

impl<'a> Iterator for SubChunks<'a> {
    type Item = VqaResult<(Tag, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_empty() {
            return None;
        }
        let item = self.next_chunk();
        if item.is_err() {
            // Stop after the first malformed chunk
            self.reader.pos = self.reader.data.len();
        }
        Some(item)
    }
}
