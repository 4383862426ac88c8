//! LCW ("format80") compression
//!
//! Westwood's byte-oriented LZ variant used for codebooks, block command
//! streams and full z-buffers. Back-references are absolute offsets into
//! the output, except the short form which is relative to the write head.

use crate::{VqaError, VqaResult};

const END_OF_DATA: u8 = 0x80;
const MAX_LITERAL: usize = 0x3F;
const MAX_FILL: usize = u16::MAX as usize;
const MIN_FILL: usize = 4;

fn corrupt(message: String) -> VqaError {
    VqaError::Decode(format!("LCW: {message}"))
}

struct Source<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Source<'_> {
    fn byte(&mut self) -> VqaResult<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| corrupt(format!("input ends inside a command at {}", self.pos)))?;
        self.pos += 1;
        Ok(b)
    }

    fn word(&mut self) -> VqaResult<usize> {
        let lo = self.byte()? as usize;
        let hi = self.byte()? as usize;
        Ok(lo | (hi << 8))
    }
}

/// Decompress `src`, refusing to produce more than `limit` bytes
///
/// The stream ends at an `0x80` command or at the end of the input.
pub fn decompress(src: &[u8], limit: usize) -> VqaResult<Vec<u8>> {
    let mut out: Vec<u8> = Vec::with_capacity(limit.min(src.len() * 4));
    let mut src = Source { data: src, pos: 0 };

    let reserve = |out: &Vec<u8>, count: usize| -> VqaResult<()> {
        if out.len() + count > limit {
            return Err(corrupt(format!(
                "output exceeds {} bytes (have {}, adding {})",
                limit,
                out.len(),
                count
            )));
        }
        Ok(())
    };

    while src.pos < src.data.len() {
        let cmd = src.byte()?;

        if cmd & 0x80 == 0 {
            // 0cccpppp pppppppp: short copy, relative to the write head
            let count = ((cmd & 0x70) >> 4) as usize + 3;
            let distance = (((cmd & 0x0F) as usize) << 8) | src.byte()? as usize;
            if distance == 0 || distance > out.len() {
                return Err(corrupt(format!(
                    "relative copy distance {} with {} bytes written",
                    distance,
                    out.len()
                )));
            }
            reserve(&out, count)?;
            let start = out.len() - distance;
            for i in 0..count {
                let b = out[start + i];
                out.push(b);
            }
        } else if cmd & 0x40 == 0 {
            // 10cccccc: literal run, zero length ends the stream
            let count = (cmd & 0x3F) as usize;
            if cmd == END_OF_DATA {
                break;
            }
            reserve(&out, count)?;
            let end = src.pos + count;
            let literal = src
                .data
                .get(src.pos..end)
                .ok_or_else(|| corrupt(format!("literal run of {count} past end of input")))?;
            out.extend_from_slice(literal);
            src.pos = end;
        } else {
            let code = (cmd & 0x3F) as usize;
            if code == 0x3E {
                // 11111110 cccc vv: fill
                let count = src.word()?;
                let value = src.byte()?;
                reserve(&out, count)?;
                out.resize(out.len() + count, value);
            } else {
                // 11cccccc pppp (short) or 11111111 cccc pppp (long): absolute copy
                let count = if code == 0x3F { src.word()? } else { code + 3 };
                let start = src.word()?;
                reserve(&out, count)?;
                for i in 0..count {
                    let b = *out.get(start + i).ok_or_else(|| {
                        corrupt(format!(
                            "absolute copy from {} with {} bytes written",
                            start + i,
                            out.len()
                        ))
                    })?;
                    out.push(b);
                }
            }
        }
    }

    Ok(out)
}

/// Compress using literal and fill commands only
///
/// Output decodes with [`decompress`]; it is meant for authoring fixtures,
/// not for matching Westwood's compression ratios.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / MAX_LITERAL + 2);
    let mut literal_start = 0;
    let mut pos = 0;

    let flush_literal = |out: &mut Vec<u8>, literal: &[u8]| {
        for run in literal.chunks(MAX_LITERAL) {
            out.push(0x80 | run.len() as u8);
            out.extend_from_slice(run);
        }
    };

    while pos < data.len() {
        let value = data[pos];
        let run = data[pos..]
            .iter()
            .take(MAX_FILL)
            .take_while(|&&b| b == value)
            .count();

        if run >= MIN_FILL {
            flush_literal(&mut out, &data[literal_start..pos]);
            out.push(0xFE);
            out.extend_from_slice(&(run as u16).to_le_bytes());
            out.push(value);
            pos += run;
            literal_start = pos;
        } else {
            pos += run;
        }
    }

    flush_literal(&mut out, &data[literal_start..]);
    out.push(END_OF_DATA);
    out
}
