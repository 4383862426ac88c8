//! Pixel surfaces
//!
//! Decoded VQA video is 15-bit RGB (5-5-5, top bit unused). A [`Surface`] is
//! the caller-owned destination the player blits into.

// ============ Surface ============

/// 2D pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Row-major pixel data, `width` pixels per row
    pub pixels: Vec<u16>,
}

impl Surface {
    /// Create a black surface
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    /// Pixels per row
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize
    }

    /// Raw pixel at (x, y), `None` outside the surface
    pub fn pixel(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.stride() + x as usize)
            .copied()
    }

    /// Fill the whole surface with one pixel value
    pub fn fill(&mut self, pixel: u16) {
        self.pixels.fill(pixel);
    }

    /// Copy a `src_width`-wide block of pixels to (x, y), clipping anything
    /// that falls outside this surface
    pub fn blit(&mut self, src: &[u16], src_width: u32, x: u32, y: u32) {
        if src_width == 0 || x >= self.width || y >= self.height {
            return;
        }
        let src_width = src_width as usize;
        let copy_width = src_width.min((self.width - x) as usize);
        let stride = self.stride();

        for (row, line) in src.chunks_exact(src_width).enumerate() {
            let dst_y = y as usize + row;
            if dst_y >= self.height as usize {
                break;
            }
            let start = dst_y * stride + x as usize;
            let end = (start + copy_width).min(self.pixels.len());
            let Some(dst) = self.pixels.get_mut(start..end) else {
                break;
            };
            dst.copy_from_slice(&line[..dst.len()]);
        }
    }
}
