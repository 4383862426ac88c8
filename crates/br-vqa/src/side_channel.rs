//! Side-channel decoding
//!
//! Per-frame data that is not pixels: the depth map used for actor
//! occlusion, the camera view, scene lights and screen effect masks. Each
//! target is owned by the caller and updated in place from the current
//! frame's chunk.

use nalgebra::{Matrix3, Matrix3x4, Vector3};

use crate::chunk::ByteReader;
use crate::{VqaError, VqaResult, lcw};

fn reader<'a>(data: &'a [u8], what: &'static str) -> ByteReader<'a> {
    ByteReader::new(data, what, VqaError::Decode)
}

fn read_vec3(src: &mut ByteReader<'_>) -> VqaResult<Vector3<f32>> {
    Ok(Vector3::new(src.f32()?, src.f32()?, src.f32()?))
}

// ============ Z-Buffer ============

const ZBUF_FULL: u32 = 0;
const ZBUF_PARTIAL: u32 = 1;

/// Per-pixel depth map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZBuffer {
    width: u32,
    height: u32,
    depth: Vec<u16>,
}

impl ZBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row-major depth values
    pub fn data(&self) -> &[u16] {
        &self.depth
    }

    pub fn depth(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.depth
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    /// Apply a `ZBUF` payload
    pub fn update(&mut self, payload: &[u8]) -> VqaResult<()> {
        let mut src = reader(payload, "ZBUF");
        let width = src.u32()?;
        let height = src.u32()?;
        let mode = src.u32()?;

        if width != self.width || height != self.height {
            return Err(src.error(format!(
                "{}x{} depth map for a {}x{} target",
                width, height, self.width, self.height
            )));
        }

        match mode {
            ZBUF_FULL => {
                let expected = self.depth.len() * 2;
                let data = lcw::decompress(src.bytes(src.remaining())?, expected)?;
                if data.len() != expected {
                    return Err(src.error(format!(
                        "full depth map inflated to {} bytes, expected {}",
                        data.len(),
                        expected
                    )));
                }
                for (d, pair) in self.depth.iter_mut().zip(data.chunks_exact(2)) {
                    *d = u16::from_le_bytes([pair[0], pair[1]]);
                }
            }
            ZBUF_PARTIAL => {
                let mut pos = 0usize;
                while !src.is_empty() {
                    pos += src.u16()? as usize;
                    let count = src.u16()? as usize;
                    if pos + count > self.depth.len() {
                        return Err(src.error(format!(
                            "run {}..{} past the end of the depth map",
                            pos,
                            pos + count
                        )));
                    }
                    for d in &mut self.depth[pos..pos + count] {
                        *d = src.u16()?;
                    }
                    pos += count;
                }
            }
            other => return Err(src.error(format!("unknown mode {}", other))),
        }
        Ok(())
    }

    /// Payload replacing the whole map
    pub fn encode_full(width: u32, height: u32, depth: &[u16]) -> Vec<u8> {
        let raw: Vec<u8> = depth.iter().flat_map(|d| d.to_le_bytes()).collect();
        let mut out = Self::encode_header(width, height, ZBUF_FULL);
        out.extend(lcw::compress(&raw));
        out
    }

    /// Payload patching runs of `(skip, values)` over the previous map
    pub fn encode_runs(width: u32, height: u32, runs: &[(u16, Vec<u16>)]) -> Vec<u8> {
        let mut out = Self::encode_header(width, height, ZBUF_PARTIAL);
        for (skip, values) in runs {
            out.extend_from_slice(&skip.to_le_bytes());
            out.extend_from_slice(&(values.len() as u16).to_le_bytes());
            for v in values {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    fn encode_header(width: u32, height: u32, mode: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&height.to_le_bytes());
        out.extend_from_slice(&mode.to_le_bytes());
        out
    }
}

// ============ View ============

/// Camera of the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct View {
    /// Horizontal field of view in radians
    pub fov_x: f32,
    /// World to camera transform, rotation in the left 3x3
    pub frame_view: Matrix3x4<f32>,
    /// Camera position in world space
    pub camera_position: Vector3<f32>,
}

impl Default for View {
    fn default() -> Self {
        Self {
            fov_x: 0.0,
            frame_view: Matrix3x4::identity(),
            camera_position: Vector3::zeros(),
        }
    }
}

impl View {
    pub fn new(fov_x: f32, frame_view: Matrix3x4<f32>) -> Self {
        let rotation: Matrix3<f32> = frame_view.fixed_view::<3, 3>(0, 0).into_owned();
        let translation: Vector3<f32> = frame_view.column(3).into_owned();
        Self {
            fov_x,
            frame_view,
            camera_position: -(rotation.transpose() * translation),
        }
    }

    /// Apply a `VIEW` payload
    pub fn update(&mut self, payload: &[u8]) -> VqaResult<()> {
        let mut src = reader(payload, "VIEW");
        let fov_x = src.f32()?;
        let mut values = [0f32; 12];
        for v in &mut values {
            *v = src.f32()?;
        }
        *self = Self::new(fov_x, Matrix3x4::from_row_slice(&values));
        Ok(())
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = self.fov_x.to_le_bytes().to_vec();
        for row in self.frame_view.row_iter() {
            for v in row.iter() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }
}

// ============ Lights ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightKind {
    Ambient,
    Point,
    Spot,
}

impl LightKind {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Ambient),
            1 => Some(Self::Point),
            2 => Some(Self::Spot),
            _ => None,
        }
    }

    fn raw(self) -> u32 {
        match self {
            Self::Ambient => 0,
            Self::Point => 1,
            Self::Spot => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vector3<f32>,
    pub position: Vector3<f32>,
    pub falloff_start: f32,
    pub falloff_end: f32,
}

impl Light {
    /// Attenuation at `distance`: 1 inside the falloff start, 0 past its end
    pub fn attenuation(&self, distance: f32) -> f32 {
        if self.kind == LightKind::Ambient || distance <= self.falloff_start {
            return 1.0;
        }
        if distance >= self.falloff_end {
            return 0.0;
        }
        1.0 - (distance - self.falloff_start) / (self.falloff_end - self.falloff_start)
    }
}

/// Lights of the current frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lights {
    pub lights: Vec<Light>,
}

impl Lights {
    /// Apply a `LITE` payload, replacing the previous set
    pub fn update(&mut self, payload: &[u8]) -> VqaResult<()> {
        let mut src = reader(payload, "LITE");
        let count = src.u32()?;
        let mut lights = Vec::with_capacity((count as usize).min(src.remaining() / 40));

        for _ in 0..count {
            let raw_kind = src.u32()?;
            let kind = LightKind::from_raw(raw_kind)
                .ok_or_else(|| src.error(format!("unknown light kind {}", raw_kind)))?;
            lights.push(Light {
                kind,
                color: read_vec3(&mut src)?,
                position: read_vec3(&mut src)?,
                falloff_start: src.f32()?,
                falloff_end: src.f32()?,
            });
        }

        self.lights = lights;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.lights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lights.is_empty()
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = (self.lights.len() as u32).to_le_bytes().to_vec();
        for light in &self.lights {
            out.extend_from_slice(&light.kind.raw().to_le_bytes());
            for v in light.color.iter().chain(light.position.iter()) {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.extend_from_slice(&light.falloff_start.to_le_bytes());
            out.extend_from_slice(&light.falloff_end.to_le_bytes());
        }
        out
    }
}

// ============ Screen Effects ============

/// Masked screen region drawn at depth `z`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenEffect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub z: u16,
    /// `width * height` mask values, row-major
    pub mask: Vec<u8>,
}

impl ScreenEffect {
    pub fn mask_at(&self, x: u16, y: u16) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.mask
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }
}

/// Screen effects of the current frame
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScreenEffects {
    pub effects: Vec<ScreenEffect>,
}

impl ScreenEffects {
    /// Apply an `AESC` payload, replacing the previous set
    pub fn update(&mut self, payload: &[u8]) -> VqaResult<()> {
        let mut src = reader(payload, "AESC");
        let count = src.u32()?;
        let mut effects = Vec::with_capacity((count as usize).min(src.remaining() / 10));

        for _ in 0..count {
            let x = src.u16()?;
            let y = src.u16()?;
            let width = src.u16()?;
            let height = src.u16()?;
            let z = src.u16()?;
            let mask = src.bytes(width as usize * height as usize)?.to_vec();
            effects.push(ScreenEffect {
                x,
                y,
                width,
                height,
                z,
                mask,
            });
        }

        self.effects = effects;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut out = (self.effects.len() as u32).to_le_bytes().to_vec();
        for e in &self.effects {
            for v in [e.x, e.y, e.width, e.height, e.z] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.extend_from_slice(&e.mask);
        }
        out
    }
}
