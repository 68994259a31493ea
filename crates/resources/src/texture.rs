//! RGBA8 pixel buffers.
//!
//! Texture data arrives already decoded. The only metadata the renderer
//! needs is the size and whether the bytes are sRGB-encoded color or
//! linear data such as normals and metallic-roughness.

use glam::Vec3;
use penumbra_rhi::vk;

use crate::error::{ResourceError, ResourceResult};

/// How the 8-bit channels are encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorEncoding {
    /// Perceptual color, decoded to linear when sampled.
    Srgb,
    /// Raw data, sampled as-is.
    Linear,
}

impl ColorEncoding {
    pub fn format(self) -> vk::Format {
        match self {
            ColorEncoding::Srgb => vk::Format::R8G8B8A8_SRGB,
            ColorEncoding::Linear => vk::Format::R8G8B8A8_UNORM,
        }
    }
}

/// Tightly packed 4-channel 8-bit image.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureData {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    encoding: ColorEncoding,
}

impl TextureData {
    /// # Errors
    ///
    /// Returns [`ResourceError::InvalidTexture`] when `pixels` is not
    /// exactly `width * height * 4` bytes or either dimension is zero.
    pub fn new(
        width: u32,
        height: u32,
        pixels: Vec<u8>,
        encoding: ColorEncoding,
    ) -> ResourceResult<Self> {
        let expected = width as usize * height as usize * 4;
        if expected == 0 || pixels.len() != expected {
            return Err(ResourceError::InvalidTexture {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
            encoding,
        })
    }

    /// 1x1 texture of a single color.
    pub fn solid(rgba: [u8; 4], encoding: ColorEncoding) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: rgba.to_vec(),
            encoding,
        }
    }

    /// Flat tangent-space normal pointing straight out of the surface.
    pub fn flat_normal() -> Self {
        Self::solid([128, 128, 255, 255], ColorEncoding::Linear)
    }

    /// Checkerboard of `cells` x `cells` squares.
    pub fn checker(size: u32, cells: u32, a: [u8; 4], b: [u8; 4], encoding: ColorEncoding) -> Self {
        let size = size.max(1);
        let cell = (size / cells.max(1)).max(1);
        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| ((x / cell) + (y / cell)) % 2 == 0))
            .flat_map(|even| if even { a } else { b })
            .collect();
        Self {
            width: size,
            height: size,
            pixels,
            encoding,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn encoding(&self) -> ColorEncoding {
        self.encoding
    }

    pub fn format(&self) -> vk::Format {
        self.encoding.format()
    }
}

/// Six square faces in +X, -X, +Y, -Y, +Z, -Z order.
#[derive(Clone, Debug, PartialEq)]
pub struct CubeFaces {
    size: u32,
    pixels: Vec<u8>,
}

impl CubeFaces {
    /// # Errors
    ///
    /// Returns an error unless all faces are square, equally sized and sRGB.
    pub fn new(faces: [TextureData; 6]) -> ResourceResult<Self> {
        let size = faces[0].width;
        if let Some(face) = faces
            .iter()
            .find(|f| f.width != size || f.height != size || f.encoding != ColorEncoding::Srgb)
        {
            return Err(ResourceError::InvalidTexture {
                width: face.width,
                height: face.height,
                expected: size as usize * size as usize * 4,
                actual: face.pixels.len(),
            });
        }
        let pixels = faces.iter().flat_map(|f| f.pixels.iter().copied()).collect();
        Ok(Self { size, pixels })
    }

    /// Procedural sky: `zenith` overhead fading to `horizon`, `ground` below.
    pub fn gradient_sky(size: u32, zenith: Vec3, horizon: Vec3, ground: Vec3) -> Self {
        let size = size.max(1);
        let mut pixels = Vec::with_capacity(size as usize * size as usize * 4 * 6);
        for face in 0..6 {
            for y in 0..size {
                for x in 0..size {
                    let u = (x as f32 + 0.5) / size as f32 * 2.0 - 1.0;
                    let v = (y as f32 + 0.5) / size as f32 * 2.0 - 1.0;
                    let up = cube_direction(face, u, v).normalize().y;
                    let color = if up >= 0.0 {
                        horizon.lerp(zenith, up.powf(0.5))
                    } else {
                        horizon.lerp(ground, (-up).powf(0.35))
                    };
                    pixels.extend(encode_srgb(color));
                }
            }
        }
        Self { size, pixels }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// All six faces back to back.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// Direction through texel `(u, v)` in `[-1, 1]` of cube face `face`.
pub fn cube_direction(face: u32, u: f32, v: f32) -> Vec3 {
    match face {
        0 => Vec3::new(1.0, -v, -u),
        1 => Vec3::new(-1.0, -v, u),
        2 => Vec3::new(u, 1.0, v),
        3 => Vec3::new(u, -1.0, -v),
        4 => Vec3::new(u, -v, 1.0),
        _ => Vec3::new(-u, -v, -1.0),
    }
}

fn encode_srgb(linear: Vec3) -> [u8; 4] {
    let encode = |c: f32| {
        let c = c.clamp(0.0, 1.0);
        let s = if c <= 0.003_130_8 {
            c * 12.92
        } else {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        };
        (s * 255.0 + 0.5) as u8
    };
    [encode(linear.x), encode(linear.y), encode(linear.z), 255]
}
