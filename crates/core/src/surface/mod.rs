//! CPU raster targets and the small amount of pixel math the compositor
//! needs: fit-to-surface blitting and opacity-weighted "over" compositing.
//!
//! Surfaces store premultiplied RGBA8. Decoded media ([`RasterImage`]) is
//! straight RGBA8 and is premultiplied when drawn.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CompositorError, Result};

/// Upper bound on a single surface allocation, in pixels.
pub const MAX_SURFACE_PIXELS: u64 = 8192 * 8192;

pub type Rgba8 = [u8; 4];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceSize {
    pub width: u32,
    pub height: u32,
}

impl SurfaceSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    /// Fails with `ResourceExhausted` when a surface of this size cannot be
    /// allocated.
    pub fn ensure_allocatable(&self) -> Result<()> {
        if self.is_empty() {
            return Err(CompositorError::ResourceExhausted(format!(
                "cannot allocate an empty {}x{} surface",
                self.width, self.height
            )));
        }
        if self.pixel_count() > MAX_SURFACE_PIXELS {
            return Err(CompositorError::ResourceExhausted(format!(
                "{}x{} exceeds the surface limit",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Decoded, straight-alpha RGBA8 image.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterImage {
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|px| px.checked_mul(4))
            .ok_or_else(|| CompositorError::decode("image size overflow"))?;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(CompositorError::decode(format!(
                "expected {expected} bytes for a {width}x{height} image, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn solid(width: u32, height: u32, color: Rgba8) -> Result<Self> {
        let pixels = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self::from_rgba(width, height, pixels)
    }

    pub fn size(&self) -> SurfaceSize {
        SurfaceSize::new(self.width, self.height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn texel(&self, x: u32, y: u32) -> Rgba8 {
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Premultiplied RGBA8 render target owned by exactly one backend slot.
#[derive(Clone, PartialEq, Eq)]
pub struct Surface {
    size: SurfaceSize,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(size: SurfaceSize) -> Result<Self> {
        size.ensure_allocatable()?;
        let len = size.pixel_count() as usize * 4;
        Ok(Self {
            size,
            pixels: vec![0; len],
        })
    }

    pub fn size(&self) -> SurfaceSize {
        self.size
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba8> {
        if x >= self.size.width || y >= self.size.height {
            return None;
        }
        let idx = self.index(x, y);
        Some([
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ])
    }

    pub fn clear(&mut self, color: Rgba8) {
        for px in self.pixels.chunks_exact_mut(4) {
            px.copy_from_slice(&color);
        }
    }

    /// Shades every pixel from normalised coordinates in `[0, 1)`.
    pub fn shade(&mut self, mut f: impl FnMut(f32, f32) -> Rgba8) {
        let w = self.size.width as f32;
        let h = self.size.height as f32;
        for (i, px) in self.pixels.chunks_exact_mut(4).enumerate() {
            let x = (i % self.size.width as usize) as f32;
            let y = (i / self.size.width as usize) as f32;
            px.copy_from_slice(&f(x / w, y / h));
        }
    }

    /// Draws `image` scaled to fit inside the surface while keeping its aspect
    /// ratio; uncovered areas become transparent.
    pub fn draw_contain(&mut self, image: &RasterImage) {
        self.clear([0, 0, 0, 0]);
        let (sw, sh) = (self.size.width as f32, self.size.height as f32);
        let (iw, ih) = (image.width as f32, image.height as f32);
        let scale = (sw / iw).min(sh / ih);
        let dw = (iw * scale).round().max(1.0) as u32;
        let dh = (ih * scale).round().max(1.0) as u32;
        let ox = (self.size.width.saturating_sub(dw)) / 2;
        let oy = (self.size.height.saturating_sub(dh)) / 2;

        for dy in 0..dh.min(self.size.height) {
            let sy = ((dy as f32 + 0.5) / scale) as u32;
            for dx in 0..dw.min(self.size.width) {
                let sx = ((dx as f32 + 0.5) / scale) as u32;
                let texel = image.texel(sx.min(image.width - 1), sy.min(image.height - 1));
                let idx = self.index(ox + dx, oy + dy);
                self.pixels[idx..idx + 4].copy_from_slice(&premultiply(texel));
            }
        }
    }

    /// Composites `src` over this surface at the given opacity. Both surfaces
    /// must share a size.
    pub fn composite_over(&mut self, src: &Surface, opacity: f32) -> Result<()> {
        if src.size != self.size {
            return Err(CompositorError::invalid(format!(
                "cannot composite {}x{} onto {}x{}",
                src.size.width, src.size.height, self.size.width, self.size.height
            )));
        }
        for (d, s) in self.pixels.chunks_exact_mut(4).zip(src.pixels.chunks_exact(4)) {
            let out = over([d[0], d[1], d[2], d[3]], [s[0], s[1], s[2], s[3]], opacity);
            d.copy_from_slice(&out);
        }
        Ok(())
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let image =
            image::RgbaImage::from_raw(self.size.width, self.size.height, self.pixels.clone())
                .ok_or_else(|| CompositorError::msg("surface buffer does not match its size"))?;
        image.save(path.as_ref())?;
        Ok(())
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.size.width as usize + x as usize) * 4
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface").field("size", &self.size).finish()
    }
}

/// Premultiplied source-over with an extra opacity factor.
pub fn over(dst: Rgba8, src: Rgba8, opacity: f32) -> Rgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = (opacity * 255.0).round() as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    let inv = 255 - sa;

    let mut out = [0u8; 4];
    out[3] = add_sat(sa, mul_div255(u16::from(dst[3]), inv));
    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat(sc, dc);
    }
    out
}

/// Linear blend between two premultiplied colours, `t = 0` yields `a`.
pub fn mix(a: Rgba8, b: Rgba8, t: f32) -> Rgba8 {
    let t = t.clamp(0.0, 1.0);
    let tt = (t * 255.0).round() as u16;
    let it = 255 - tt;
    let mut out = [0u8; 4];
    for i in 0..4 {
        out[i] = add_sat(mul_div255(u16::from(a[i]), it), mul_div255(u16::from(b[i]), tt));
    }
    out
}

pub fn premultiply(px: Rgba8) -> Rgba8 {
    let a = u16::from(px[3]);
    [
        mul_div255(u16::from(px[0]), a) as u8,
        mul_div255(u16::from(px[1]), a) as u8,
        mul_div255(u16::from(px[2]), a) as u8,
        px[3],
    ]
}

/// Converts a unit-range colour channel to a byte.
pub fn unit_to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn mul_div255(a: u16, b: u16) -> u16 {
    let v = u32::from(a) * u32::from(b) + 128;
    ((v + (v >> 8)) >> 8) as u16
}

fn add_sat(a: u16, b: u16) -> u8 {
    (a + b).min(255) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unallocatable_surfaces() {
        let err = Surface::new(SurfaceSize::new(0, 10)).unwrap_err();
        assert!(matches!(err, CompositorError::ResourceExhausted(_)));

        let err = Surface::new(SurfaceSize::new(100_000, 100_000)).unwrap_err();
        assert!(matches!(err, CompositorError::ResourceExhausted(_)));
    }

    #[test]
    fn contain_letterboxes_wide_images() {
        let image = RasterImage::solid(4, 1, [255, 0, 0, 255]).unwrap();
        let mut surface = Surface::new(SurfaceSize::new(8, 8)).unwrap();
        surface.draw_contain(&image);

        assert_eq!(surface.pixel(0, 0), Some([0, 0, 0, 0]));
        assert_eq!(surface.pixel(4, 4), Some([255, 0, 0, 255]));
        assert_eq!(surface.pixel(4, 7), Some([0, 0, 0, 0]));
    }

    #[test]
    fn over_respects_opacity() {
        let black = [0, 0, 0, 255];
        let white = [255, 255, 255, 255];

        assert_eq!(over(black, white, 1.0), white);
        assert_eq!(over(black, white, 0.0), black);
        let half = over(black, white, 0.5);
        assert_eq!(half[3], 255);
        assert!((127..=129).contains(&half[0]));
    }

    #[test]
    fn composite_requires_matching_sizes() {
        let mut dst = Surface::new(SurfaceSize::new(2, 2)).unwrap();
        let src = Surface::new(SurfaceSize::new(3, 2)).unwrap();
        assert!(dst.composite_over(&src, 1.0).is_err());
    }

    #[test]
    fn mix_endpoints_are_exact() {
        let a = [10, 20, 30, 255];
        let b = [200, 100, 0, 255];
        assert_eq!(mix(a, b, 0.0), a);
        assert_eq!(mix(a, b, 1.0), b);
    }
}
