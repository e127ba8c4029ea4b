//! Places one decoded source frame into the host framebuffer

use super::color::{encode, Rgb565};
use super::framebuffer::{FrameGuard, Framebuffer, Surface};
use super::geometry::Placement;
use super::{ClearPolicy, ScaleMode, TargetFormat, VideoConfig};
use crate::error::{EmuoutError, Result};
use tracing::trace;

/// One emulated frame of packed 5/6/5 pixels, borrowed for the duration of a callback
#[derive(Debug, Clone, Copy)]
pub struct SourceImage<'a> {
    pub pixels: &'a [u16],
    pub width: usize,
    pub height: usize,
}

impl<'a> SourceImage<'a> {
    pub fn new(pixels: &'a [u16], width: usize, height: usize) -> Self {
        Self {
            pixels,
            width,
            height,
        }
    }

    fn validate(&self) -> Result<()> {
        let expected = self.width.checked_mul(self.height);
        if self.width == 0 || self.height == 0 || expected != Some(self.pixels.len()) {
            return Err(EmuoutError::SourceSizeMismatch {
                width: self.width,
                height: self.height,
                actual: self.pixels.len(),
            });
        }
        Ok(())
    }

    fn row(&self, y: usize) -> &'a [u16] {
        &self.pixels[y * self.width..(y + 1) * self.width]
    }
}

/// Writes source frames into a framebuffer by positioned copy or resampling
#[derive(Debug, Clone)]
pub struct FrameCompositor {
    mode: ScaleMode,
    clear: ClearPolicy,
    frames: u64,
}

impl FrameCompositor {
    pub fn new(mode: ScaleMode, clear: ClearPolicy) -> Self {
        Self {
            mode,
            clear,
            frames: 0,
        }
    }

    pub fn from_config(config: &VideoConfig) -> Self {
        Self::new(config.mode, config.clear)
    }

    pub fn mode(&self) -> ScaleMode {
        self.mode
    }

    /// Frames written successfully
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Size of the written region for a source of the given size
    ///
    /// `None` when the replication factor overflows the size.
    pub fn output_size(&self, src_width: usize, src_height: usize) -> Option<(usize, usize)> {
        match self.mode {
            ScaleMode::Positioned { factor } => {
                let factor = factor.max(1);
                Some((src_width.checked_mul(factor)?, src_height.checked_mul(factor)?))
            }
            ScaleMode::Bilinear { width, height } | ScaleMode::Nearest { width, height } => {
                Some((width, height))
            }
        }
    }

    /// Where a source of the given size lands in a `stride × height` target
    pub fn plan(&self, src_width: usize, src_height: usize, stride: usize, height: usize) -> Result<Placement> {
        let (width, out_height) = self.output_size(src_width, src_height).ok_or_else(|| {
            EmuoutError::InvalidConfig(format!(
                "{} of a {}x{} source overflows the frame size",
                self.mode, src_width, src_height
            ))
        })?;
        Placement::centered(width, out_height, stride, height)
    }

    /// Write one frame
    ///
    /// The framebuffer is always released, also when the geometry is rejected;
    /// nothing is written in that case.
    pub fn composite<F: Framebuffer + ?Sized>(&mut self, framebuffer: &mut F, source: &SourceImage<'_>) -> Result<()> {
        let mut guard = FrameGuard::begin(framebuffer)?;
        let mut surface = guard.surface();

        source.validate()?;
        let placement = self.plan(source.width, source.height, surface.stride, surface.height)?;

        // Host buffer must hold every row it claims to have
        let pitch = surface.pitch();
        if pitch.checked_mul(surface.height).map_or(true, |len| surface.pixels.len() < len) {
            return Err(EmuoutError::GeometryTooSmall {
                required_width: placement.width,
                required_height: surface.height,
                stride: surface.stride,
                height: surface.pixels.len() / pitch.max(1),
            });
        }

        let clear = match self.clear {
            ClearPolicy::Always => true,
            ClearPolicy::WhenNarrower => placement.width < surface.stride,
            ClearPolicy::Never => false,
        };
        if clear {
            surface.clear();
        }

        match self.mode {
            ScaleMode::Positioned { factor } => {
                copy_positioned(source, &mut surface, placement, factor.max(1))
            }
            ScaleMode::Bilinear { .. } => resample_bilinear(source, &mut surface, placement),
            ScaleMode::Nearest { .. } => resample_nearest(source, &mut surface, placement),
        }

        self.frames += 1;
        trace!("Composited frame {} at x={}", self.frames, placement.x);
        Ok(())
    }
}

fn copy_positioned(source: &SourceImage<'_>, surface: &mut Surface<'_>, placement: Placement, factor: usize) {
    let format = surface.format;
    let bpp = format.bytes_per_pixel();
    let start = placement.x * bpp;
    let end = start + placement.width * bpp;

    for y in 0..source.height {
        let src_row = source.row(y);
        for rep in 0..factor {
            let dst = &mut surface.row_mut(y * factor + rep)[start..end];
            if factor == 1 && format == TargetFormat::Rgb565 {
                dst.copy_from_slice(bytemuck::cast_slice(src_row));
                continue;
            }
            for (block, &pixel) in dst.chunks_exact_mut(bpp * factor).zip(src_row) {
                for out in block.chunks_exact_mut(bpp) {
                    encode(format, pixel, out);
                }
            }
        }
    }
}

/// Source index and 8-bit fraction for one destination coordinate
///
/// The position is `(src_dim - 1) * dst / dst_dim` in 16.16 fixed point.
fn bilinear_coord(dst: usize, src_dim: usize, dst_dim: usize) -> (usize, usize, u32) {
    let pos = ((src_dim - 1) as u64 * dst as u64 * 65536) / dst_dim as u64;
    let index = (pos >> 16) as usize;
    let frac = ((pos >> 8) & 0xFF) as u32;
    (index, (index + 1).min(src_dim - 1), frac)
}

/// Weighted mix of four neighbours; the weights always sum to 65536
fn blend(a: u16, b: u16, c: u16, d: u16, dx: u32, dy: u32) -> u16 {
    let wa = (256 - dx) * (256 - dy);
    let wb = dx * (256 - dy);
    let wc = (256 - dx) * dy;
    let wd = dx * dy;
    let (a, b, c, d) = (
        Rgb565::unpack(a),
        Rgb565::unpack(b),
        Rgb565::unpack(c),
        Rgb565::unpack(d),
    );
    let mix = |pa: u8, pb: u8, pc: u8, pd: u8| {
        ((pa as u32 * wa + pb as u32 * wb + pc as u32 * wc + pd as u32 * wd) >> 16) as u8
    };
    Rgb565 {
        r: mix(a.r, b.r, c.r, d.r),
        g: mix(a.g, b.g, c.g, d.g),
        b: mix(a.b, b.b, c.b, d.b),
    }
    .pack()
}

fn resample_bilinear(source: &SourceImage<'_>, surface: &mut Surface<'_>, placement: Placement) {
    let format = surface.format;
    let bpp = format.bytes_per_pixel();
    let columns: Vec<(usize, usize, u32)> = (0..placement.width)
        .map(|x| bilinear_coord(x, source.width, placement.width))
        .collect();

    for y in 0..placement.height {
        let (top, bottom, dy) = bilinear_coord(y, source.height, placement.height);
        let (top, bottom) = (source.row(top), source.row(bottom));
        let row = surface.row_mut(y);

        for (x, &(left, right, dx)) in columns.iter().enumerate() {
            let pixel = blend(top[left], top[right], bottom[left], bottom[right], dx, dy);
            let start = (placement.x + x) * bpp;
            encode(format, pixel, &mut row[start..start + bpp]);
        }
    }
}

/// `round(dst * src_dim / dst_dim)`, clamped to the last source index
fn nearest_index(dst: usize, src_dim: usize, dst_dim: usize) -> usize {
    ((dst * src_dim * 2 + dst_dim) / (dst_dim * 2)).min(src_dim - 1)
}

fn resample_nearest(source: &SourceImage<'_>, surface: &mut Surface<'_>, placement: Placement) {
    let format = surface.format;
    let bpp = format.bytes_per_pixel();
    let columns: Vec<usize> = (0..placement.width)
        .map(|x| nearest_index(x, source.width, placement.width))
        .collect();

    for y in 0..placement.height {
        let src_row = source.row(nearest_index(y, source.height, placement.height));
        let row = surface.row_mut(y);
        for (x, &column) in columns.iter().enumerate() {
            let start = (placement.x + x) * bpp;
            encode(format, src_row[column], &mut row[start..start + bpp]);
        }
    }
}
