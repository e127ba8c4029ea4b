//! Host framebuffer seam and an in-memory double-buffered implementation

use super::color::decode;
use super::TargetFormat;
use crate::error::{EmuoutError, Result};
use tracing::{debug, warn};

/// Writable view of the buffer a frame is composited into
pub struct Surface<'a> {
    pub pixels: &'a mut [u8],
    /// Row length in pixels
    pub stride: usize,
    /// Logical width in pixels
    pub width: usize,
    pub height: usize,
    pub format: TargetFormat,
}

impl Surface<'_> {
    /// Row length in bytes
    pub fn pitch(&self) -> usize {
        self.stride.saturating_mul(self.format.bytes_per_pixel())
    }

    /// Bytes of one row, `pitch()` long
    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let pitch = self.pitch();
        &mut self.pixels[y * pitch..(y + 1) * pitch]
    }

    /// Zero-fill every row
    pub fn clear(&mut self) {
        let len = self.pitch() * self.height;
        self.pixels[..len].fill(0);
    }
}

/// Host-owned framebuffer
///
/// Every `begin` must be matched by an `end`; use [`FrameGuard`] rather than
/// calling them directly.
pub trait Framebuffer {
    /// Acquire the back buffer for writing
    fn begin(&mut self) -> Result<()>;

    /// The buffer acquired by `begin`
    fn surface(&mut self) -> Surface<'_>;

    /// Release the back buffer for presentation
    fn end(&mut self);

    /// Row length in pixels
    fn stride(&self) -> usize;

    /// Rows per buffer
    fn height(&self) -> usize;
}

/// Scoped frame acquisition; `end` runs on drop, including early error returns
pub struct FrameGuard<'a, F: Framebuffer + ?Sized> {
    framebuffer: &'a mut F,
}

impl<'a, F: Framebuffer + ?Sized> FrameGuard<'a, F> {
    pub fn begin(framebuffer: &'a mut F) -> Result<Self> {
        framebuffer.begin()?;
        Ok(Self { framebuffer })
    }

    pub fn surface(&mut self) -> Surface<'_> {
        self.framebuffer.surface()
    }
}

impl<F: Framebuffer + ?Sized> Drop for FrameGuard<'_, F> {
    fn drop(&mut self) {
        self.framebuffer.end();
    }
}

/// Two in-memory buffers swapped on every `end`
pub struct MemoryFramebuffer {
    width: usize,
    height: usize,
    stride: usize,
    format: TargetFormat,
    buffers: [Vec<u8>; 2],
    back: usize,
    in_frame: bool,
    presented: u64,
}

impl MemoryFramebuffer {
    pub fn new(width: usize, height: usize, stride: usize, format: TargetFormat) -> Result<Self> {
        if width == 0 || height == 0 || stride < width {
            return Err(EmuoutError::InvalidConfig(format!(
                "framebuffer {}x{} with stride {} is not valid",
                width, height, stride
            )));
        }

        let len = stride
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(format.bytes_per_pixel()))
            .ok_or_else(|| {
                EmuoutError::InvalidConfig(format!(
                    "framebuffer stride {} by {} rows overflows the buffer size",
                    stride, height
                ))
            })?;
        debug!(
            "Framebuffer {}x{} stride {} ({}), {} bytes per buffer",
            width, height, stride, format, len
        );
        Ok(Self {
            width,
            height,
            stride,
            format,
            buffers: [vec![0; len], vec![0; len]],
            back: 0,
            in_frame: false,
            presented: 0,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn format(&self) -> TargetFormat {
        self.format
    }

    /// Frames handed over for presentation
    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Bytes of the most recently presented frame
    pub fn front(&self) -> &[u8] {
        &self.buffers[self.back ^ 1]
    }

    /// Raw pixel value at `(x, y)` of the presented frame; `x` may be up to the stride
    pub fn front_pixel(&self, x: usize, y: usize) -> Option<u32> {
        if x >= self.stride || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let start = (y * self.stride + x) * bpp;
        Some(decode(self.format, &self.front()[start..start + bpp]))
    }
}

impl Framebuffer for MemoryFramebuffer {
    fn begin(&mut self) -> Result<()> {
        if self.in_frame {
            warn!("Framebuffer begin without matching end");
        }
        self.in_frame = true;
        Ok(())
    }

    fn surface(&mut self) -> Surface<'_> {
        Surface {
            pixels: &mut self.buffers[self.back],
            stride: self.stride,
            width: self.width,
            height: self.height,
            format: self.format,
        }
    }

    fn end(&mut self) {
        if !self.in_frame {
            return;
        }
        self.in_frame = false;
        self.back ^= 1;
        self.presented += 1;
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn height(&self) -> usize {
        self.height
    }
}
