//! Placement of the composited image inside a strided target

use crate::error::{EmuoutError, Result};

/// Horizontal offset that centres `width` pixels in a row of `stride` pixels
pub fn center_offset(stride: usize, width: usize) -> usize {
    stride.saturating_sub(width) / 2
}

/// Framebuffer width that keeps the source aspect when the host stretches the
/// framebuffer to fill the window height
///
/// A 160x144 source in a 1280x720 window gives 256.
pub fn fit_frame_width(window_width: usize, window_height: usize, src_width: usize, src_height: usize) -> usize {
    if window_height == 0 || src_width == 0 {
        return src_width;
    }
    (window_width.saturating_mul(src_height) / window_height).max(src_width)
}

/// Region of the target one frame writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// First written column
    pub x: usize,
    pub width: usize,
    pub height: usize,
}

impl Placement {
    /// Centre a `width × height` image in a target, failing if it does not fit
    pub fn centered(width: usize, height: usize, stride: usize, target_height: usize) -> Result<Self> {
        if width == 0 || height == 0 || width > stride || height > target_height {
            return Err(EmuoutError::GeometryTooSmall {
                required_width: width,
                required_height: height,
                stride,
                height: target_height,
            });
        }
        Ok(Self {
            x: center_offset(stride, width),
            width,
            height,
        })
    }
}
