//! Frame compositing from the emulated screen into host framebuffers

mod color;
mod compositor;
mod framebuffer;
mod geometry;

pub use color::{encode, rgb565_to_xrgb8888, Rgb565};
pub use compositor::{FrameCompositor, SourceImage};
pub use framebuffer::{FrameGuard, Framebuffer, MemoryFramebuffer, Surface};
pub use geometry::{center_offset, fit_frame_width, Placement};

use serde::{Deserialize, Serialize};

/// Width of the emulated screen
pub const SOURCE_WIDTH: usize = 160;

/// Height of the emulated screen
pub const SOURCE_HEIGHT: usize = 144;

/// Pixel layout of the host framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetFormat {
    /// Packed 5/6/5 in native-endian 16-bit words
    #[default]
    Rgb565,
    /// Packed 5/6/5, high byte first
    Rgb565Be,
    /// 32-bit words, channels expanded to 8 bits
    Xrgb8888,
}

impl TargetFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TargetFormat::Rgb565 | TargetFormat::Rgb565Be => 2,
            TargetFormat::Xrgb8888 => 4,
        }
    }
}

impl std::fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TargetFormat::Rgb565 => "rgb565",
            TargetFormat::Rgb565Be => "rgb565-be",
            TargetFormat::Xrgb8888 => "xrgb8888",
        };
        f.write_str(name)
    }
}

/// How the source image is mapped onto the framebuffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    /// Verbatim copy, each pixel replicated into a `factor × factor` block
    Positioned { factor: usize },
    /// Bilinear resample to the given size
    Bilinear { width: usize, height: usize },
    /// Nearest-neighbour resample to the given size
    Nearest { width: usize, height: usize },
}

impl Default for ScaleMode {
    fn default() -> Self {
        ScaleMode::Positioned { factor: 1 }
    }
}

impl std::fmt::Display for ScaleMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScaleMode::Positioned { factor } => write!(f, "positioned x{}", factor),
            ScaleMode::Bilinear { width, height } => write!(f, "bilinear {}x{}", width, height),
            ScaleMode::Nearest { width, height } => write!(f, "nearest {}x{}", width, height),
        }
    }
}

/// When the target is zero-filled before a frame is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClearPolicy {
    /// Clear the whole target if the written width is less than the stride
    #[default]
    WhenNarrower,
    Always,
    Never,
}

/// Video pipeline configuration, fixed at session start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoConfig {
    /// Framebuffer logical width in pixels
    pub width: usize,
    pub height: usize,
    /// Framebuffer row length in pixels, at least `width`
    pub stride: usize,
    pub format: TargetFormat,
    pub mode: ScaleMode,
    pub clear: ClearPolicy,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            width: SOURCE_WIDTH,
            height: SOURCE_HEIGHT,
            stride: SOURCE_WIDTH,
            format: TargetFormat::Rgb565,
            mode: ScaleMode::default(),
            clear: ClearPolicy::default(),
        }
    }
}
