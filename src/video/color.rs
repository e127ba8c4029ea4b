//! Packed 5/6/5 pixel helpers

use super::TargetFormat;

/// Unpacked channels of a 16-bit 5/6/5 pixel
///
/// Blue occupies bits 0-4, green bits 5-10, red bits 11-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb565 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb565 {
    pub const fn unpack(pixel: u16) -> Self {
        Self {
            b: (pixel & 0x1F) as u8,
            g: ((pixel >> 5) & 0x3F) as u8,
            r: ((pixel >> 11) & 0x1F) as u8,
        }
    }

    /// Out-of-range channel bits are masked off
    pub const fn pack(self) -> u16 {
        (self.b as u16 & 0x1F) | ((self.g as u16 & 0x3F) << 5) | ((self.r as u16 & 0x1F) << 11)
    }
}

/// Expand a 5/6/5 pixel to 0x00RRGGBB, replicating the high bits into the low ones
pub const fn rgb565_to_xrgb8888(pixel: u16) -> u32 {
    let c = Rgb565::unpack(pixel);
    let r = ((c.r << 3) | (c.r >> 2)) as u32;
    let g = ((c.g << 2) | (c.g >> 4)) as u32;
    let b = ((c.b << 3) | (c.b >> 2)) as u32;
    (r << 16) | (g << 8) | b
}

/// Write one 5/6/5 pixel into `out` in the target layout
///
/// `out` must be exactly `format.bytes_per_pixel()` long.
#[inline]
pub fn encode(format: TargetFormat, pixel: u16, out: &mut [u8]) {
    match format {
        TargetFormat::Rgb565 => out.copy_from_slice(&pixel.to_ne_bytes()),
        TargetFormat::Rgb565Be => out.copy_from_slice(&pixel.to_be_bytes()),
        TargetFormat::Xrgb8888 => out.copy_from_slice(&rgb565_to_xrgb8888(pixel).to_ne_bytes()),
    }
}

/// Read back one pixel written by [`encode`], as its raw word value
pub fn decode(format: TargetFormat, bytes: &[u8]) -> u32 {
    match format {
        TargetFormat::Rgb565 => u16::from_ne_bytes([bytes[0], bytes[1]]) as u32,
        TargetFormat::Rgb565Be => u16::from_be_bytes([bytes[0], bytes[1]]) as u32,
        TargetFormat::Xrgb8888 => u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    }
}
