//! Synthetic core producing a moving test pattern and a square-wave tone

use super::{EmulationCore, FrameIo};
use crate::audio::ChannelLayout;
use crate::video::{Rgb565, SOURCE_HEIGHT, SOURCE_WIDTH};

/// Emulated frames per second
pub const PATTERN_FPS: u32 = 60;

const TILE: usize = 8;
const AMPLITUDE: i16 = 4000;
const SEED: u32 = 0x1234_5678;

/// Stand-in for a real emulation core
///
/// Every frame it emits one second's share of audio split into chunks of
/// pseudo-random length, then one scrolling checkerboard frame.
pub struct PatternCore {
    sample_rate: u32,
    layout: ChannelLayout,
    tone_hz: u32,
    frame: u64,
    /// Audio frames generated so far
    tone_position: u64,
    /// Carried fraction of an audio frame, in 1/PATTERN_FPS units
    frame_remainder: u32,
    rng: u32,
    pixels: Vec<u16>,
    samples: Vec<i16>,
}

impl PatternCore {
    pub fn new(sample_rate: u32, layout: ChannelLayout, tone_hz: u32) -> Self {
        Self {
            sample_rate,
            layout,
            tone_hz: tone_hz.max(1),
            frame: 0,
            tone_position: 0,
            frame_remainder: 0,
            rng: SEED,
            pixels: vec![0; SOURCE_WIDTH * SOURCE_HEIGHT],
            samples: Vec::new(),
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    fn next_random(&mut self) -> u32 {
        self.rng = self.rng.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        self.rng >> 16
    }

    /// Audio frames due this video frame, keeping the long-run rate exact
    fn frames_due(&mut self) -> usize {
        let total = self.sample_rate + self.frame_remainder;
        self.frame_remainder = total % PATTERN_FPS;
        (total / PATTERN_FPS) as usize
    }

    fn tone_sample(&self, position: u64) -> i16 {
        let half_period = (self.sample_rate / (2 * self.tone_hz)).max(1) as u64;
        if (position / half_period) % 2 == 0 {
            AMPLITUDE
        } else {
            -AMPLITUDE
        }
    }

    fn render(&mut self) {
        let shift = self.frame as usize;
        let light = Rgb565 { r: 28, g: 56, b: 20 }.pack();
        let dark = Rgb565 { r: 4, g: 12, b: 10 }.pack();

        for (y, row) in self.pixels.chunks_exact_mut(SOURCE_WIDTH).enumerate() {
            for (x, pixel) in row.iter_mut().enumerate() {
                let tile = ((x + shift) / TILE + y / TILE) % 2;
                *pixel = if tile == 0 { light } else { dark };
            }
        }
    }
}

impl EmulationCore for PatternCore {
    fn cycle_frame(&mut self, io: &mut FrameIo<'_>) {
        let channels = self.layout.channels() as usize;
        let mut remaining = self.frames_due();

        while remaining > 0 {
            let chunk = (1 + self.next_random() as usize % 1024).min(remaining);
            self.samples.clear();
            for i in 0..chunk as u64 {
                let value = self.tone_sample(self.tone_position + i);
                self.samples.extend(std::iter::repeat(value).take(channels));
            }
            self.tone_position += chunk as u64;
            remaining -= chunk;
            io.push_audio(&self.samples);
        }

        self.render();
        io.present_video(&self.pixels, SOURCE_WIDTH, SOURCE_HEIGHT);
        self.frame += 1;
    }

    fn reset(&mut self) {
        self.frame = 0;
        self.tone_position = 0;
        self.frame_remainder = 0;
        self.rng = SEED;
    }

    fn frame_size(&self) -> (usize, usize) {
        (SOURCE_WIDTH, SOURCE_HEIGHT)
    }

    fn name(&self) -> &str {
        "pattern"
    }
}
