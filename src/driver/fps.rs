//! Frame rate accounting and pacing

use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

const WINDOW: Duration = Duration::from_secs(1);

/// Counts frames and publishes the rate once per second
pub struct FpsCounter {
    window_start: Instant,
    frames: u32,
    last_fps: Option<u32>,
    total_frames: u64,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            window_start: now,
            frames: 0,
            last_fps: None,
            total_frames: 0,
        }
    }

    pub fn tick(&mut self) -> Option<u32> {
        self.tick_at(Instant::now())
    }

    /// Count one frame; returns the rate when a one-second window closes
    pub fn tick_at(&mut self, now: Instant) -> Option<u32> {
        self.frames += 1;
        self.total_frames += 1;

        if now.duration_since(self.window_start) < WINDOW {
            return None;
        }

        let fps = self.frames;
        self.frames = 0;
        self.window_start = now;
        self.last_fps = Some(fps);
        info!("FPS: {}", fps);
        Some(fps)
    }

    /// Start a fresh window, e.g. after a pause
    pub fn restart_at(&mut self, now: Instant) {
        self.window_start = now;
        self.frames = 0;
    }

    pub fn last_fps(&self) -> Option<u32> {
        self.last_fps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Sleeps between frames to hold a target rate
pub struct FrameLimiter {
    frame_time: Duration,
    next: Option<Instant>,
}

impl FrameLimiter {
    /// `None` for a zero rate
    pub fn new(fps: u32) -> Option<Self> {
        if fps == 0 {
            return None;
        }
        Some(Self {
            frame_time: Duration::from_nanos(1_000_000_000 / fps as u64),
            next: None,
        })
    }

    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// How long to sleep before the next frame may start
    ///
    /// Falling more than a frame behind resynchronizes instead of bursting.
    pub fn delay_at(&mut self, now: Instant) -> Duration {
        let target = self.next.unwrap_or(now);
        if target > now {
            self.next = Some(target + self.frame_time);
            return target - now;
        }

        let resync = now.duration_since(target) > self.frame_time;
        self.next = Some(if resync { now } else { target } + self.frame_time);
        Duration::ZERO
    }

    pub fn wait(&mut self) {
        let delay = self.delay_at(Instant::now());
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }

    pub fn reset(&mut self) {
        self.next = None;
    }
}
