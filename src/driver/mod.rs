//! Per-frame driver: runs the emulation core and routes its output callbacks

mod fps;
mod pattern;

pub use fps::{FpsCounter, FrameLimiter};
pub use pattern::PatternCore;

use crate::audio::{AudioOutput, AudioRepacketizer, RepacketizerStats};
use crate::error::{EmuoutError, Result};
use crate::video::{FrameCompositor, Framebuffer, SourceImage};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::collections::HashSet;
use std::mem::{self, Discriminant};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Version of the core-to-adapter callback contract
pub const CALLBACK_ABI_VERSION: u32 = 1;

/// How often a paused loop rechecks its command channel
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// An emulation core driven one frame at a time
///
/// During `cycle_frame` the core pushes any number of audio chunks and
/// presents any number of frames through `io`; both calls are synchronous and
/// never fail from the core's point of view.
pub trait EmulationCore {
    fn cycle_frame(&mut self, io: &mut FrameIo<'_>);

    /// Return to power-on state
    fn reset(&mut self);

    /// Source frame size in pixels
    fn frame_size(&self) -> (usize, usize);

    fn abi_version(&self) -> u32 {
        CALLBACK_ABI_VERSION
    }

    fn name(&self) -> &str {
        "core"
    }
}

/// Destination for audio chunks
pub trait AudioSink {
    /// Consume a whole chunk; returns periods handed to the device
    fn push_samples(&mut self, chunk: &[i16]) -> usize;

    fn audio_stats(&self) -> RepacketizerStats;
}

impl<D: AudioOutput> AudioSink for AudioRepacketizer<D> {
    fn push_samples(&mut self, chunk: &[i16]) -> usize {
        self.submit_samples(chunk)
    }

    fn audio_stats(&self) -> RepacketizerStats {
        self.stats()
    }
}

/// Destination for decoded frames
pub trait VideoSink {
    fn present(&mut self, source: &SourceImage<'_>) -> Result<()>;
}

/// Compositor bound to the framebuffer it writes into
pub struct VideoPipeline<F: Framebuffer> {
    compositor: FrameCompositor,
    framebuffer: F,
}

impl<F: Framebuffer> VideoPipeline<F> {
    /// Check that frames of `source_size` fit the framebuffer before any frame is drawn
    pub fn new(compositor: FrameCompositor, framebuffer: F, source_size: (usize, usize)) -> Result<Self> {
        let placement = compositor.plan(
            source_size.0,
            source_size.1,
            framebuffer.stride(),
            framebuffer.height(),
        )?;
        info!(
            "Video pipeline: {}x{} source, {} into {}x{} at x={}",
            source_size.0,
            source_size.1,
            compositor.mode(),
            placement.width,
            placement.height,
            placement.x
        );
        Ok(Self {
            compositor,
            framebuffer,
        })
    }

    pub fn compositor(&self) -> &FrameCompositor {
        &self.compositor
    }

    pub fn framebuffer(&self) -> &F {
        &self.framebuffer
    }
}

impl<F: Framebuffer> VideoSink for VideoPipeline<F> {
    fn present(&mut self, source: &SourceImage<'_>) -> Result<()> {
        self.compositor.composite(&mut self.framebuffer, source)
    }
}

/// Error kinds already logged in this session
pub type ReportedErrors = HashSet<Discriminant<EmuoutError>>;

/// Callback surface handed to the core for one frame
///
/// Failures are logged once per error kind and never returned to the core.
pub struct FrameIo<'a> {
    audio: Option<&'a mut dyn AudioSink>,
    video: Option<&'a mut dyn VideoSink>,
    reported: &'a mut ReportedErrors,
    frames_presented: u64,
    frames_dropped: u64,
    samples_pushed: u64,
}

impl<'a> FrameIo<'a> {
    pub fn new(
        audio: Option<&'a mut dyn AudioSink>,
        video: Option<&'a mut dyn VideoSink>,
        reported: &'a mut ReportedErrors,
    ) -> Self {
        Self {
            audio,
            video,
            reported,
            frames_presented: 0,
            frames_dropped: 0,
            samples_pushed: 0,
        }
    }

    /// Audio callback: interleaved signed 16-bit samples in the negotiated layout
    pub fn push_audio(&mut self, samples: &[i16]) {
        if let Some(audio) = self.audio.as_mut() {
            audio.push_samples(samples);
            self.samples_pushed += samples.len() as u64;
        }
    }

    /// Video callback: one packed 5/6/5 frame
    pub fn present_video(&mut self, pixels: &[u16], width: usize, height: usize) {
        let Some(video) = self.video.as_mut() else {
            return;
        };

        match video.present(&SourceImage::new(pixels, width, height)) {
            Ok(()) => self.frames_presented += 1,
            Err(e) => {
                self.frames_dropped += 1;
                if self.reported.insert(mem::discriminant(&e)) {
                    warn!("Dropping video frame: {}", e);
                }
            }
        }
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.is_some()
    }
}

/// Menu selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Resume,
    Restart,
    Shutdown,
}

/// Control messages for a running driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    Pause,
    Resume,
    /// Stop cycling and wait for a menu choice
    OpenMenu,
    Menu(MenuChoice),
    Shutdown,
}

/// Driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Running,
    Paused,
    Menu,
    ShuttingDown,
}

/// Loop options
#[derive(Debug, Clone, Default)]
pub struct DriverConfig {
    /// Frame limiter rate; `None` runs as fast as the audio device allows
    pub target_fps: Option<u32>,
    /// Stop after this many frames
    pub max_frames: Option<u64>,
}

/// Session totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    pub frames: u64,
    pub frames_presented: u64,
    pub frames_dropped: u64,
    pub samples_pushed: u64,
    pub restarts: u32,
    pub audio: Option<RepacketizerStats>,
}

/// Drives one emulation session
pub struct DriverLoop<C: EmulationCore, F: Framebuffer> {
    core: C,
    audio: Option<Box<dyn AudioSink>>,
    video: Option<VideoPipeline<F>>,
    commands: Receiver<DriverCommand>,
    config: DriverConfig,
    state: DriverState,
    fps: FpsCounter,
    limiter: Option<FrameLimiter>,
    reported: ReportedErrors,
    stats: DriverStats,
}

impl<C: EmulationCore, F: Framebuffer> DriverLoop<C, F> {
    pub fn new(
        core: C,
        video: Option<VideoPipeline<F>>,
        commands: Receiver<DriverCommand>,
        config: DriverConfig,
    ) -> Result<Self> {
        if core.abi_version() != CALLBACK_ABI_VERSION {
            return Err(EmuoutError::InvalidConfig(format!(
                "core {} uses callback ABI {}, expected {}",
                core.name(),
                core.abi_version(),
                CALLBACK_ABI_VERSION
            )));
        }
        if video.is_none() {
            warn!("Video disabled for this session");
        }

        let limiter = config.target_fps.and_then(FrameLimiter::new);
        Ok(Self {
            core,
            audio: None,
            video,
            commands,
            config,
            state: DriverState::Running,
            fps: FpsCounter::new(),
            limiter,
            reported: ReportedErrors::new(),
            stats: DriverStats::default(),
        })
    }

    /// Attach the audio session, or run without audio if it could not be created
    pub fn with_audio<A: AudioSink + 'static>(mut self, audio: Result<A>) -> Self {
        match audio {
            Ok(audio) => self.audio = Some(Box::new(audio)),
            Err(e) => error!("Audio disabled for this session: {}", e),
        }
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio.is_some()
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn video(&self) -> Option<&VideoPipeline<F>> {
        self.video.as_ref()
    }

    /// Run until shut down, then tear the session down
    pub fn run(&mut self) -> DriverStats {
        info!(
            "Driving {} (audio {}, video {})",
            self.core.name(),
            if self.audio.is_some() { "on" } else { "off" },
            if self.video.is_some() { "on" } else { "off" }
        );
        self.fps.restart_at(Instant::now());

        while self.state != DriverState::ShuttingDown {
            self.poll_commands();
            match self.state {
                DriverState::Running => self.step(),
                DriverState::Paused | DriverState::Menu => self.wait_for_command(),
                DriverState::ShuttingDown => {}
            }

            if self
                .config
                .max_frames
                .is_some_and(|max| self.stats.frames >= max)
            {
                debug!("Frame limit reached");
                self.state = DriverState::ShuttingDown;
            }
        }

        self.teardown();
        self.stats
    }

    /// Cycle the core for one frame
    pub fn step(&mut self) {
        let audio = self.audio.as_mut().map(|a| &mut **a as &mut dyn AudioSink);
        let video = self.video.as_mut().map(|v| v as &mut dyn VideoSink);
        let mut io = FrameIo::new(audio, video, &mut self.reported);

        self.core.cycle_frame(&mut io);

        self.stats.frames += 1;
        self.stats.frames_presented += io.frames_presented;
        self.stats.frames_dropped += io.frames_dropped;
        self.stats.samples_pushed += io.samples_pushed;

        self.fps.tick();
        if let Some(limiter) = self.limiter.as_mut() {
            limiter.wait();
        }
    }

    /// Apply one command to the state machine
    pub fn handle_command(&mut self, command: DriverCommand) {
        let previous = self.state;
        self.state = match (self.state, command) {
            (DriverState::ShuttingDown, _) => DriverState::ShuttingDown,
            (_, DriverCommand::Shutdown) => DriverState::ShuttingDown,
            (_, DriverCommand::Pause) => DriverState::Paused,
            (_, DriverCommand::OpenMenu) => DriverState::Menu,
            (_, DriverCommand::Resume) => DriverState::Running,
            (_, DriverCommand::Menu(MenuChoice::Resume)) => DriverState::Running,
            (_, DriverCommand::Menu(MenuChoice::Restart)) => {
                info!("Restarting {}", self.core.name());
                self.core.reset();
                self.stats.restarts += 1;
                DriverState::Running
            }
            (_, DriverCommand::Menu(MenuChoice::Shutdown)) => DriverState::ShuttingDown,
        };

        if previous != self.state {
            debug!("Driver state {:?} -> {:?}", previous, self.state);
            if self.state == DriverState::Running {
                self.fps.restart_at(Instant::now());
                if let Some(limiter) = self.limiter.as_mut() {
                    limiter.reset();
                }
            }
        }
    }

    fn poll_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.handle_command(command),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // Nobody left to resume a paused session
                    if self.state != DriverState::Running {
                        self.state = DriverState::ShuttingDown;
                    }
                    break;
                }
            }
        }
    }

    fn wait_for_command(&mut self) {
        match self.commands.recv_timeout(PAUSE_POLL) {
            Ok(command) => self.handle_command(command),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Command channel closed while {:?}", self.state);
                self.state = DriverState::ShuttingDown;
            }
        }
    }

    /// Stop producing, then release the audio session (device first, staging after)
    fn teardown(&mut self) {
        if let Some(audio) = self.audio.take() {
            self.stats.audio = Some(audio.audio_stats());
            drop(audio);
        }
        info!(
            "Session ended after {} frames ({} presented, {} dropped, {} restarts)",
            self.stats.frames,
            self.stats.frames_presented,
            self.stats.frames_dropped,
            self.stats.restarts
        );
    }
}
