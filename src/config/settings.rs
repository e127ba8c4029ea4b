//! Settings file support

use crate::audio::{AudioConfig, AudioFormat, ChannelLayout, BUFFER_ALIGNMENT, DEFAULT_WAIT_TIMEOUT, PERIODS_PER_SECOND};
use crate::video::{
    fit_frame_width, ClearPolicy, ScaleMode, TargetFormat, VideoConfig, SOURCE_HEIGHT, SOURCE_WIDTH,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Settings loaded from a TOML file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log file path (empty = no file logging)
    pub log_file: String,

    pub audio: AudioSettings,
    pub video: VideoSettings,
    pub driver: DriverSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: String::new(),
            audio: AudioSettings::default(),
            video: VideoSettings::default(),
            driver: DriverSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub enabled: bool,
    pub sample_rate: u32,
    /// Device channel count
    pub channels: u16,
    pub periods_per_second: u32,
    /// Buffer alignment in bytes
    pub alignment: usize,
    /// Buffers in flight before the producer waits
    pub queue_depth: usize,
    /// Release wait bound in milliseconds (0 = wait forever)
    pub wait_timeout_ms: u64,
    /// Layout the core delivers
    pub source_layout: ChannelLayout,
    /// Hold each period for its play time
    pub realtime: bool,
    /// Raw PCM output file (empty = none)
    pub pcm_file: String,
    /// Test tone frequency of the pattern core
    pub tone_hz: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        let format = AudioFormat::default();
        Self {
            enabled: true,
            sample_rate: format.sample_rate,
            channels: format.channels,
            periods_per_second: PERIODS_PER_SECOND,
            alignment: BUFFER_ALIGNMENT,
            queue_depth: 1,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT.as_millis() as u64,
            source_layout: ChannelLayout::Stereo,
            realtime: true,
            pcm_file: String::new(),
            tone_hz: 440,
        }
    }
}

/// Scaling algorithm name as written in the settings file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScaleKind {
    #[default]
    Positioned,
    Bilinear,
    Nearest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoSettings {
    pub enabled: bool,
    /// Framebuffer width (0 = derive from the window, or the source width)
    pub width: usize,
    pub height: usize,
    /// Row length in pixels (0 = width)
    pub stride: usize,
    /// Window the host stretches the framebuffer into (0 = none)
    pub window_width: usize,
    pub window_height: usize,
    /// Pixel format (unset = big-endian for bilinear, native otherwise)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<TargetFormat>,
    pub scale: ScaleKind,
    /// Replication factor for positioned copy
    pub factor: usize,
    /// Resample target size (0 = framebuffer size)
    pub output_width: usize,
    pub output_height: usize,
    pub clear: ClearPolicy,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            width: 0,
            height: SOURCE_HEIGHT,
            stride: 0,
            window_width: 0,
            window_height: 0,
            format: None,
            scale: ScaleKind::Positioned,
            factor: 1,
            output_width: 0,
            output_height: 0,
            clear: ClearPolicy::WhenNarrower,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverSettings {
    /// Frame limiter rate (0 = unlimited)
    pub target_fps: u32,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load settings from default locations
    ///
    /// Searches in order:
    /// 1. Same directory as executable: emuout.toml
    /// 2. User config directory: emuout/config.toml
    pub fn load_default() -> Result<Self, ConfigError> {
        match Self::default_path() {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// First existing settings file in the search order
    pub fn default_path() -> Option<PathBuf> {
        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("emuout.toml")));
        let user = dirs::config_dir().map(|dir| dir.join("emuout").join("config.toml"));

        [beside_exe, user].into_iter().flatten().find(|path| path.exists())
    }

    /// Save settings to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Audio session configuration
    pub fn to_audio_config(&self) -> AudioConfig {
        let audio = &self.audio;
        AudioConfig {
            format: AudioFormat {
                sample_rate: audio.sample_rate,
                channels: audio.channels,
                ..AudioFormat::default()
            },
            periods_per_second: audio.periods_per_second,
            alignment: audio.alignment,
            queue_depth: audio.queue_depth,
            wait_timeout: match audio.wait_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            source_layout: audio.source_layout,
        }
    }

    /// Video pipeline configuration for the built-in source size
    pub fn to_video_config(&self) -> VideoConfig {
        let video = &self.video;
        let width = match (video.width, video.window_width, video.window_height) {
            (0, w, h) if w > 0 && h > 0 => fit_frame_width(w, h, SOURCE_WIDTH, SOURCE_HEIGHT),
            (0, _, _) => SOURCE_WIDTH,
            (width, _, _) => width,
        };
        let height = if video.height == 0 { SOURCE_HEIGHT } else { video.height };
        let stride = video.stride.max(width);

        let output = |size: usize, fallback: usize| if size == 0 { fallback } else { size };
        let mode = match video.scale {
            ScaleKind::Positioned => ScaleMode::Positioned {
                factor: video.factor.max(1),
            },
            ScaleKind::Bilinear => ScaleMode::Bilinear {
                width: output(video.output_width, width),
                height: output(video.output_height, height),
            },
            ScaleKind::Nearest => ScaleMode::Nearest {
                width: output(video.output_width, width),
                height: output(video.output_height, height),
            },
        };

        let format = video.format.unwrap_or(match video.scale {
            ScaleKind::Bilinear => TargetFormat::Rgb565Be,
            ScaleKind::Positioned | ScaleKind::Nearest => TargetFormat::Rgb565,
        });

        VideoConfig {
            width,
            height,
            stride,
            format,
            mode,
            clear: video.clear,
        }
    }

    /// Generate a sample configuration file content
    pub fn sample_config() -> String {
        r#"# emuout configuration

# Log level: trace, debug, info, warn, error (default: info)
log_level = "info"

# Log file path (empty = no file logging)
log_file = ""

[audio]
enabled = true
# Device-native format; samples are never resampled
sample_rate = 48000
channels = 2
# 48000 Hz * 2 ch * 2 bytes / 40 = 4800 bytes per period, in 8192-byte buffers
periods_per_second = 40
alignment = 4096
# Buffers in flight before the core is blocked
queue_depth = 1
# Give up on the device after this long and drop the period (0 = wait forever)
wait_timeout_ms = 250
# Layout the core delivers: "mono" or "stereo"
source_layout = "stereo"
# Hold each period for its play time (false = run as fast as possible)
realtime = true
# Write played PCM to this file (empty = none)
pcm_file = ""
tone_hz = 440

[video]
enabled = true
# Framebuffer size; width 0 derives it from the window, or uses 160
width = 0
height = 144
# Row length in pixels (0 = width)
stride = 0
# Window the host stretches the framebuffer into (0 = none)
window_width = 1280
window_height = 720
# "rgb565", "rgb565-be" or "xrgb8888"
# (unset = "rgb565-be" for bilinear, "rgb565" otherwise)
# format = "rgb565"
# "positioned", "bilinear" or "nearest"
scale = "positioned"
factor = 1
# Resample target (0 = framebuffer size)
output_width = 0
output_height = 0
# "when-narrower", "always" or "never"
clear = "when-narrower"

[driver]
# Frame limiter (0 = paced by audio only)
target_fps = 0
"#
        .to_string()
    }
}

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// IO error reading/writing config file
    #[error("Failed to access config file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing TOML
    #[error("Failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Error serializing config
    #[error("Failed to serialize config: {0}")]
    Serialize(#[source] toml::ser::Error),
}
