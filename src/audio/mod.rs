//! PCM repacketizing from emulator sample bursts into aligned device periods

mod buffer;
mod device;
mod playback;
mod repacketizer;

pub use buffer::{align_up, AlignedBuffer, StagingPool};
pub use device::{AudioOutput, BufferDescriptor, BufferId, WaitOutcome};
pub use playback::{ChannelAudioOutput, PcmSink, PlaybackStats};
pub use repacketizer::{AudioRepacketizer, RepacketizerStats};

use crate::error::{EmuoutError, Result};
use std::time::Duration;

/// Device-native sample rate
pub const DEVICE_SAMPLE_RATE: u32 = 48_000;

/// Device channel count
pub const DEVICE_CHANNELS: u16 = 2;

/// Signed 16-bit PCM
pub const BYTES_PER_SAMPLE: u16 = 2;

/// Device periods per second. 40 keeps the device wait short enough to avoid frame drops.
pub const PERIODS_PER_SECOND: u32 = 40;

/// Device buffers must start and end on this boundary
pub const BUFFER_ALIGNMENT: usize = 0x1000;

/// Bytes of PCM carried by one device period
pub const AUDIO_DATA_SIZE: usize = (DEVICE_SAMPLE_RATE as usize
    * DEVICE_CHANNELS as usize
    * BYTES_PER_SAMPLE as usize)
    / PERIODS_PER_SECOND as usize;

/// Allocation size of one device period, rounded up to the alignment boundary
pub const AUDIO_BUFFER_SIZE: usize = align_up(AUDIO_DATA_SIZE, BUFFER_ALIGNMENT);

/// Default bound on the device release wait
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(250);

/// Audio format information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
}

impl AudioFormat {
    /// Bytes of one interleaved frame (all channels)
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    /// Calculate bytes per second
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.block_align()
    }

    /// Calculate number of frames for given bytes
    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.block_align()
    }

    /// Duration of the given number of bytes when played back
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frames = self.bytes_to_frames(bytes) as u64;
        Duration::from_nanos(frames * 1_000_000_000 / self.sample_rate.max(1) as u64)
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEVICE_SAMPLE_RATE,
            channels: DEVICE_CHANNELS,
            bytes_per_sample: BYTES_PER_SAMPLE,
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz {}ch {}bit",
            self.sample_rate,
            self.channels,
            self.bytes_per_sample * 8
        )
    }
}

/// Channel layout of the samples the emulation core delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelLayout {
    /// One sample per frame, duplicated to both slots on a stereo device
    Mono,
    /// Already interleaved left/right
    #[default]
    Stereo,
}

impl ChannelLayout {
    pub fn channels(self) -> u16 {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

/// How a source layout reaches the device layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelConversion {
    /// Same channel count, copy as-is
    Direct,
    /// Mono source, each sample written to both stereo slots
    DuplicateMono,
}

/// Audio session configuration, fixed at session start
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub format: AudioFormat,
    pub periods_per_second: u32,
    pub alignment: usize,
    /// Buffers the device may hold in flight before the producer must wait
    pub queue_depth: usize,
    /// Bound on the release wait (None = wait forever)
    pub wait_timeout: Option<Duration>,
    pub source_layout: ChannelLayout,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            periods_per_second: PERIODS_PER_SECOND,
            alignment: BUFFER_ALIGNMENT,
            queue_depth: 1,
            wait_timeout: Some(DEFAULT_WAIT_TIMEOUT),
            source_layout: ChannelLayout::Stereo,
        }
    }
}

impl AudioConfig {
    /// Bytes of PCM per device period
    pub fn data_size(&self) -> usize {
        self.format.bytes_per_second() / self.periods_per_second.max(1) as usize
    }

    /// Aligned allocation size per device period
    pub fn buffer_size(&self) -> usize {
        align_up(self.data_size(), self.alignment)
    }

    /// Samples (not frames) per device period
    pub fn period_samples(&self) -> usize {
        self.data_size() / self.format.bytes_per_sample as usize
    }

    /// Real-time length of one period
    pub fn period_duration(&self) -> Duration {
        self.format.duration_of(self.data_size())
    }

    /// Resolve how source samples map onto device channels
    pub fn conversion(&self) -> Result<ChannelConversion> {
        match (self.source_layout.channels(), self.format.channels) {
            (s, d) if s == d => Ok(ChannelConversion::Direct),
            (1, 2) => Ok(ChannelConversion::DuplicateMono),
            (s, d) => Err(EmuoutError::UnsupportedChannelConversion {
                source_channels: s,
                device_channels: d,
            }),
        }
    }

    /// Check the configuration before any buffer is allocated
    pub fn validate(&self) -> Result<()> {
        let format = &self.format;
        if format.sample_rate == 0 {
            return Err(EmuoutError::InvalidConfig("sample rate must be non-zero".into()));
        }
        if !(1..=2).contains(&format.channels) {
            return Err(EmuoutError::InvalidConfig(format!(
                "unsupported device channel count {}",
                format.channels
            )));
        }
        if format.bytes_per_sample != BYTES_PER_SAMPLE {
            return Err(EmuoutError::InvalidConfig(format!(
                "only signed 16-bit samples are supported, got {} bytes per sample",
                format.bytes_per_sample
            )));
        }
        if self.periods_per_second == 0 {
            return Err(EmuoutError::InvalidConfig(
                "periods per second must be non-zero".into(),
            ));
        }
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(EmuoutError::InvalidConfig(format!(
                "buffer alignment {} is not a power of two",
                self.alignment
            )));
        }
        let data_size = self.data_size();
        if data_size == 0 || data_size % format.block_align() != 0 {
            return Err(EmuoutError::InvalidConfig(format!(
                "period of {} bytes is not a whole number of {}-byte frames",
                data_size,
                format.block_align()
            )));
        }
        if self.queue_depth == 0 {
            return Err(EmuoutError::InvalidConfig("queue depth must be at least 1".into()));
        }
        self.conversion()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sizes() {
        assert_eq!(AUDIO_DATA_SIZE, 4800);
        assert_eq!(AUDIO_BUFFER_SIZE, 8192);

        let config = AudioConfig::default();
        assert_eq!(config.data_size(), AUDIO_DATA_SIZE);
        assert_eq!(config.buffer_size(), AUDIO_BUFFER_SIZE);
        assert_eq!(config.period_samples(), 2400);
        assert_eq!(config.period_duration(), Duration::from_millis(25));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_alignment_invariant_across_configs() {
        for &sample_rate in &[8_000u32, 22_050, 32_000, 44_100, 48_000, 96_000] {
            for &channels in &[1u16, 2] {
                for &periods in &[10u32, 25, 40, 50, 60] {
                    for &alignment in &[0x100usize, 0x1000, 0x4000] {
                        let config = AudioConfig {
                            format: AudioFormat {
                                sample_rate,
                                channels,
                                bytes_per_sample: 2,
                            },
                            periods_per_second: periods,
                            alignment,
                            source_layout: ChannelLayout::Mono,
                            ..AudioConfig::default()
                        };
                        let buffer = config.buffer_size();
                        assert_eq!(buffer % alignment, 0);
                        assert!(buffer >= config.data_size());
                        assert!(buffer - config.data_size() < alignment);
                    }
                }
            }
        }
    }

    #[test]
    fn test_channel_conversion() {
        let mut config = AudioConfig::default();
        assert_eq!(config.conversion().unwrap(), ChannelConversion::Direct);

        config.source_layout = ChannelLayout::Mono;
        assert_eq!(config.conversion().unwrap(), ChannelConversion::DuplicateMono);

        config.format.channels = 1;
        assert_eq!(config.conversion().unwrap(), ChannelConversion::Direct);

        config.source_layout = ChannelLayout::Stereo;
        assert!(matches!(
            config.validate(),
            Err(EmuoutError::UnsupportedChannelConversion {
                source_channels: 2,
                device_channels: 1
            })
        ));
    }

    #[test]
    fn test_rejects_bad_configs() {
        let bad_alignment = AudioConfig {
            alignment: 3000,
            ..AudioConfig::default()
        };
        assert!(bad_alignment.validate().is_err());

        // 44100 * 4 / 40 = 4410 bytes, not a whole number of 4-byte frames
        let ragged = AudioConfig {
            format: AudioFormat {
                sample_rate: 44_100,
                ..AudioFormat::default()
            },
            ..AudioConfig::default()
        };
        assert!(ragged.validate().is_err());

        let no_queue = AudioConfig {
            queue_depth: 0,
            ..AudioConfig::default()
        };
        assert!(no_queue.validate().is_err());

        let eight_bit = AudioConfig {
            format: AudioFormat {
                bytes_per_sample: 1,
                ..AudioFormat::default()
            },
            ..AudioConfig::default()
        };
        assert!(eight_bit.validate().is_err());
    }

    #[test]
    fn test_format_display() {
        assert_eq!(AudioFormat::default().to_string(), "48000Hz 2ch 16bit");
    }
}
