//! Streaming re-packetizer from emulator sample bursts to device periods

use crate::audio::buffer::StagingPool;
use crate::audio::device::{AudioOutput, BufferDescriptor, BufferId, WaitOutcome};
use crate::audio::{AudioConfig, ChannelConversion};
use crate::error::{EmuoutError, Result};
use tracing::{debug, error, info, trace, warn};

/// Counters for one audio session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepacketizerStats {
    /// Periods accepted by the device
    pub periods_submitted: u64,
    /// Completed periods thrown away (device timeout or rejected submit)
    pub periods_dropped: u64,
    /// Backpressure waits performed
    pub waits: u64,
    /// Source samples consumed
    pub samples_accepted: u64,
}

/// Audio session: owns the staging buffers, the device handle and the fill offset
///
/// Samples arrive in bursts of any length. They are copied into the work
/// buffer; each time it fills, the period is closed, the producer waits for
/// the device to free a buffer (except while fewer than `queue_depth` buffers
/// are in flight), and the closed buffer is submitted.
pub struct AudioRepacketizer<D: AudioOutput> {
    output: D,
    pool: StagingPool,
    config: AudioConfig,
    conversion: ChannelConversion,
    /// Work buffer capacity in device samples
    capacity: usize,
    /// Fill position in device samples, never above `capacity`
    offset: usize,
    in_flight: usize,
    stats: RepacketizerStats,
    stopped: bool,
}

impl<D: AudioOutput> AudioRepacketizer<D> {
    /// Validate the configuration and allocate the staging pool
    ///
    /// Allocation failure is returned as `AllocationFailed`; the caller is
    /// expected to run without audio rather than abort.
    pub fn new(config: AudioConfig, output: D) -> Result<Self> {
        config.validate()?;
        let conversion = config.conversion()?;
        let pool = StagingPool::new(
            config.queue_depth + 1,
            config.buffer_size(),
            config.alignment,
        )?;
        let capacity = config.period_samples();

        info!(
            "Audio session: {}, period {} bytes in {} byte buffers, source {:?}",
            config.format,
            config.data_size(),
            config.buffer_size(),
            config.source_layout
        );

        Ok(Self {
            output,
            pool,
            config,
            conversion,
            capacity,
            offset: 0,
            in_flight: 0,
            stats: RepacketizerStats::default(),
            stopped: false,
        })
    }

    /// Consume a whole chunk of source samples
    ///
    /// Nothing from `chunk` is retained after return. Returns the number of
    /// periods handed to the device during this call.
    pub fn submit_samples(&mut self, chunk: &[i16]) -> usize {
        if self.stopped {
            return 0;
        }

        let mut submitted = 0;
        let mut rest = chunk;
        while !rest.is_empty() {
            let consumed = self.fill(rest);
            rest = &rest[consumed..];

            if self.offset == self.capacity && self.close_period() {
                submitted += 1;
            }
        }

        self.stats.samples_accepted += chunk.len() as u64;
        submitted
    }

    /// Copy as much of `source` as fits in the work buffer
    ///
    /// Returns the number of source samples consumed.
    fn fill(&mut self, source: &[i16]) -> usize {
        let room = self.capacity - self.offset;
        let start = self.offset;
        let work = self.pool.work_samples_mut();

        match self.conversion {
            ChannelConversion::Direct => {
                let transfer = source.len().min(room);
                work[start..start + transfer].copy_from_slice(&source[..transfer]);
                self.offset += transfer;
                transfer
            }
            ChannelConversion::DuplicateMono => {
                let frames = source.len().min(room / 2);
                for (slot, &sample) in work[start..start + frames * 2]
                    .chunks_exact_mut(2)
                    .zip(&source[..frames])
                {
                    slot[0] = sample;
                    slot[1] = sample;
                }
                self.offset += frames * 2;
                frames
            }
        }
    }

    /// Hand the full work buffer to the device and start a new one
    ///
    /// Returns false when the period was dropped.
    fn close_period(&mut self) -> bool {
        self.offset = 0;

        if self.in_flight >= self.config.queue_depth {
            self.stats.waits += 1;
            match self.output.wait_released(self.config.wait_timeout) {
                Ok(WaitOutcome::Released(BufferId(id))) => {
                    trace!("Device released buffer {}", id);
                    self.in_flight -= 1;
                }
                Ok(WaitOutcome::Idle) => {
                    trace!("Device reports no buffer in flight");
                    self.in_flight = 0;
                }
                Ok(WaitOutcome::TimedOut) => {
                    self.stats.periods_dropped += 1;
                    let timeout = EmuoutError::DeviceTimeout {
                        waited_ms: self
                            .config
                            .wait_timeout
                            .map_or(0, |t| t.as_millis() as u64),
                    };
                    warn!(
                        "{}, dropped period ({} total)",
                        timeout, self.stats.periods_dropped
                    );
                    return false;
                }
                Err(e) => {
                    self.stats.periods_dropped += 1;
                    warn!("Audio device wait failed: {}, dropped period", e);
                    return false;
                }
            }
        }

        let index = self.pool.work_index();
        let buffer = self.pool.work().as_bytes();
        let descriptor = BufferDescriptor {
            id: BufferId(index),
            buffer,
            buffer_size: buffer.len(),
            data_size: self.config.data_size(),
            data_offset: 0,
        };

        match self.output.submit(descriptor) {
            Ok(()) => {
                self.pool.rotate();
                self.in_flight += 1;
                self.stats.periods_submitted += 1;
                trace!("Submitted buffer {} ({} in flight)", index, self.in_flight);
                true
            }
            Err(e) => {
                self.stats.periods_dropped += 1;
                if e.is_recoverable() {
                    warn!("Audio device rejected buffer {}: {}", index, e);
                } else {
                    error!("Audio device failed on buffer {}: {}", index, e);
                }
                false
            }
        }
    }

    /// Current fill position of the work buffer, in device samples
    pub fn work_offset(&self) -> usize {
        self.offset
    }

    /// Work buffer capacity in device samples
    pub fn capacity_samples(&self) -> usize {
        self.capacity
    }

    /// Buffers submitted and not yet released
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn stats(&self) -> RepacketizerStats {
        self.stats
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn output(&self) -> &D {
        &self.output
    }

    /// Stop the device session and free the staging buffers
    ///
    /// A partially filled work buffer is discarded, never submitted.
    pub fn shutdown(mut self) -> RepacketizerStats {
        self.release();
        self.stats
    }

    fn release(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if self.offset > 0 {
            debug!("Discarding {} samples of a partial period", self.offset);
        }
        self.output.stop();
        info!(
            "Audio session closed: {} periods submitted, {} dropped",
            self.stats.periods_submitted, self.stats.periods_dropped
        );
    }
}

impl<D: AudioOutput> Drop for AudioRepacketizer<D> {
    fn drop(&mut self) {
        // Device session goes first; the pool is freed with the struct afterwards
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioFormat, ChannelLayout};
    use crate::error::EmuoutError;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Event {
        Wait,
        Submit(usize),
        Stop,
    }

    /// Records every call; releases buffers in submission order
    #[derive(Default)]
    struct MockOutput {
        events: Vec<Event>,
        periods: Vec<Vec<i16>>,
        pending: VecDeque<BufferId>,
        descriptor_sizes: Vec<(usize, usize, usize)>,
        time_out: bool,
        reject: bool,
    }

    impl AudioOutput for MockOutput {
        fn submit(&mut self, buffer: BufferDescriptor<'_>) -> Result<()> {
            if self.reject {
                return Err(EmuoutError::device_error("device gone"));
            }
            self.events.push(Event::Submit(buffer.id.0));
            self.descriptor_sizes
                .push((buffer.buffer_size, buffer.data_size, buffer.data_offset));
            assert!(buffer.buffer[buffer.data_size..].iter().all(|&b| b == 0));
            self.periods.push(bytemuck::cast_slice(buffer.data()).to_vec());
            self.pending.push_back(buffer.id);
            Ok(())
        }

        fn wait_released(&mut self, _timeout: Option<Duration>) -> Result<WaitOutcome> {
            self.events.push(Event::Wait);
            if self.time_out {
                return Ok(WaitOutcome::TimedOut);
            }
            Ok(match self.pending.pop_front() {
                Some(id) => WaitOutcome::Released(id),
                None => WaitOutcome::Idle,
            })
        }

        fn stop(&mut self) {
            self.events.push(Event::Stop);
        }
    }

    /// 80 samples (160 bytes) per period in 192-byte buffers
    fn small_config(layout: ChannelLayout) -> AudioConfig {
        AudioConfig {
            format: AudioFormat {
                sample_rate: 400,
                channels: 2,
                bytes_per_sample: 2,
            },
            periods_per_second: 10,
            alignment: 64,
            queue_depth: 1,
            wait_timeout: Some(Duration::from_millis(5)),
            source_layout: layout,
        }
    }

    fn ramp(start: i16, len: usize) -> Vec<i16> {
        (0..len as i16).map(|i| start + i).collect()
    }

    #[test]
    fn test_first_submission_skips_wait() {
        let mut audio =
            AudioRepacketizer::new(small_config(ChannelLayout::Stereo), MockOutput::default())
                .unwrap();
        assert_eq!(audio.capacity_samples(), 80);

        assert_eq!(audio.submit_samples(&ramp(0, 80)), 1);
        assert_eq!(audio.output().events, vec![Event::Submit(0)]);

        assert_eq!(audio.submit_samples(&ramp(80, 80)), 1);
        assert_eq!(
            audio.output().events,
            vec![Event::Submit(0), Event::Wait, Event::Submit(1)]
        );

        audio.submit_samples(&ramp(160, 80));
        assert_eq!(
            audio.output().events[3..],
            [Event::Wait, Event::Submit(0)]
        );
        assert_eq!(audio.stats().waits, 2);
    }

    #[test]
    fn test_descriptor_sizes() {
        let mut audio =
            AudioRepacketizer::new(small_config(ChannelLayout::Stereo), MockOutput::default())
                .unwrap();
        audio.submit_samples(&ramp(0, 80));
        assert_eq!(audio.output().descriptor_sizes, vec![(192, 160, 0)]);
    }

    #[test]
    fn test_split_transfer_across_boundary() {
        let mut audio =
            AudioRepacketizer::new(small_config(ChannelLayout::Stereo), MockOutput::default())
                .unwrap();

        audio.submit_samples(&ramp(0, 70));
        assert_eq!(audio.work_offset(), 70);
        assert!(audio.output().periods.is_empty());

        audio.submit_samples(&ramp(70, 25));
        assert_eq!(audio.work_offset(), 15);
        assert_eq!(audio.output().periods, vec![ramp(0, 80)]);

        audio.submit_samples(&ramp(95, 65));
        assert_eq!(audio.work_offset(), 0);
        assert_eq!(audio.output().periods[1], ramp(80, 80));
    }

    #[test]
    fn test_chunk_spanning_several_periods() {
        let mut audio =
            AudioRepacketizer::new(small_config(ChannelLayout::Stereo), MockOutput::default())
                .unwrap();

        assert_eq!(audio.submit_samples(&ramp(0, 250)), 3);
        assert_eq!(audio.work_offset(), 10);
        let stream: Vec<i16> = audio.output().periods.concat();
        assert_eq!(stream, ramp(0, 240));
        assert_eq!(audio.stats().samples_accepted, 250);
    }

    #[test]
    fn test_empty_chunk_is_noop() {
        let mut audio =
            AudioRepacketizer::new(small_config(ChannelLayout::Stereo), MockOutput::default())
                .unwrap();
        assert_eq!(audio.submit_samples(&[]), 0);
        assert_eq!(audio.work_offset(), 0);
        assert!(audio.output().events.is_empty());
    }

    #[test]
    fn test_mono_duplicated_to_stereo() {
        let mut audio =
            AudioRepacketizer::new(small_config(ChannelLayout::Mono), MockOutput::default())
                .unwrap();

        audio.submit_samples(&ramp(1, 30));
        assert_eq!(audio.work_offset(), 60);

        // 10 more mono samples complete the period, 5 spill into the next
        audio.submit_samples(&ramp(31, 15));
        assert_eq!(audio.work_offset(), 10);

        let period = &audio.output().periods[0];
        let expected: Vec<i16> = (1..=40).flat_map(|s| [s, s]).collect();
        assert_eq!(period, &expected);
    }

    #[test]
    fn test_timeout_drops_period_and_continues() {
        let mut audio =
            AudioRepacketizer::new(small_config(ChannelLayout::Stereo), MockOutput::default())
                .unwrap();

        audio.submit_samples(&ramp(0, 80));
        audio.output.time_out = true;
        assert_eq!(audio.submit_samples(&ramp(80, 80)), 0);
        assert_eq!(audio.stats().periods_dropped, 1);
        assert_eq!(audio.work_offset(), 0);

        audio.output.time_out = false;
        assert_eq!(audio.submit_samples(&ramp(160, 80)), 1);
        assert_eq!(audio.output().periods[1], ramp(160, 80));
        assert_eq!(audio.stats().periods_submitted, 2);
    }

    #[test]
    fn test_rejected_submit_is_counted() {
        let mut audio =
            AudioRepacketizer::new(small_config(ChannelLayout::Stereo), MockOutput::default())
                .unwrap();
        audio.output.reject = true;
        audio.submit_samples(&ramp(0, 80));
        assert_eq!(audio.stats().periods_dropped, 1);
        assert_eq!(audio.in_flight(), 0);
    }

    #[test]
    fn test_queue_depth_two_skips_two_waits() {
        let config = AudioConfig {
            queue_depth: 2,
            ..small_config(ChannelLayout::Stereo)
        };
        let mut audio = AudioRepacketizer::new(config, MockOutput::default()).unwrap();

        audio.submit_samples(&ramp(0, 240));
        assert_eq!(
            audio.output().events,
            vec![
                Event::Submit(0),
                Event::Submit(1),
                Event::Wait,
                Event::Submit(2)
            ]
        );
    }

    #[test]
    fn test_shutdown_stops_without_partial_submit() {
        let mut audio =
            AudioRepacketizer::new(small_config(ChannelLayout::Stereo), MockOutput::default())
                .unwrap();
        audio.submit_samples(&ramp(0, 100));
        audio.release();
        assert_eq!(
            audio.output().events,
            vec![Event::Submit(0), Event::Stop]
        );
        assert_eq!(audio.submit_samples(&ramp(0, 200)), 0);

        let stats = audio.shutdown();
        assert_eq!(stats.periods_submitted, 1);
    }

    #[test]
    fn test_invalid_layout_rejected_at_start() {
        let config = AudioConfig {
            format: AudioFormat {
                channels: 1,
                ..small_config(ChannelLayout::Stereo).format
            },
            ..small_config(ChannelLayout::Stereo)
        };
        let result = AudioRepacketizer::new(config, MockOutput::default());
        assert!(matches!(
            result,
            Err(EmuoutError::UnsupportedChannelConversion { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_split_transfer_preserves_stream(
            chunks in proptest::collection::vec(0usize..300, 1..40)
        ) {
            let mut audio = AudioRepacketizer::new(
                small_config(ChannelLayout::Stereo),
                MockOutput::default(),
            )
            .unwrap();

            let mut next: i16 = 0;
            for len in &chunks {
                let chunk = ramp(next, *len);
                next = next.wrapping_add(*len as i16);
                audio.submit_samples(&chunk);
                prop_assert!(audio.work_offset() < audio.capacity_samples());
            }

            let total: usize = chunks.iter().sum();
            let stream: Vec<i16> = audio.output().periods.concat();
            prop_assert_eq!(stream.len(), total - total % 80);
            prop_assert_eq!(stream, ramp(0, total - total % 80));
            prop_assert_eq!(audio.work_offset(), total % 80);
        }
    }
}
