//! Threaded software audio device
//!
//! Stands in for a host driver: submitted periods are queued to a playback
//! thread which paces them in real time (optional), forwards the PCM to a
//! byte sink (optional) and reports each buffer back as released.

use crate::audio::device::{AudioOutput, BufferDescriptor, BufferId, WaitOutcome};
use crate::audio::AudioFormat;
use crate::error::{EmuoutError, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Byte sink for played PCM
pub type PcmSink = Box<dyn Write + Send>;

/// Periods the playback queue accepts before `submit` reports the device full
const QUEUE_CAPACITY: usize = 8;

/// How often the playback thread checks its stop flag while idle
const IDLE_POLL: Duration = Duration::from_millis(50);

/// Counters maintained by the playback thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub periods_played: u64,
    pub bytes_played: u64,
    /// Periods that arrived after the previous one had already finished playing
    pub underruns: u64,
    pub sink_errors: u64,
}

/// One period owned by the playback thread
struct Period {
    id: BufferId,
    data: Vec<u8>,
}

/// Audio output backed by a playback thread
pub struct ChannelAudioOutput {
    format: AudioFormat,
    period_tx: Option<Sender<Period>>,
    release_rx: Receiver<BufferId>,
    in_flight: usize,
    stop_flag: Arc<AtomicBool>,
    stats: Arc<Mutex<PlaybackStats>>,
    handle: Option<JoinHandle<()>>,
}

impl ChannelAudioOutput {
    /// Start the playback thread
    ///
    /// With `realtime` set each period is held for its play duration before it
    /// is released, so the producer is paced like a hardware device.
    pub fn spawn(format: AudioFormat, realtime: bool, sink: Option<PcmSink>) -> Result<Self> {
        let (period_tx, period_rx) = bounded::<Period>(QUEUE_CAPACITY);
        let (release_tx, release_rx) = unbounded::<BufferId>();
        let stop_flag = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(Mutex::new(PlaybackStats::default()));

        let thread_stop = Arc::clone(&stop_flag);
        let thread_stats = Arc::clone(&stats);
        let thread_format = format.clone();
        let handle = thread::Builder::new()
            .name("emuout-playback".into())
            .spawn(move || {
                playback_thread(
                    period_rx,
                    release_tx,
                    thread_stop,
                    thread_stats,
                    thread_format,
                    realtime,
                    sink,
                )
            })?;

        info!(
            "Playback device started: {} ({})",
            format,
            if realtime { "real-time" } else { "free-running" }
        );

        Ok(Self {
            format,
            period_tx: Some(period_tx),
            release_rx,
            in_flight: 0,
            stop_flag,
            stats,
            handle: Some(handle),
        })
    }

    pub fn format(&self) -> &AudioFormat {
        &self.format
    }

    /// Snapshot of the playback counters
    pub fn stats(&self) -> PlaybackStats {
        *self.stats.lock()
    }

    fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };

        self.stop_flag.store(true, Ordering::SeqCst);
        self.period_tx = None;

        if handle.join().is_err() {
            error!("Playback thread panicked");
        }
        debug!("Playback device stopped with {} buffer(s) unreleased", self.in_flight);
        self.in_flight = 0;
    }
}

impl AudioOutput for ChannelAudioOutput {
    fn submit(&mut self, buffer: BufferDescriptor<'_>) -> Result<()> {
        let tx = self
            .period_tx
            .as_ref()
            .ok_or_else(|| EmuoutError::device_error("playback device stopped"))?;

        let period = Period {
            id: buffer.id,
            data: buffer.data().to_vec(),
        };
        match tx.try_send(period) {
            Ok(()) => {
                self.in_flight += 1;
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(EmuoutError::device_error("playback queue full")),
            Err(TrySendError::Disconnected(_)) => Err(EmuoutError::ChannelError(
                "playback thread exited".into(),
            )),
        }
    }

    fn wait_released(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        if self.in_flight == 0 {
            return Ok(WaitOutcome::Idle);
        }

        let released = match timeout {
            Some(timeout) => match self.release_rx.recv_timeout(timeout) {
                Ok(id) => id,
                Err(RecvTimeoutError::Timeout) => return Ok(WaitOutcome::TimedOut),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(EmuoutError::ChannelError("playback thread exited".into()))
                }
            },
            None => self
                .release_rx
                .recv()
                .map_err(|_| EmuoutError::ChannelError("playback thread exited".into()))?,
        };

        self.in_flight -= 1;
        Ok(WaitOutcome::Released(released))
    }

    fn stop(&mut self) {
        self.shutdown();
    }
}

impl Drop for ChannelAudioOutput {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Playback thread function
fn playback_thread(
    period_rx: Receiver<Period>,
    release_tx: Sender<BufferId>,
    stop_flag: Arc<AtomicBool>,
    stats: Arc<Mutex<PlaybackStats>>,
    format: AudioFormat,
    realtime: bool,
    mut sink: Option<PcmSink>,
) {
    info!("Playback thread started");
    let mut deadline: Option<Instant> = None;

    loop {
        let period = match period_rx.recv_timeout(IDLE_POLL) {
            Ok(period) => period,
            Err(RecvTimeoutError::Timeout) if stop_flag.load(Ordering::Relaxed) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        // Queued periods are drained without pacing once stopping
        if realtime && !stop_flag.load(Ordering::Relaxed) {
            let now = Instant::now();
            let start = match deadline {
                Some(previous) if previous >= now => previous,
                Some(_) => {
                    stats.lock().underruns += 1;
                    trace!("Playback underrun");
                    now
                }
                None => now,
            };
            let end = start + format.duration_of(period.data.len());
            deadline = Some(end);
            thread::sleep(end.saturating_duration_since(Instant::now()));
        }

        if let Some(out) = sink.as_mut() {
            if let Err(e) = out.write_all(&period.data) {
                warn!("PCM sink write failed: {}, disabling sink", e);
                stats.lock().sink_errors += 1;
                sink = None;
            }
        }

        {
            let mut stats = stats.lock();
            stats.periods_played += 1;
            stats.bytes_played += period.data.len() as u64;
        }

        if release_tx.send(period.id).is_err() {
            break;
        }
    }

    if let Some(mut out) = sink {
        if let Err(e) = out.flush() {
            warn!("PCM sink flush failed: {}", e);
        }
    }
    info!("Playback thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AlignedBuffer, AudioConfig, AudioRepacketizer, ChannelLayout};

    /// Sink writing into shared memory so the test can inspect it
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn slow_format() -> AudioFormat {
        // 160 bytes = 40 frames = 100ms
        AudioFormat {
            sample_rate: 400,
            channels: 2,
            bytes_per_sample: 2,
        }
    }

    fn descriptor(buffer: &AlignedBuffer, id: usize, data_size: usize) -> BufferDescriptor<'_> {
        BufferDescriptor {
            id: BufferId(id),
            buffer: buffer.as_bytes(),
            buffer_size: buffer.len(),
            data_size,
            data_offset: 0,
        }
    }

    #[test]
    fn test_idle_when_nothing_submitted() {
        let mut output = ChannelAudioOutput::spawn(AudioFormat::default(), false, None).unwrap();
        assert_eq!(
            output.wait_released(Some(Duration::from_millis(1))).unwrap(),
            WaitOutcome::Idle
        );
    }

    #[test]
    fn test_release_and_sink_carry_data_only() {
        let sink = SharedSink::default();
        let mut output = ChannelAudioOutput::spawn(
            AudioFormat::default(),
            false,
            Some(Box::new(sink.clone())),
        )
        .unwrap();

        let mut buffer = AlignedBuffer::new(64, 64, "test").unwrap();
        buffer.as_bytes_mut()[..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        output.submit(descriptor(&buffer, 3, 8)).unwrap();
        assert_eq!(
            output.wait_released(None).unwrap(),
            WaitOutcome::Released(BufferId(3))
        );

        output.stop();
        assert_eq!(*sink.0.lock(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(output.stats().periods_played, 1);
        assert_eq!(output.stats().bytes_played, 8);
    }

    #[test]
    fn test_realtime_wait_times_out() {
        let mut output = ChannelAudioOutput::spawn(slow_format(), true, None).unwrap();
        let buffer = AlignedBuffer::new(192, 64, "test").unwrap();

        output.submit(descriptor(&buffer, 0, 160)).unwrap();
        assert_eq!(
            output.wait_released(Some(Duration::from_millis(5))).unwrap(),
            WaitOutcome::TimedOut
        );
        assert_eq!(
            output.wait_released(Some(Duration::from_secs(5))).unwrap(),
            WaitOutcome::Released(BufferId(0))
        );
    }

    #[test]
    fn test_submit_after_stop_fails() {
        let mut output = ChannelAudioOutput::spawn(AudioFormat::default(), false, None).unwrap();
        output.stop();
        let buffer = AlignedBuffer::new(64, 64, "test").unwrap();
        assert!(output.submit(descriptor(&buffer, 0, 64)).is_err());
    }

    #[test]
    fn test_repacketizer_stream_reaches_sink() {
        let sink = SharedSink::default();
        let config = AudioConfig {
            format: slow_format(),
            periods_per_second: 10,
            alignment: 64,
            wait_timeout: Some(Duration::from_secs(5)),
            source_layout: ChannelLayout::Stereo,
            ..AudioConfig::default()
        };
        let output =
            ChannelAudioOutput::spawn(config.format.clone(), false, Some(Box::new(sink.clone())))
                .unwrap();
        let mut audio = AudioRepacketizer::new(config, output).unwrap();

        let samples: Vec<i16> = (0..500).collect();
        for chunk in samples.chunks(37) {
            audio.submit_samples(chunk);
        }
        let stats = audio.shutdown();
        assert_eq!(stats.periods_submitted, 6);
        assert_eq!(stats.periods_dropped, 0);

        let played: Vec<i16> = sink
            .0
            .lock()
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(played, &samples[..480]);
    }
}
