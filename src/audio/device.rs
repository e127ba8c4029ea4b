//! Host audio driver seam

use crate::error::Result;
use std::time::Duration;

/// Identifies one staging buffer handed to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub usize);

/// Submission descriptor the host driver receives for one period
///
/// `buffer` spans the full aligned allocation (`buffer_size` bytes); only
/// `data_size` bytes starting at `data_offset` carry PCM. The producer does not
/// touch the buffer again until the device reports it released.
#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub id: BufferId,
    pub buffer: &'a [u8],
    pub buffer_size: usize,
    pub data_size: usize,
    pub data_offset: usize,
}

impl<'a> BufferDescriptor<'a> {
    /// The bytes the device should play
    pub fn data(&self) -> &'a [u8] {
        &self.buffer[self.data_offset..self.data_offset + self.data_size]
    }
}

/// Result of waiting for the device to free a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A previously submitted buffer finished playing
    Released(BufferId),
    /// Nothing is in flight; treat this as the first period
    Idle,
    /// The bound elapsed before any buffer was released
    TimedOut,
}

/// Audio device as seen by the repacketizer
///
/// `submit` enqueues and returns immediately; `wait_released` is the only
/// blocking call and must honour `timeout` when one is given.
pub trait AudioOutput {
    /// Enqueue one period for playback
    fn submit(&mut self, buffer: BufferDescriptor<'_>) -> Result<()>;

    /// Block until a submitted buffer is free
    fn wait_released(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome>;

    /// Release the device session; no submissions follow
    fn stop(&mut self) {}
}

impl<T: AudioOutput + ?Sized> AudioOutput for Box<T> {
    fn submit(&mut self, buffer: BufferDescriptor<'_>) -> Result<()> {
        (**self).submit(buffer)
    }

    fn wait_released(&mut self, timeout: Option<Duration>) -> Result<WaitOutcome> {
        (**self).wait_released(timeout)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}
