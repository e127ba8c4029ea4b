//! Aligned staging buffers for device periods

use crate::error::{EmuoutError, Result};
use std::alloc::{self, Layout};
use std::ptr::NonNull;
use tracing::debug;

/// Round `value` up to the next multiple of `alignment` (a power of two)
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Zero-initialized heap allocation with a caller-chosen alignment
///
/// Device drivers require period buffers that start on a page-like boundary,
/// which `Vec<u8>` cannot guarantee.
pub struct AlignedBuffer {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: AlignedBuffer uniquely owns its allocation and hands out borrows only
unsafe impl Send for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate `size` zeroed bytes aligned to `align`
    ///
    /// `role` names the buffer in the error when allocation fails.
    pub fn new(size: usize, align: usize, role: &'static str) -> Result<Self> {
        let align = align.max(std::mem::align_of::<i16>());
        let failed = || EmuoutError::AllocationFailed { role, size, align };

        if size == 0 || size % std::mem::size_of::<i16>() != 0 {
            return Err(failed());
        }
        let layout = Layout::from_size_align(size, align).map_err(|_| failed())?;

        // SAFETY: layout has a non-zero size
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or_else(failed)?;

        Ok(Self { ptr, layout })
    }

    /// Allocation size in bytes
    pub fn len(&self) -> usize {
        self.layout.size()
    }

    /// Always false, zero-sized buffers are rejected at allocation
    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    /// Alignment of the first byte
    pub fn align(&self) -> usize {
        self.layout.align()
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: ptr is a live allocation of layout.size() initialized bytes
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.layout.size()) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as above, and &mut self guarantees exclusive access
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.layout.size()) }
    }

    /// View the buffer as signed 16-bit samples
    pub fn as_samples(&self) -> &[i16] {
        bytemuck::cast_slice(self.as_bytes())
    }

    /// Mutable sample view; size and alignment are checked at allocation
    pub fn as_samples_mut(&mut self) -> &mut [i16] {
        bytemuck::cast_slice_mut(self.as_bytes_mut())
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by alloc_zeroed with this exact layout
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for AlignedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("len", &self.len())
            .field("align", &self.align())
            .finish()
    }
}

/// Fixed pool of staging buffers cycled by index
///
/// One buffer is the work buffer being filled; the others are either in
/// flight to the device or free. A closed work buffer becomes the I/O buffer
/// handed to the device, so the two roles never share memory.
pub struct StagingPool {
    buffers: Vec<AlignedBuffer>,
    work: usize,
}

impl StagingPool {
    /// Allocate `count` buffers of `size` bytes each
    pub fn new(count: usize, size: usize, align: usize) -> Result<Self> {
        let count = count.max(2);
        let mut buffers = Vec::with_capacity(count);
        for i in 0..count {
            let role = if i == 0 { "audio work" } else { "audio io" };
            buffers.push(AlignedBuffer::new(size, align, role)?);
        }
        debug!(
            "Allocated {} staging buffers of {} bytes (align {})",
            count, size, align
        );
        Ok(Self { buffers, work: 0 })
    }

    /// Number of buffers in the pool
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Always false, pools hold at least two buffers
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Index of the buffer currently being filled
    pub fn work_index(&self) -> usize {
        self.work
    }

    /// The buffer currently being filled
    pub fn work(&self) -> &AlignedBuffer {
        &self.buffers[self.work]
    }

    /// Sample view of the work buffer
    pub fn work_samples_mut(&mut self) -> &mut [i16] {
        self.buffers[self.work].as_samples_mut()
    }

    /// Buffer at the given pool index
    pub fn get(&self, index: usize) -> Option<&AlignedBuffer> {
        self.buffers.get(index)
    }

    /// Close the work buffer and move on to the next one
    ///
    /// Returns the index of the closed buffer, which now belongs to the device.
    pub fn rotate(&mut self) -> usize {
        let closed = self.work;
        self.work = (self.work + 1) % self.buffers.len();
        closed
    }
}
