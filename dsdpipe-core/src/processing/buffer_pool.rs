use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::PipelineError;
use crate::models::format::{BufferFlags, FrameFormat};

/// Fixed-capacity pool of reusable byte buffers.
///
/// Cloning the pool is cheap and shares the same storage. Storage handed out
/// by [`alloc`](Self::alloc) comes back automatically when the [`Buffer`] is
/// dropped, so steady-state operation never touches the global allocator.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: &'static str,
    buffer_capacity: usize,
    max_buffers: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    free: Vec<Vec<u8>>,
    allocated: usize,
}

impl BufferPool {
    /// Creates an empty pool. Storage is allocated lazily, up to `max_buffers`.
    pub fn new(name: &'static str, buffer_capacity: usize, max_buffers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                buffer_capacity,
                max_buffers,
                state: Mutex::new(PoolState {
                    free: Vec::with_capacity(max_buffers),
                    allocated: 0,
                }),
            }),
        }
    }

    /// Takes a buffer from the pool.
    ///
    /// Fails with `OutOfMemory` once `max_buffers` are in use; callers treat
    /// that as fatal for the current operation rather than retrying.
    pub fn alloc(&self) -> Result<Buffer, PipelineError> {
        let storage = {
            let mut state = self.inner.state.lock();
            match state.free.pop() {
                Some(storage) => storage,
                None if state.allocated < self.inner.max_buffers => {
                    state.allocated += 1;
                    vec![0u8; self.inner.buffer_capacity]
                }
                None => {
                    log::warn!(
                        "{} pool exhausted ({} buffers of {} bytes)",
                        self.inner.name,
                        self.inner.max_buffers,
                        self.inner.buffer_capacity
                    );
                    return Err(PipelineError::OutOfMemory);
                }
            }
        };

        Ok(Buffer {
            data: storage,
            size: 0,
            pool: Arc::clone(&self.inner),
            frame_number: 0,
            sample_offset: 0,
            track_number: 0,
            flags: BufferFlags::empty(),
            format: FrameFormat::DsdRaw,
        })
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn buffer_capacity(&self) -> usize {
        self.inner.buffer_capacity
    }

    pub fn max_buffers(&self) -> usize {
        self.inner.max_buffers
    }

    /// Storage blocks created so far (in use plus idle).
    pub fn allocated(&self) -> usize {
        self.inner.state.lock().allocated
    }

    /// Storage blocks sitting idle in the pool.
    pub fn available(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Buffers currently held by callers.
    pub fn in_use(&self) -> usize {
        let state = self.inner.state.lock();
        state.allocated - state.free.len()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.inner.name)
            .field("buffer_capacity", &self.inner.buffer_capacity)
            .field("max_buffers", &self.inner.max_buffers)
            .field("allocated", &self.allocated())
            .finish()
    }
}

/// One unit of audio data moving through the pipeline.
///
/// Move-only; dropping it returns the storage to the pool it came from.
pub struct Buffer {
    data: Vec<u8>,
    size: usize,
    pool: Arc<PoolInner>,

    /// Monotonic within a track, starting at 0.
    pub frame_number: u64,
    /// Position of the first sample of this buffer within the track.
    pub sample_offset: u64,
    /// 1-based source track number.
    pub track_number: u32,
    pub flags: BufferFlags,
    pub format: FrameFormat,
}

impl Buffer {
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn set_size(&mut self, size: usize) -> Result<(), PipelineError> {
        if size > self.data.len() {
            return Err(PipelineError::InvalidArgument(format!(
                "buffer size {} exceeds capacity {}",
                size,
                self.data.len()
            )));
        }
        self.size = size;
        Ok(())
    }

    /// Valid bytes.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.size]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.size]
    }

    /// The whole backing storage, for producers that fill it and then call
    /// [`set_size`](Self::set_size).
    pub fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Replaces the contents with `bytes`.
    pub fn fill_from(&mut self, bytes: &[u8]) -> Result<(), PipelineError> {
        if bytes.len() > self.data.len() {
            return Err(PipelineError::InvalidArgument(format!(
                "{} bytes do not fit a {} byte buffer",
                bytes.len(),
                self.data.len()
            )));
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.size = bytes.len();
        Ok(())
    }

    /// Copies frame number, sample offset, track number and flags from `other`.
    pub fn copy_frame_info_from(&mut self, other: &Buffer) {
        self.frame_number = other.frame_number;
        self.sample_offset = other.sample_offset;
        self.track_number = other.track_number;
        self.flags = other.flags;
    }

    pub fn pool_name(&self) -> &'static str {
        self.pool.name
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let storage = std::mem::take(&mut self.data);
        let mut state = self.pool.state.lock();
        if storage.len() == self.pool.buffer_capacity {
            state.free.push(storage);
        } else {
            state.allocated = state.allocated.saturating_sub(1);
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("pool", &self.pool.name)
            .field("size", &self.size)
            .field("capacity", &self.data.len())
            .field("frame_number", &self.frame_number)
            .field("track_number", &self.track_number)
            .field("flags", &self.flags)
            .field("format", &self.format)
            .finish()
    }
}
