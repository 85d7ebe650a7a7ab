use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

use crate::models::error::PipelineError;
use crate::processing::buffer_pool::Buffer;

/// Bounded hand-off queue between the reader thread and the pipeline thread.
///
/// One producer pushes frames, one consumer pops them in batches. A batch
/// never spans two tracks: popping stops right after a frame pushed with
/// `is_last = true`. `eof` and `cancelled` only ever go from false to true
/// until [`reset`](Self::reset) is called.
pub struct FrameQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

struct QueueState {
    frames: VecDeque<QueuedFrame>,
    eof: bool,
    cancelled: bool,
}

struct QueuedFrame {
    buffer: Buffer,
    is_last: bool,
}

/// Result of [`FrameQueue::pop_batch`].
#[derive(Debug, Default)]
pub struct Batch {
    pub buffers: Vec<Buffer>,
    /// The last buffer in `buffers` ends its track.
    pub track_complete: bool,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                eof: false,
                cancelled: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Enqueues a frame, blocking while the queue is full.
    ///
    /// Returns `Cancelled` (and releases the buffer) once the queue is cancelled.
    pub fn push(&self, buffer: Buffer, is_last: bool) -> Result<(), PipelineError> {
        let mut state = self.state.lock();
        while state.frames.len() >= self.capacity && !state.cancelled {
            self.not_full.wait(&mut state);
        }
        if state.cancelled {
            return Err(PipelineError::Cancelled);
        }
        state.frames.push_back(QueuedFrame { buffer, is_last });
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues up to `max_count` frames.
    ///
    /// Blocks while the queue is empty and neither EOF nor cancellation has
    /// been signalled. An empty batch with `track_complete == false` means EOF
    /// with nothing left to read.
    pub fn pop_batch(&self, max_count: usize) -> Result<Batch, PipelineError> {
        if max_count == 0 {
            return Err(PipelineError::InvalidArgument("batch size must be positive".into()));
        }

        let mut state = self.state.lock();
        while state.frames.is_empty() && !state.eof && !state.cancelled {
            self.not_empty.wait(&mut state);
        }
        if state.cancelled {
            return Err(PipelineError::Cancelled);
        }

        let mut batch = Batch {
            buffers: Vec::with_capacity(max_count.min(state.frames.len())),
            track_complete: false,
        };
        while batch.buffers.len() < max_count {
            let Some(frame) = state.frames.pop_front() else {
                break;
            };
            batch.buffers.push(frame.buffer);
            if frame.is_last {
                batch.track_complete = true;
                break;
            }
        }
        drop(state);

        if !batch.is_empty() {
            self.not_full.notify_all();
        }
        Ok(batch)
    }

    /// Marks the end of the stream and wakes any waiting consumer. Idempotent.
    pub fn signal_eof(&self) {
        self.state.lock().eof = true;
        self.not_empty.notify_all();
    }

    /// Aborts all current and future push/pop calls. Idempotent.
    pub fn cancel(&self) {
        self.state.lock().cancelled = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Drops queued frames (returning them to their pool) and clears the
    /// EOF and cancelled flags so the queue can carry the next track.
    pub fn reset(&self) {
        let drained: Vec<QueuedFrame> = {
            let mut state = self.state.lock();
            state.eof = false;
            state.cancelled = false;
            state.frames.drain(..).collect()
        };
        if !drained.is_empty() {
            log::debug!("frame queue reset released {} buffers", drained.len());
        }
        drop(drained);
        self.not_full.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_eof(&self) -> bool {
        self.state.lock().eof
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}
