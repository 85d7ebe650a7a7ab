use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::processing::frame_queue::FrameQueue;

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The queue and reader of the track currently in flight.
struct ActiveTrack {
    queue: Arc<FrameQueue>,
    reader: CancelToken,
}

/// Cancels a running pipeline from any thread.
///
/// Besides raising the pipeline's flag it wakes the frame queue and stops the
/// reader thread of the track in flight, so a blocked pop or read returns
/// without the caller touching either directly.
#[derive(Clone)]
pub struct CancelHandle {
    token: CancelToken,
    active: Arc<Mutex<Option<ActiveTrack>>>,
}

impl CancelHandle {
    pub(crate) fn new() -> Self {
        Self {
            token: CancelToken::new(),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
        if let Some(active) = self.active.lock().as_ref() {
            active.reader.cancel();
            active.queue.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> CancelToken {
        self.token.clone()
    }

    pub(crate) fn clear(&self) {
        self.token.clear();
    }

    /// Routes future cancels into `queue` and `reader`. If a cancel already
    /// happened, they are cancelled immediately.
    pub(crate) fn attach(&self, queue: Arc<FrameQueue>, reader: CancelToken) {
        let mut active = self.active.lock();
        if self.token.is_cancelled() {
            reader.cancel();
            queue.cancel();
        }
        *active = Some(ActiveTrack { queue, reader });
    }

    pub(crate) fn detach(&self) {
        self.active.lock().take();
    }
}
