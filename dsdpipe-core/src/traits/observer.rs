use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::PipelineError;
use crate::models::state::{PipelineState, Progress};

/// Event delegate for pipeline notifications.
///
/// All methods are called from the thread running [`Pipeline::run`](crate::Pipeline::run).
/// Implementations should marshal to a UI thread if needed.
pub trait PipelineObserver: Send + Sync {
    /// Called when the pipeline state changes.
    fn on_state_changed(&self, _state: PipelineState) {}

    /// Called before the first frame of each track.
    fn on_track_started(&self, _progress: &Progress) {}

    /// Called after every processed batch. Returning `Break` cancels the run.
    fn on_progress(&self, _progress: &Progress) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Called after each track, with its outcome.
    fn on_track_finished(&self, _track: u32, _result: &Result<(), PipelineError>) {}

    /// Called when a run stops on an error (including cancellation).
    fn on_error(&self, _error: &PipelineError) {}
}

struct ProgressFn<F>(Mutex<F>);

impl<F> PipelineObserver for ProgressFn<F>
where
    F: FnMut(&Progress) -> ControlFlow<()> + Send,
{
    fn on_progress(&self, progress: &Progress) -> ControlFlow<()> {
        let mut callback = self.0.lock();
        (*callback)(progress)
    }
}

/// Wraps a progress closure as an observer.
pub fn progress_fn<F>(callback: F) -> Arc<dyn PipelineObserver>
where
    F: FnMut(&Progress) -> ControlFlow<()> + Send + 'static,
{
    Arc::new(ProgressFn(Mutex::new(callback)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closure_observer_counts_and_cancels() {
        let mut calls = 0;
        let observer = progress_fn(move |p: &Progress| {
            calls += 1;
            if calls >= 2 || p.total_percent >= 100.0 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        let progress = Progress::default();
        assert_eq!(observer.on_progress(&progress), ControlFlow::Continue(()));
        assert_eq!(observer.on_progress(&progress), ControlFlow::Break(()));
        // Other callbacks default to no-ops.
        observer.on_state_changed(PipelineState::Running);
    }
}
