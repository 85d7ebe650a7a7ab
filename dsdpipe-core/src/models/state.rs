use serde::{Deserialize, Serialize};

/// Pipeline lifecycle.
///
/// State transitions:
/// ```text
/// created → configured → running → finished / error
///              ↑                        │
///              └──────── reset ─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    #[default]
    Created,
    Configured,
    Running,
    Finished,
    Error,
}

impl PipelineState {
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

/// Snapshot of how far a run has progressed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Source track number currently being processed.
    pub track_number: u32,
    /// Zero-based position of the current track within the selection.
    pub track_index: usize,
    /// Number of tracks selected for this run.
    pub track_count: usize,
    pub track_title: String,
    pub frames_done: u64,
    /// Exact or estimated frame count for the current track.
    pub frames_total: u64,
    /// 0–100 within the current track.
    pub track_percent: f64,
    /// 0–100 across the whole selection.
    pub total_percent: f64,
}

impl Progress {
    /// Recomputes both percentages from the frame counters.
    pub fn update_percentages(&mut self) {
        let track_fraction = if self.frames_total > 0 {
            (self.frames_done as f64 / self.frames_total as f64).min(1.0)
        } else {
            0.0
        };
        self.track_percent = track_fraction * 100.0;
        self.total_percent = if self.track_count > 0 {
            (self.track_index as f64 + track_fraction) / self.track_count as f64 * 100.0
        } else {
            0.0
        };
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub tracks_completed: usize,
    pub frames_processed: u64,
    pub pcm_buffers_written: u64,
    pub elapsed_ms: u64,
}
