use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dsdpipe_core::{
    AlbumMetadata, AudioFormat, Buffer, PipelineError, Sink, SinkCapabilities, TrackMetadata,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON sidecar describing one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumReport {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub source_format: AudioFormat,
    pub album: AlbumMetadata,
    pub tracks: Vec<TrackEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackEntry {
    /// Number the track was written under.
    pub number: u32,
    pub metadata: TrackMetadata,
    /// `false` when the run stopped inside this track.
    pub completed: bool,
}

/// Writes an [`AlbumReport`] to the path given to `open` when the run finalizes.
///
/// Takes no audio; frames routed to it are ignored.
#[derive(Default)]
pub struct MetadataSink {
    path: Option<PathBuf>,
    report: Option<AlbumReport>,
    /// Track the pipeline reported as stopped early.
    aborted: Option<u32>,
}

impl MetadataSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a sidecar back.
    pub fn read(path: &Path) -> Result<AlbumReport, PipelineError> {
        let json = fs::read_to_string(path)
            .map_err(|e| PipelineError::Read(format!("failed to read metadata: {}", e)))?;
        serde_json::from_str(&json).map_err(|e| PipelineError::Read(format!("failed to parse metadata: {}", e)))
    }

    fn report_mut(&mut self) -> Result<&mut AlbumReport, PipelineError> {
        self.report.as_mut().ok_or(PipelineError::NotConfigured)
    }
}

impl Sink for MetadataSink {
    fn name(&self) -> &str {
        "metadata"
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::METADATA | SinkCapabilities::MARKERS
    }

    fn open(&mut self, path: &Path, format: &AudioFormat, album: &AlbumMetadata) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::SinkOpen(format!("{}: {}", parent.display(), e)))?;
        }
        self.path = Some(path.to_path_buf());
        self.aborted = None;
        self.report = Some(AlbumReport {
            run_id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            source_format: *format,
            album: album.clone(),
            tracks: Vec::new(),
        });
        Ok(())
    }

    fn track_start(&mut self, track: u32, metadata: &TrackMetadata) -> Result<(), PipelineError> {
        self.report_mut()?.tracks.push(TrackEntry {
            number: track,
            metadata: metadata.clone(),
            completed: false,
        });
        Ok(())
    }

    fn write_frame(&mut self, _buffer: &Buffer) -> Result<(), PipelineError> {
        Ok(())
    }

    fn track_aborted(&mut self, track: u32) {
        self.aborted = Some(track);
    }

    fn track_end(&mut self, track: u32) -> Result<(), PipelineError> {
        let completed = self.aborted.take() != Some(track);
        let report = self.report_mut()?;
        if let Some(entry) = report.tracks.iter_mut().rev().find(|t| t.number == track) {
            entry.completed = completed;
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), PipelineError> {
        let (Some(path), Some(report)) = (&self.path, &self.report) else {
            return Err(PipelineError::NotConfigured);
        };
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| PipelineError::Write(format!("failed to serialize metadata: {}", e)))?;
        fs::write(path, json).map_err(|e| PipelineError::Write(format!("failed to write metadata: {}", e)))?;
        log::info!("metadata: {} tracks -> {}", report.tracks.len(), path.display());
        Ok(())
    }

    fn close(&mut self) {
        self.path = None;
        self.report = None;
        self.aborted = None;
    }
}
