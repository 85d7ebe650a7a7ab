use std::path::Path;

use crate::models::error::PipelineError;
use crate::models::format::{AudioFormat, SinkCapabilities};
use crate::models::metadata::{AlbumMetadata, TrackMetadata};
use crate::processing::buffer_pool::Buffer;

/// Where converted audio and metadata go.
///
/// A run calls `open`, then `track_start` / `write_frame`* / `track_end` once
/// per selected track, then `finalize` and `close`. Sinks must not keep the
/// buffer passed to `write_frame` beyond the call.
///
/// `MULTI_TRACK` sinks keep one file open for the whole run and receive
/// sequential track numbers (1, 2, …) instead of source track numbers.
pub trait Sink: Send {
    /// Short name for logs, e.g. `"wav"`.
    fn name(&self) -> &str;

    fn capabilities(&self) -> SinkCapabilities;

    /// Prepares output at `path` for a stream in `format`.
    fn open(
        &mut self,
        path: &Path,
        format: &AudioFormat,
        album: &AlbumMetadata,
    ) -> Result<(), PipelineError>;

    fn track_start(&mut self, track: u32, metadata: &TrackMetadata) -> Result<(), PipelineError>;

    fn write_frame(&mut self, buffer: &Buffer) -> Result<(), PipelineError>;

    /// Called for every started track, including ones that stopped early.
    fn track_end(&mut self, track: u32) -> Result<(), PipelineError>;

    /// The track stopped on an error or cancel. Called right before its `track_end`.
    fn track_aborted(&mut self, _track: u32) {}

    /// Flushes headers, indexes and sidecars. Called once after the last track,
    /// whether or not the run succeeded.
    fn finalize(&mut self) -> Result<(), PipelineError>;

    fn close(&mut self);
}
