use std::path::Path;

use crate::models::error::PipelineError;
use crate::models::format::AudioFormat;
use crate::models::metadata::{AlbumMetadata, TrackMetadata};
use crate::processing::buffer_pool::Buffer;

/// Outcome of a successful [`Source::read_frame`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The buffer now holds one frame.
    Frame,
    /// The current track has no more frames; the buffer is untouched.
    Eof,
}

/// Where audio comes from: an SACD image, a DSDIFF or DSF file, or a test generator.
///
/// Implemented by:
/// - `SyntheticSource` (dsdpipe-plugins)
/// - SACD ISO, DSDIFF and DSF readers
///
/// Only the reader thread calls `seek_track`/`read_frame` during a run;
/// metadata queries happen on the pipeline thread between tracks.
pub trait Source: Send {
    /// Short name for logs, e.g. `"sacd"`.
    fn name(&self) -> &str;

    fn open(&mut self, path: &Path) -> Result<(), PipelineError>;

    fn close(&mut self);

    fn track_count(&self) -> u32;

    fn format(&self) -> AudioFormat;

    /// Positions the stream at the first frame of `track` (1-based).
    fn seek_track(&mut self, track: u32) -> Result<(), PipelineError>;

    /// Fills `buffer` with the next frame of the current track and sets its
    /// size and format. Frame numbering and flags are assigned by the caller.
    fn read_frame(&mut self, buffer: &mut Buffer) -> Result<ReadStatus, PipelineError>;

    fn album_metadata(&self) -> Result<AlbumMetadata, PipelineError>;

    fn track_metadata(&self, track: u32) -> Result<TrackMetadata, PipelineError>;

    /// Frame count of `track`, exact or estimated. Only drives progress
    /// reporting, never bounds reads.
    fn track_frames(&self, _track: u32) -> Option<u64> {
        None
    }
}
