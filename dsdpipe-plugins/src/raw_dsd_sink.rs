use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use dsdpipe_core::{
    album_folder_name, track_filename, AlbumFolderFormat, AlbumMetadata, AudioFormat, Buffer, FrameFormat,
    PipelineError, Sink, SinkCapabilities, TrackFilenameFormat, TrackMetadata,
};
use serde::{Deserialize, Serialize};

/// Where a track sits inside an edit-master file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMarker {
    pub track: u32,
    pub title: String,
    pub start_frame: u64,
    pub frame_count: u64,
    pub byte_offset: u64,
}

/// Dumps DSD (or passed-through DST) frames to disk unmodified.
///
/// Per-track mode writes `<dir>/<track name>.dsd`. Edit-master mode writes the
/// whole selection to `<dir>/<album name>.dsd` with a `.markers.json` index.
pub struct RawDsdSink {
    filename_format: TrackFilenameFormat,
    edit_master: bool,
    accept_dst: bool,
    dir: Option<PathBuf>,
    kind: Option<FrameFormat>,
    file: Option<(PathBuf, BufWriter<File>)>,
    bytes: u64,
    frames: u64,
    current: Option<TrackMarker>,
    markers: Vec<TrackMarker>,
    files: Vec<PathBuf>,
}

impl RawDsdSink {
    pub fn new(filename_format: TrackFilenameFormat) -> Self {
        Self {
            filename_format,
            edit_master: false,
            accept_dst: false,
            dir: None,
            kind: None,
            file: None,
            bytes: 0,
            frames: 0,
            current: None,
            markers: Vec::new(),
            files: Vec::new(),
        }
    }

    /// One file for the whole run instead of one per track.
    pub fn edit_master(mut self, enabled: bool) -> Self {
        self.edit_master = enabled;
        self
    }

    /// Also accept DST frames, written as-is to `.dst` files.
    pub fn accept_dst(mut self, enabled: bool) -> Self {
        self.accept_dst = enabled;
        self
    }

    pub fn markers(&self) -> &[TrackMarker] {
        &self.markers
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    fn extension(&self) -> &'static str {
        match self.kind {
            Some(FrameFormat::Dst) => "dst",
            _ => "dsd",
        }
    }

    fn create(&mut self, stem: &str) -> Result<(), PipelineError> {
        let dir = self.dir.as_ref().ok_or(PipelineError::NotConfigured)?;
        let path = dir.join(format!("{}.{}", stem, self.extension()));
        let file = File::create(&path)
            .map_err(|e| PipelineError::Write(format!("failed to create {}: {}", path.display(), e)))?;
        self.file = Some((path, BufWriter::new(file)));
        self.bytes = 0;
        Ok(())
    }

    fn finish_file(&mut self) -> Result<(), PipelineError> {
        if let Some((path, mut file)) = self.file.take() {
            file.flush()
                .map_err(|e| PipelineError::Write(format!("{}: {}", path.display(), e)))?;
            log::debug!("raw: wrote {} ({} bytes)", path.display(), self.bytes);
            self.files.push(path);
        }
        Ok(())
    }

    fn write_markers(&self) -> Result<(), PipelineError> {
        let Some(path) = self.files.last() else {
            return Ok(());
        };
        let markers_path = path.with_extension("markers.json");
        let json = serde_json::to_string_pretty(&self.markers)
            .map_err(|e| PipelineError::Write(format!("failed to serialize markers: {}", e)))?;
        fs::write(&markers_path, json)
            .map_err(|e| PipelineError::Write(format!("failed to write markers: {}", e)))
    }
}

impl Sink for RawDsdSink {
    fn name(&self) -> &str {
        "raw-dsd"
    }

    fn capabilities(&self) -> SinkCapabilities {
        let mut caps = SinkCapabilities::DSD;
        if self.accept_dst {
            caps |= SinkCapabilities::DST;
        }
        if self.edit_master {
            caps |= SinkCapabilities::MARKERS | SinkCapabilities::MULTI_TRACK;
        }
        caps
    }

    fn open(&mut self, path: &Path, format: &AudioFormat, album: &AlbumMetadata) -> Result<(), PipelineError> {
        if !self.capabilities().accepts(format.kind) {
            return Err(PipelineError::Unsupported(format!("raw sink cannot store {:?}", format.kind)));
        }
        fs::create_dir_all(path)
            .map_err(|e| PipelineError::SinkOpen(format!("{}: {}", path.display(), e)))?;

        self.dir = Some(path.to_path_buf());
        self.kind = Some(format.kind);
        self.frames = 0;
        self.markers.clear();
        self.files.clear();

        if self.edit_master {
            let stem = album_folder_name(album, AlbumFolderFormat::ArtistTitle);
            self.create(&stem)?;
        }
        Ok(())
    }

    fn track_start(&mut self, track: u32, metadata: &TrackMetadata) -> Result<(), PipelineError> {
        if !self.edit_master {
            self.finish_file()?;
            let stem = track_filename(track, metadata, self.filename_format);
            self.create(&stem)?;
        }
        self.current = Some(TrackMarker {
            track,
            title: metadata.title.clone(),
            start_frame: self.frames,
            frame_count: 0,
            byte_offset: self.bytes,
        });
        Ok(())
    }

    fn write_frame(&mut self, buffer: &Buffer) -> Result<(), PipelineError> {
        if self.kind != Some(buffer.format) {
            return Err(PipelineError::Unsupported(format!(
                "raw sink opened for {:?} got {:?}",
                self.kind, buffer.format
            )));
        }
        let (path, file) = self
            .file
            .as_mut()
            .ok_or_else(|| PipelineError::Write("frame outside of a track".into()))?;
        file.write_all(buffer.data())
            .map_err(|e| PipelineError::Write(format!("{}: {}", path.display(), e)))?;

        self.bytes += buffer.size() as u64;
        self.frames += 1;
        if let Some(marker) = self.current.as_mut() {
            marker.frame_count += 1;
        }
        Ok(())
    }

    fn track_end(&mut self, _track: u32) -> Result<(), PipelineError> {
        if let Some(marker) = self.current.take() {
            self.markers.push(marker);
        }
        if self.edit_master {
            Ok(())
        } else {
            self.finish_file()
        }
    }

    fn finalize(&mut self) -> Result<(), PipelineError> {
        if let Some(marker) = self.current.take() {
            self.markers.push(marker);
        }
        self.finish_file()?;
        if self.edit_master {
            self.write_markers()?;
        }
        Ok(())
    }

    fn close(&mut self) {
        self.file = None;
        self.dir = None;
        self.kind = None;
    }
}
