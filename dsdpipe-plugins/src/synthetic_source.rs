use std::path::Path;

use dsdpipe_core::{
    AlbumMetadata, AudioFormat, Buffer, PipelineError, ReadStatus, Source, TrackMetadata, DSD64_SAMPLE_RATE,
};

use crate::dsd_to_pcm::DSD_IDLE_BYTE;

/// Bit pattern a [`SyntheticSource`] generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Pattern {
    /// DSD silence.
    #[default]
    Idle,
    /// Full-scale 1-bit square wave at `frequency` Hz, continuous across frames.
    Square { frequency: u32 },
}

/// Generates DSD frames without touching disk.
///
/// Useful for exercising sinks and converters, and as the reference
/// implementation of [`Source`]. Defaults to DSD64 stereo silence.
pub struct SyntheticSource {
    track_frames: Vec<u64>,
    format: AudioFormat,
    pattern: Pattern,
    album_title: Option<String>,
    opened: Option<String>,
    current: u32,
    position: u64,
}

impl SyntheticSource {
    /// One track per entry, each `track_frames[i]` frames long.
    pub fn new(track_frames: Vec<u64>) -> Self {
        Self {
            track_frames,
            format: AudioFormat::dsd(DSD64_SAMPLE_RATE, 2),
            pattern: Pattern::Idle,
            album_title: None,
            opened: None,
            current: 0,
            position: 0,
        }
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_album_title(mut self, title: impl Into<String>) -> Self {
        self.album_title = Some(title.into());
        self
    }

    fn check_track(&self, track: u32) -> Result<u64, PipelineError> {
        if track == 0 {
            return Err(PipelineError::TrackNotFound(track));
        }
        self.track_frames
            .get(track as usize - 1)
            .copied()
            .ok_or(PipelineError::TrackNotFound(track))
    }

    fn fill(&self, out: &mut [u8]) {
        let channels = self.format.channel_count.max(1) as usize;
        match self.pattern {
            Pattern::Idle => out.fill(DSD_IDLE_BYTE),
            Pattern::Square { frequency } => {
                let half_period = u64::from((self.format.sample_rate / frequency.max(1) / 2).max(1));
                let bytes_per_channel = (out.len() / channels) as u64;
                let first_bit = self.position * bytes_per_channel * 8;
                for (index, group) in out.chunks_exact_mut(channels).enumerate() {
                    let bit = first_bit + index as u64 * 8;
                    let mut byte = 0u8;
                    for i in 0..8 {
                        if ((bit + i) / half_period) % 2 == 0 {
                            byte |= 0x80 >> i;
                        }
                    }
                    group.fill(byte);
                }
            }
        }
    }
}

impl Source for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn open(&mut self, path: &Path) -> Result<(), PipelineError> {
        if self.format.channel_count == 0 || self.format.sample_rate == 0 {
            return Err(PipelineError::InvalidArgument(format!("unusable format {:?}", self.format)));
        }
        let title = self.album_title.clone().unwrap_or_else(|| {
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });
        self.opened = Some(title);
        self.current = 0;
        self.position = 0;
        log::debug!("synthetic: {} tracks, {:?}", self.track_frames.len(), self.format);
        Ok(())
    }

    fn close(&mut self) {
        self.opened = None;
        self.current = 0;
    }

    fn track_count(&self) -> u32 {
        self.track_frames.len() as u32
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn seek_track(&mut self, track: u32) -> Result<(), PipelineError> {
        if self.opened.is_none() {
            return Err(PipelineError::NotConfigured);
        }
        self.check_track(track)?;
        self.current = track;
        self.position = 0;
        Ok(())
    }

    fn read_frame(&mut self, buffer: &mut Buffer) -> Result<ReadStatus, PipelineError> {
        let frames = self.check_track(self.current).map_err(|_| PipelineError::NotConfigured)?;
        if self.position >= frames {
            return Ok(ReadStatus::Eof);
        }

        let size = self.format.dsd_frame_bytes();
        let storage = buffer.storage_mut();
        if storage.len() < size {
            return Err(PipelineError::Read(format!(
                "{}-byte frame does not fit a {}-byte buffer",
                size,
                storage.len()
            )));
        }
        self.fill(&mut storage[..size]);
        buffer.set_size(size)?;
        buffer.format = self.format.kind;
        self.position += 1;
        Ok(ReadStatus::Frame)
    }

    fn album_metadata(&self) -> Result<AlbumMetadata, PipelineError> {
        let title = self.opened.clone().ok_or(PipelineError::NotConfigured)?;
        Ok(AlbumMetadata {
            title,
            artist: "dsdpipe".into(),
            disc_number: 1,
            disc_total: 1,
            track_total: self.track_count(),
            ..Default::default()
        })
    }

    fn track_metadata(&self, track: u32) -> Result<TrackMetadata, PipelineError> {
        let frames = self.check_track(track)?;
        Ok(TrackMetadata {
            frame_count: Some(frames),
            ..TrackMetadata::new(track, format!("Track {}", track))
        })
    }

    fn track_frames(&self, track: u32) -> Option<u64> {
        self.check_track(track).ok()
    }
}
