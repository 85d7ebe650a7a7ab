use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use dsdpipe_core::{
    track_filename, AlbumMetadata, AudioFormat, Buffer, PipelineError, Sink, SinkCapabilities, TrackFilenameFormat,
    TrackMetadata,
};

use crate::checksum::sha256_file;
use crate::wav_format::{self, MAX_DATA_SIZE, WAV_HEADER_SIZE};

/// Streaming WAV file writer.
///
/// ```text
/// [44-byte WAV header, sizes zero until close]
/// [interleaved little-endian PCM...]
/// ```
pub struct WavFileWriter {
    file_path: PathBuf,
    file: Option<BufWriter<File>>,
    data_bytes: u64,
}

impl WavFileWriter {
    pub fn new(file_path: PathBuf) -> Self {
        Self {
            file_path,
            file: None,
            data_bytes: 0,
        }
    }

    /// Create the file and write a placeholder header.
    pub fn open(&mut self, format: &AudioFormat) -> Result<(), PipelineError> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| PipelineError::Write(format!("failed to create directory: {}", e)))?;
        }
        let file = File::create(&self.file_path).map_err(|e| {
            PipelineError::Write(format!("failed to create {}: {}", self.file_path.display(), e))
        })?;
        let mut file = BufWriter::new(file);
        file.write_all(&wav_format::generate_header(format, 0))
            .map_err(|e| PipelineError::Write(format!("header write failed: {}", e)))?;

        self.file = Some(file);
        self.data_bytes = 0;
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), PipelineError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| PipelineError::Write("file is not open for writing".into()))?;
        if self.data_bytes + data.len() as u64 > MAX_DATA_SIZE {
            return Err(PipelineError::Write(format!(
                "{} exceeds the 4 GiB WAV limit",
                self.file_path.display()
            )));
        }
        file.write_all(data)
            .map_err(|e| PipelineError::Write(format!("write failed: {}", e)))?;
        self.data_bytes += data.len() as u64;
        Ok(())
    }

    /// Patch the header sizes, close the file and return its SHA-256.
    pub fn close(&mut self) -> Result<String, PipelineError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| PipelineError::Write("file is not open".into()))?;

        let mut header = [0u8; WAV_HEADER_SIZE];
        wav_format::patch_file_size(&mut header, self.data_bytes + WAV_HEADER_SIZE as u64);
        wav_format::patch_data_size(&mut header, self.data_bytes);

        let io = |e: std::io::Error| PipelineError::Write(e.to_string());
        file.seek(SeekFrom::Start(4)).map_err(io)?;
        file.write_all(&header[4..8]).map_err(io)?;
        file.seek(SeekFrom::Start(40)).map_err(io)?;
        file.write_all(&header[40..44]).map_err(io)?;
        file.flush().map_err(io)?;
        drop(file);

        sha256_file(&self.file_path)
    }

    /// PCM bytes written so far, header excluded.
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

/// A finished output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenTrack {
    pub track: u32,
    pub path: PathBuf,
    pub data_bytes: u64,
    pub sha256: String,
}

/// Writes one WAV file per track into the directory given to `open`.
pub struct WavSink {
    filename_format: TrackFilenameFormat,
    dir: Option<PathBuf>,
    format: Option<AudioFormat>,
    current: Option<(u32, WavFileWriter)>,
    written: Vec<WrittenTrack>,
}

impl WavSink {
    pub fn new(filename_format: TrackFilenameFormat) -> Self {
        Self {
            filename_format,
            dir: None,
            format: None,
            current: None,
            written: Vec::new(),
        }
    }

    pub fn written(&self) -> &[WrittenTrack] {
        &self.written
    }

    fn finish_current(&mut self) -> Result<(), PipelineError> {
        let Some((track, mut writer)) = self.current.take() else {
            return Ok(());
        };
        let sha256 = writer.close()?;
        log::info!(
            "wav: track {} -> {} ({} bytes, sha256 {})",
            track,
            writer.file_path().display(),
            writer.data_bytes(),
            sha256
        );
        self.written.push(WrittenTrack {
            track,
            path: writer.file_path().to_path_buf(),
            data_bytes: writer.data_bytes(),
            sha256,
        });
        Ok(())
    }
}

impl Default for WavSink {
    fn default() -> Self {
        Self::new(TrackFilenameFormat::default())
    }
}

impl Sink for WavSink {
    fn name(&self) -> &str {
        "wav"
    }

    fn capabilities(&self) -> SinkCapabilities {
        SinkCapabilities::PCM
    }

    fn open(&mut self, path: &Path, format: &AudioFormat, _album: &AlbumMetadata) -> Result<(), PipelineError> {
        if !format.kind.is_pcm() {
            return Err(PipelineError::Unsupported(format!("WAV cannot hold {:?}", format.kind)));
        }
        fs::create_dir_all(path)
            .map_err(|e| PipelineError::SinkOpen(format!("{}: {}", path.display(), e)))?;
        self.dir = Some(path.to_path_buf());
        self.format = Some(*format);
        self.written.clear();
        Ok(())
    }

    fn track_start(&mut self, track: u32, metadata: &TrackMetadata) -> Result<(), PipelineError> {
        self.finish_current()?;
        let (Some(dir), Some(format)) = (&self.dir, &self.format) else {
            return Err(PipelineError::NotConfigured);
        };
        let name = format!("{}.wav", track_filename(track, metadata, self.filename_format));
        let mut writer = WavFileWriter::new(dir.join(name));
        writer.open(format)?;
        self.current = Some((track, writer));
        Ok(())
    }

    fn write_frame(&mut self, buffer: &Buffer) -> Result<(), PipelineError> {
        let expected = self.format.map(|f| f.kind);
        if expected != Some(buffer.format) {
            return Err(PipelineError::Unsupported(format!(
                "WAV sink opened for {:?} got {:?}",
                expected, buffer.format
            )));
        }
        match self.current.as_mut() {
            Some((_, writer)) => writer.write(buffer.data()),
            None => Err(PipelineError::Write("frame outside of a track".into())),
        }
    }

    fn track_end(&mut self, _track: u32) -> Result<(), PipelineError> {
        self.finish_current()
    }

    fn finalize(&mut self) -> Result<(), PipelineError> {
        self.finish_current()
    }

    fn close(&mut self) {
        if let Some((track, mut writer)) = self.current.take() {
            log::warn!("wav: closing with track {} still open", track);
            if let Err(e) = writer.close() {
                log::warn!("wav: closing track {} failed: {}", track, e);
            }
        }
        self.dir = None;
        self.format = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsdpipe_core::{BufferPool, FrameFormat};

    fn u32_at(data: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
    }

    fn pcm_frame(pool: &BufferPool, bytes: &[u8]) -> Buffer {
        let mut buffer = pool.alloc().unwrap();
        buffer.fill_from(bytes).unwrap();
        buffer.format = FrameFormat::PcmInt16;
        buffer
    }

    #[test]
    fn writer_patches_sizes_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.wav");
        let mut writer = WavFileWriter::new(path.clone());
        writer.open(&AudioFormat::pcm(FrameFormat::PcmInt16, 48_000, 2)).unwrap();
        writer.write(&[0u8; 16]).unwrap();
        writer.write(&[1u8; 8]).unwrap();

        let checksum = writer.close().unwrap();
        assert_eq!(checksum.len(), 64);

        let data = fs::read(&path).unwrap();
        assert_eq!(data.len(), 44 + 24);
        assert_eq!(&data[0..4], b"RIFF");
        assert_eq!(u32_at(&data, 4), 36 + 24);
        assert_eq!(u32_at(&data, 40), 24);
        assert_eq!(checksum, sha256_file(&path).unwrap());
    }

    #[test]
    fn writer_rejects_writes_when_closed() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = WavFileWriter::new(dir.path().join("x.wav"));
        assert!(matches!(writer.write(&[0]), Err(PipelineError::Write(_))));
        assert!(writer.close().is_err());
    }

    #[test]
    fn sink_writes_one_file_per_track() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPool::new("pcm", 64, 4);
        let format = AudioFormat::pcm(FrameFormat::PcmInt16, 88_200, 2);
        let mut sink = WavSink::new(TrackFilenameFormat::NumberTitle);

        sink.open(dir.path(), &format, &AlbumMetadata::default()).unwrap();
        for (track, title) in [(1, "Intro"), (2, "Finale")] {
            sink.track_start(track, &TrackMetadata::new(track, title)).unwrap();
            sink.write_frame(&pcm_frame(&pool, &[0u8; 8])).unwrap();
            sink.track_end(track).unwrap();
        }
        sink.finalize().unwrap();
        sink.close();

        let written = sink.written();
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].path, dir.path().join("01 - Intro.wav"));
        assert_eq!(written[1].path, dir.path().join("02 - Finale.wav"));
        assert!(written.iter().all(|w| w.data_bytes == 8));
        assert_eq!(fs::read(&written[1].path).unwrap().len(), 52);
    }

    #[test]
    fn sink_rejects_foreign_formats() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPool::new("dsd", 64, 4);
        let mut sink = WavSink::default();

        let dsd = AudioFormat::dsd(2_822_400, 2);
        assert!(matches!(
            sink.open(dir.path(), &dsd, &AlbumMetadata::default()),
            Err(PipelineError::Unsupported(_))
        ));

        sink.open(dir.path(), &AudioFormat::pcm(FrameFormat::PcmInt24, 88_200, 2), &AlbumMetadata::default())
            .unwrap();
        sink.track_start(1, &TrackMetadata::new(1, "A")).unwrap();
        let result = sink.write_frame(&pcm_frame(&pool, &[0u8; 4]));
        assert!(matches!(result, Err(PipelineError::Unsupported(_))));
    }

    #[test]
    fn finalize_closes_an_unfinished_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = WavSink::default();
        sink.open(dir.path(), &AudioFormat::pcm(FrameFormat::PcmInt16, 44_100, 1), &AlbumMetadata::default())
            .unwrap();
        sink.track_start(3, &TrackMetadata::new(3, "")).unwrap();
        sink.finalize().unwrap();
        assert_eq!(sink.written()[0].path, dir.path().join("03 - Track 03.wav"));
    }

    #[test]
    fn close_patches_a_track_left_open() {
        let dir = tempfile::tempdir().unwrap();
        let pool = BufferPool::new("pcm", 64, 4);
        let mut sink = WavSink::default();
        sink.open(dir.path(), &AudioFormat::pcm(FrameFormat::PcmInt16, 44_100, 2), &AlbumMetadata::default())
            .unwrap();
        sink.track_start(1, &TrackMetadata::new(1, "Cut")).unwrap();
        sink.write_frame(&pcm_frame(&pool, &[7u8; 12])).unwrap();
        sink.close();

        let data = fs::read(dir.path().join("01 - Cut.wav")).unwrap();
        assert_eq!(data.len(), 44 + 12);
        assert_eq!(u32_at(&data, 4), 36 + 12);
        assert_eq!(u32_at(&data, 40), 12);
        assert!(sink.written().is_empty());
    }
}
