use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::models::config::{DsdOptions, PcmSettings, PipelineConfig};
use crate::models::error::PipelineError;
use crate::models::format::{AudioFormat, BufferFlags, SinkCapabilities, SACD_FRAME_RATE};
use crate::models::metadata::{AlbumMetadata, TrackMetadata};
use crate::models::state::{PipelineState, Progress, RunSummary};
use crate::processing::buffer_pool::{Buffer, BufferPool};
use crate::processing::frame_queue::FrameQueue;
use crate::processing::track_selection::TrackSelection;
use crate::session::cancel::CancelHandle;
use crate::session::reader::{ReaderThread, SharedSource};
use crate::storage::naming::{self, AlbumFolderFormat, TrackFilenameFormat};
use crate::traits::observer::PipelineObserver;
use crate::traits::sink::Sink;
use crate::traits::source::Source;
use crate::traits::transform::{NoTransforms, Transform, TransformFactory};

/// Maximum number of sinks attached to one pipeline.
pub const MAX_SINKS: usize = 8;
/// Frames popped from the queue and converted together.
pub const BATCH_SIZE: usize = 16;
/// Frames the reader may run ahead of the converter.
pub const FRAME_QUEUE_CAPACITY: usize = 64;

/// Progress estimate for sources that cannot report a track's length.
const FALLBACK_TRACK_FRAMES: u64 = SACD_FRAME_RATE as u64 * 60 * 5;

// Queue contents, reader look-ahead, a raw batch, its decoded copy, slack.
const DSD_POOL_BUFFERS: usize = FRAME_QUEUE_CAPACITY + 3 * BATCH_SIZE + 4;
// One converted batch plus the track-end flush, twice over.
const PCM_POOL_BUFFERS: usize = 2 * BATCH_SIZE + 4;
const PCM_CAPACITY_FACTOR: usize = 4;

/// Which stream a sink is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Undecoded DST frames straight from the source.
    Dst,
    /// Raw DSD, decoded from DST when necessary.
    Dsd,
    Pcm,
    /// Metadata callbacks only.
    None,
}

impl Route {
    /// Routes each sink on its own: a DST source gets a decoder as soon as any
    /// sink needs DSD or PCM, even when another sink takes DST directly.
    /// `None` when the sink can take no stream this source can produce.
    fn for_sink(caps: SinkCapabilities, source_is_dst: bool, keep_dst: bool) -> Option<Self> {
        let dst = caps.contains(SinkCapabilities::DST);
        let dsd = caps.contains(SinkCapabilities::DSD);
        if source_is_dst && dst && (keep_dst || !dsd) {
            Some(Self::Dst)
        } else if dsd {
            Some(Self::Dsd)
        } else if caps.contains(SinkCapabilities::PCM) {
            Some(Self::Pcm)
        } else if dst {
            None
        } else {
            Some(Self::None)
        }
    }
}

struct SinkSlot {
    sink: Box<dyn Sink>,
    path: PathBuf,
    caps: SinkCapabilities,
    route: Route,
    open: bool,
}

impl SinkSlot {
    /// Edit-master style sinks number tracks by position in the selection.
    fn track_number(&self, track: u32, sequence: u32) -> u32 {
        if self.caps.contains(SinkCapabilities::MULTI_TRACK) {
            sequence
        } else {
            track
        }
    }
}

/// Drives one source through optional transforms into a set of sinks.
///
/// Frame flow for one track:
/// ```text
/// [Source] → reader thread → [FrameQueue] → batch of ≤16 frames
///     ├→ DST sinks (keep_dst)
///     ├→ [DST decoder]? → DSD sinks
///     └→ [DSD→PCM] → PCM sinks
/// ```
///
/// Transforms are picked from the sinks' capabilities at the start of every
/// [`run`](Self::run). `run` blocks the calling thread; use
/// [`cancel_handle`](Self::cancel_handle) or an observer to stop it.
pub struct Pipeline {
    state: PipelineState,
    last_error: Option<PipelineError>,
    cancel: CancelHandle,

    source: Option<SharedSource>,
    source_path: Option<PathBuf>,
    source_format: Option<AudioFormat>,
    track_count: u32,

    sinks: Vec<SinkSlot>,
    transforms: Arc<dyn TransformFactory>,
    dst_decoder: Option<Box<dyn Transform>>,
    dsd_to_pcm: Option<Box<dyn Transform>>,

    pcm_settings: PcmSettings,
    dsd_options: DsdOptions,
    track_filename_format: TrackFilenameFormat,
    album_folder_format: AlbumFolderFormat,
    selection: TrackSelection,

    dsd_pool: Option<BufferPool>,
    pcm_pool: Option<BufferPool>,

    observer: Option<Arc<dyn PipelineObserver>>,
    progress: Progress,
    summary: RunSummary,
}

impl Pipeline {
    /// A pipeline without codecs: DSD sinks only.
    pub fn new() -> Self {
        Self::with_transforms(Arc::new(NoTransforms))
    }

    pub fn with_transforms(transforms: Arc<dyn TransformFactory>) -> Self {
        Self {
            state: PipelineState::Created,
            last_error: None,
            cancel: CancelHandle::new(),
            source: None,
            source_path: None,
            source_format: None,
            track_count: 0,
            sinks: Vec::new(),
            transforms,
            dst_decoder: None,
            dsd_to_pcm: None,
            pcm_settings: PcmSettings::default(),
            dsd_options: DsdOptions::default(),
            track_filename_format: TrackFilenameFormat::default(),
            album_folder_format: AlbumFolderFormat::default(),
            selection: TrackSelection::new(),
            dsd_pool: None,
            pcm_pool: None,
            observer: None,
            progress: Progress::default(),
            summary: RunSummary::default(),
        }
    }

    pub fn set_observer(&mut self, observer: Arc<dyn PipelineObserver>) {
        self.observer = Some(observer);
    }

    // --- Configuration ---

    /// Opens `source` at `path` and makes it the pipeline's input.
    ///
    /// Any previous source is closed first and the track selection is cleared.
    pub fn set_source(&mut self, mut source: Box<dyn Source>, path: impl AsRef<Path>) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        let path = path.as_ref();

        if let Some(previous) = self.source.take() {
            previous.lock().close();
            self.source_path = None;
            self.source_format = None;
            self.track_count = 0;
        }
        self.selection.clear();

        if let Err(e) = source.open(path) {
            let error = match e {
                PipelineError::SourceOpen(_) => e,
                other => PipelineError::SourceOpen(format!("{}: {}", path.display(), other)),
            };
            self.set_state(PipelineState::Created);
            return Err(self.reject(error));
        }

        let format = source.format();
        self.track_count = source.track_count();
        log::info!(
            "opened {} source {}: {} tracks, {:?} {} Hz, {} channels",
            source.name(),
            path.display(),
            self.track_count,
            format.kind,
            format.sample_rate,
            format.channel_count
        );
        self.source = Some(Arc::new(Mutex::new(source)));
        self.source_path = Some(path.to_path_buf());
        self.source_format = Some(format);
        self.set_state(PipelineState::Configured);
        Ok(())
    }

    /// Attaches a sink that will write to `path` when the run opens it.
    pub fn add_sink(&mut self, sink: Box<dyn Sink>, path: impl Into<PathBuf>) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        if self.sinks.len() >= MAX_SINKS {
            return Err(PipelineError::InvalidArgument(format!(
                "at most {} sinks per pipeline",
                MAX_SINKS
            )));
        }
        let caps = sink.capabilities();
        log::debug!("added {} sink ({:?})", sink.name(), caps);
        self.sinks.push(SinkSlot {
            sink,
            path: path.into(),
            caps,
            route: Route::None,
            open: false,
        });
        Ok(())
    }

    pub fn set_pcm_settings(&mut self, settings: PcmSettings) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        if settings.sample_rate == Some(0) {
            return Err(PipelineError::InvalidArgument("PCM sample rate must be positive".into()));
        }
        self.pcm_settings = settings;
        Ok(())
    }

    pub fn set_dsd_options(&mut self, options: DsdOptions) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.dsd_options = options;
        Ok(())
    }

    pub fn set_track_filename_format(&mut self, format: TrackFilenameFormat) {
        self.track_filename_format = format;
    }

    pub fn set_album_folder_format(&mut self, format: AlbumFolderFormat) {
        self.album_folder_format = format;
    }

    /// Copies PCM, DSD and naming options and applies the track spec against
    /// the attached source.
    pub fn apply_config(&mut self, config: &PipelineConfig) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        config.validate().map_err(PipelineError::InvalidArgument)?;
        if self.source.is_none() {
            return Err(PipelineError::NoSource);
        }
        self.select_tracks(&config.track_spec)?;
        self.pcm_settings = config.pcm;
        self.dsd_options = config.dsd;
        self.track_filename_format = config.track_filename_format;
        self.album_folder_format = config.album_folder_format;
        Ok(())
    }

    // --- Track selection ---

    /// Replaces the selection with `spec`, e.g. `"all"` or `"1-3,5"`.
    pub fn select_tracks(&mut self, spec: &str) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.ensure_source()?;
        self.selection = TrackSelection::parse(spec, self.track_count)?;
        Ok(())
    }

    /// Replaces the selection with `tracks`, keeping order and dropping duplicates.
    pub fn select_track_list(&mut self, tracks: &[u32]) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.ensure_source()?;
        let mut selection = TrackSelection::new();
        for &track in tracks {
            selection.add(track, self.track_count)?;
        }
        self.selection = selection;
        Ok(())
    }

    pub fn select_all_tracks(&mut self) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.ensure_source()?;
        self.selection = TrackSelection::all(self.track_count);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Selected tracks in processing order. Empty means "all" at run time.
    pub fn selected_tracks(&self) -> &[u32] {
        self.selection.as_slice()
    }

    // --- Queries ---

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn run_summary(&self) -> &RunSummary {
        &self.summary
    }

    pub fn last_error(&self) -> Option<&PipelineError> {
        self.last_error.as_ref()
    }

    /// Display text of the last error, empty when there is none.
    pub fn error_message(&self) -> String {
        self.last_error.as_ref().map(ToString::to_string).unwrap_or_default()
    }

    pub fn track_count(&self) -> Result<u32, PipelineError> {
        self.ensure_source()?;
        Ok(self.track_count)
    }

    pub fn source_format(&self) -> Option<AudioFormat> {
        self.source_format
    }

    pub fn source_path(&self) -> Option<&Path> {
        self.source_path.as_deref()
    }

    pub fn album_metadata(&self) -> Result<AlbumMetadata, PipelineError> {
        self.shared_source()?.lock().album_metadata()
    }

    pub fn track_metadata(&self, track: u32) -> Result<TrackMetadata, PipelineError> {
        if track == 0 || track > self.track_count {
            self.ensure_source()?;
            return Err(PipelineError::TrackNotFound(track));
        }
        self.shared_source()?.lock().track_metadata(track)
    }

    /// File-system-safe base name for `track` under the configured format.
    pub fn track_filename(&self, track: u32) -> Result<String, PipelineError> {
        let metadata = self.track_metadata(track)?;
        Ok(naming::track_filename(track, &metadata, self.track_filename_format))
    }

    /// File-system-safe album folder name under the configured format.
    pub fn album_folder_name(&self) -> Result<String, PipelineError> {
        let album = self.album_metadata()?;
        Ok(naming::album_folder_name(&album, self.album_folder_format))
    }

    pub fn track_filename_format(&self) -> TrackFilenameFormat {
        self.track_filename_format
    }

    pub fn album_folder_format(&self) -> AlbumFolderFormat {
        self.album_folder_format
    }

    pub fn pcm_settings(&self) -> PcmSettings {
        self.pcm_settings
    }

    pub fn dsd_options(&self) -> DsdOptions {
        self.dsd_options
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Whether the last run inserted a DST decoder.
    pub fn has_dst_decoder(&self) -> bool {
        self.dst_decoder.is_some()
    }

    /// Whether the last run inserted a DSD→PCM converter.
    pub fn has_dsd_to_pcm(&self) -> bool {
        self.dsd_to_pcm.is_some()
    }

    // --- Cancellation ---

    /// A handle that can cancel a running [`run`](Self::run) from any thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // --- Lifecycle ---

    /// Processes every selected track (all tracks if none were selected).
    ///
    /// Blocks until the run ends. Transitions: configured → running →
    /// finished / error. Fails without a state change when no source or no
    /// sink is attached.
    pub fn run(&mut self) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        if self.source.is_none() {
            return Err(self.reject(PipelineError::NoSource));
        }
        if self.sinks.is_empty() {
            return Err(self.reject(PipelineError::NoSinks));
        }

        self.cancel.clear();
        self.last_error = None;
        self.summary = RunSummary {
            run_id: uuid::Uuid::new_v4().to_string(),
            ..Default::default()
        };
        if self.selection.is_empty() {
            self.selection = TrackSelection::all(self.track_count);
        }

        let started = Instant::now();
        log::info!(
            "run {} starting: {} of {} tracks into {} sinks",
            self.summary.run_id,
            self.selection.len(),
            self.track_count,
            self.sinks.len()
        );

        let result = match self.prepare() {
            Ok(()) => {
                self.set_state(PipelineState::Running);
                let processed = self.process_selection();
                let finished = self.finish_sinks();
                processed.and(finished)
            }
            Err(e) => Err(e),
        };
        self.summary.elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => {
                log::info!(
                    "run {} finished: {} tracks, {} frames in {} ms",
                    self.summary.run_id,
                    self.summary.tracks_completed,
                    self.summary.frames_processed,
                    self.summary.elapsed_ms
                );
                self.set_state(PipelineState::Finished);
            }
            Err(error) => {
                if error.is_cancelled() {
                    log::warn!("run {} cancelled", self.summary.run_id);
                } else {
                    log::error!("run {} failed: {}", self.summary.run_id, error);
                }
                self.last_error = Some(error.clone());
                if let Some(observer) = &self.observer {
                    observer.on_error(error);
                }
                self.set_state(PipelineState::Error);
            }
        }
        result
    }

    /// Detaches sinks and transforms and clears selection, error and progress.
    ///
    /// The source stays attached; the state returns to configured, or to
    /// created when there is no source.
    pub fn reset(&mut self) -> Result<(), PipelineError> {
        self.ensure_idle()?;
        self.close_sinks();
        self.sinks.clear();
        self.dst_decoder = None;
        self.dsd_to_pcm = None;
        self.selection.clear();
        self.last_error = None;
        self.progress = Progress::default();
        self.cancel.clear();
        let state = if self.source.is_some() {
            PipelineState::Configured
        } else {
            PipelineState::Created
        };
        self.set_state(state);
        Ok(())
    }

    // --- Run internals ---

    /// Routes sinks, inserts transforms, sizes pools and opens every sink.
    fn prepare(&mut self) -> Result<(), PipelineError> {
        let source = self.shared_source()?;
        let source_format = source.lock().format();
        let source_is_dst = source_format.kind.is_dst();

        for slot in &mut self.sinks {
            slot.caps = slot.sink.capabilities();
            slot.route = Route::for_sink(slot.caps, source_is_dst, self.dsd_options.keep_dst).ok_or_else(|| {
                PipelineError::Unsupported(format!(
                    "{} sink accepts only DST but the source is {:?}",
                    slot.sink.name(),
                    source_format.kind
                ))
            })?;
        }
        let needs_pcm = self.sinks.iter().any(|s| s.route == Route::Pcm);
        let needs_dsd = self.sinks.iter().any(|s| matches!(s.route, Route::Dsd | Route::Pcm));

        self.dst_decoder = None;
        self.dsd_to_pcm = None;

        let mut dsd_format = source_format;
        if source_is_dst && needs_dsd {
            let mut decoder = self.transforms.dst_decoder()?;
            dsd_format = decoder.init(&source_format)?;
            log::info!("inserted {} transform for DST source", decoder.name());
            self.dst_decoder = Some(decoder);
        }

        let mut pcm_format = None;
        if needs_pcm {
            let mut converter = self.transforms.dsd_to_pcm(&self.pcm_settings)?;
            let output = converter.init(&dsd_format)?;
            log::info!(
                "inserted {} transform: {} Hz, {:?}",
                converter.name(),
                output.sample_rate,
                output.kind
            );
            pcm_format = Some(output);
            self.dsd_to_pcm = Some(converter);
        }

        self.ensure_pools(&dsd_format, pcm_format.as_ref());

        let album = source.lock().album_metadata()?;
        self.open_sinks(&source_format, &dsd_format, pcm_format.as_ref(), &album)
    }

    /// Creates the pools on first use, or again when frame sizes changed.
    fn ensure_pools(&mut self, dsd_format: &AudioFormat, pcm_format: Option<&AudioFormat>) {
        let dsd_capacity = dsd_format.dsd_frame_bytes();
        if self.dsd_pool.as_ref().map(BufferPool::buffer_capacity) != Some(dsd_capacity) {
            log::debug!("creating DSD pool: {} x {} bytes", DSD_POOL_BUFFERS, dsd_capacity);
            self.dsd_pool = Some(BufferPool::new("dsd", dsd_capacity, DSD_POOL_BUFFERS));
        }

        let Some(pcm_format) = pcm_format else {
            return;
        };
        let frame_rate = if dsd_format.frame_rate > 0 { dsd_format.frame_rate } else { SACD_FRAME_RATE };
        let samples_per_frame = (pcm_format.sample_rate as usize).div_ceil(frame_rate as usize);
        let pcm_frame_bytes = samples_per_frame * pcm_format.pcm_block_align();
        let pcm_capacity = (PCM_CAPACITY_FACTOR * dsd_capacity).max(2 * pcm_frame_bytes);
        if self.pcm_pool.as_ref().map(BufferPool::buffer_capacity) != Some(pcm_capacity) {
            log::debug!("creating PCM pool: {} x {} bytes", PCM_POOL_BUFFERS, pcm_capacity);
            self.pcm_pool = Some(BufferPool::new("pcm", pcm_capacity, PCM_POOL_BUFFERS));
        }
    }

    fn open_sinks(
        &mut self,
        source_format: &AudioFormat,
        dsd_format: &AudioFormat,
        pcm_format: Option<&AudioFormat>,
        album: &AlbumMetadata,
    ) -> Result<(), PipelineError> {
        for index in 0..self.sinks.len() {
            let slot = &mut self.sinks[index];
            let format = match slot.route {
                Route::Dst | Route::None => *source_format,
                Route::Dsd => *dsd_format,
                Route::Pcm => *pcm_format
                    .ok_or_else(|| PipelineError::Internal("PCM sink without a converter".into()))?,
            };
            if let Err(e) = slot.sink.open(&slot.path, &format, album) {
                let error = match e {
                    PipelineError::SinkOpen(_) => e,
                    other => PipelineError::SinkOpen(format!("{}: {}", slot.path.display(), other)),
                };
                log::error!("failed to open {} sink: {}", slot.sink.name(), error);
                self.close_sinks();
                return Err(error);
            }
            slot.open = true;
            log::debug!("opened {} sink at {} ({:?})", slot.sink.name(), slot.path.display(), slot.route);
        }
        Ok(())
    }

    fn process_selection(&mut self) -> Result<(), PipelineError> {
        let tracks = self.selection.as_slice().to_vec();
        self.progress = Progress {
            track_count: tracks.len(),
            ..Default::default()
        };

        for (index, &track) in tracks.iter().enumerate() {
            self.selection.set_current_index(index);
            let result = self.process_track(index, track);
            if let Some(observer) = &self.observer {
                observer.on_track_finished(track, &result);
            }
            if let Err(e) = result {
                if !e.is_cancelled() {
                    log::error!("track {} failed: {}", track, e);
                }
                return Err(e);
            }

            self.summary.tracks_completed += 1;
            self.progress.track_percent = 100.0;
            self.progress.total_percent = (index + 1) as f64 / tracks.len() as f64 * 100.0;
            log::info!("track {} done ({} frames)", track, self.progress.frames_done);
        }
        Ok(())
    }

    fn process_track(&mut self, index: usize, track: u32) -> Result<(), PipelineError> {
        let source = self.shared_source()?;
        let (metadata, frames_total) = {
            let source = source.lock();
            (source.track_metadata(track)?, source.track_frames(track).filter(|&n| n > 0))
        };
        let frames_total = frames_total.unwrap_or_else(|| {
            log::warn!(
                "track {}: length unknown, estimating {} frames for progress",
                track,
                FALLBACK_TRACK_FRAMES
            );
            FALLBACK_TRACK_FRAMES
        });

        self.progress.track_number = track;
        self.progress.track_index = index;
        self.progress.track_title = metadata.title.clone();
        self.progress.frames_done = 0;
        self.progress.frames_total = frames_total;
        self.progress.update_percentages();
        if let Some(observer) = &self.observer {
            observer.on_track_started(&self.progress);
        }
        log::info!(
            "track {} ({}/{}) starting: {}",
            track,
            index + 1,
            self.progress.track_count,
            self.progress.track_title
        );

        let pool = self
            .dsd_pool
            .clone()
            .ok_or_else(|| PipelineError::Internal("DSD pool not initialised".into()))?;
        let sequence = index as u32 + 1;
        self.start_sinks(track, sequence, &metadata)?;

        let queue = Arc::new(FrameQueue::new(FRAME_QUEUE_CAPACITY));
        let result = ReaderThread::spawn(source, Arc::clone(&queue), pool, self.cancel.token())
            .and_then(|reader| self.stream_track(track, reader, &queue));

        let aborted = result.is_err() || self.cancel.is_cancelled();
        let ended = self.end_sinks(track, sequence, aborted);
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        result.and(ended)
    }

    fn stream_track(&mut self, track: u32, mut reader: ReaderThread, queue: &Arc<FrameQueue>) -> Result<(), PipelineError> {
        self.cancel.attach(Arc::clone(queue), reader.cancel_token());

        let mut result = reader.start_track(track).and_then(|()| self.consume(queue));
        if result.is_err() || self.cancel.is_cancelled() {
            reader.cancel();
            let _ = reader.wait_track_done();
        } else {
            result = reader
                .wait_track_done()
                .map(|frames| log::debug!("track {}: reader delivered {} frames", track, frames));
        }
        reader.shutdown();
        self.cancel.detach();

        for transform in [&mut self.dst_decoder, &mut self.dsd_to_pcm].into_iter().flatten() {
            transform.reset();
        }
        result
    }

    /// Pops and processes batches until the track is complete.
    fn consume(&mut self, queue: &FrameQueue) -> Result<(), PipelineError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let batch = queue.pop_batch(BATCH_SIZE)?;
            if batch.is_empty() {
                return Ok(());
            }
            let track_complete = batch.track_complete;
            let count = batch.len() as u64;
            self.process_batch(batch.buffers)?;

            self.progress.frames_done += count;
            self.summary.frames_processed += count;
            self.progress.update_percentages();
            if let Some(observer) = &self.observer {
                if observer.on_progress(&self.progress).is_break() {
                    log::info!("run cancelled by observer");
                    self.cancel.cancel();
                    return Err(PipelineError::Cancelled);
                }
            }
            if track_complete {
                return Ok(());
            }
        }
    }

    fn process_batch(&mut self, frames: Vec<Buffer>) -> Result<(), PipelineError> {
        log::trace!("batch of {} frames", frames.len());
        let decoded = match (self.dst_decoder.as_mut(), self.dsd_pool.as_ref()) {
            (Some(decoder), Some(pool)) if frames.iter().any(|f| f.format.is_dst()) => {
                Some(decode_dst(decoder.as_mut(), &frames, pool)?)
            }
            _ => None,
        };

        for frame in &frames {
            write_routed(&mut self.sinks, Route::Dst, frame)?;
        }

        let dsd = decoded.as_deref().unwrap_or(&frames);
        for frame in dsd {
            write_routed(&mut self.sinks, Route::Dsd, frame)?;
        }

        if let (Some(converter), Some(pool)) = (self.dsd_to_pcm.as_mut(), self.pcm_pool.as_ref()) {
            let samples_per_frame = self.source_format.map_or(0, |f| f.samples_per_frame());
            let pcm = convert(converter.as_mut(), dsd, pool)
                .and_then(|mut pcm| {
                    if let Some(last) = dsd.last().filter(|f| f.flags.contains(BufferFlags::TRACK_END)) {
                        append_tail(converter.as_mut(), last, samples_per_frame, pool, &mut pcm)?;
                    }
                    Ok(pcm)
                })
                .map_err(|e| match e {
                    PipelineError::PcmConvert(_) | PipelineError::OutOfMemory | PipelineError::Internal(_) => e,
                    other => PipelineError::PcmConvert(other.to_string()),
                })?;
            for buffer in pcm {
                write_routed(&mut self.sinks, Route::Pcm, &buffer)?;
                self.summary.pcm_buffers_written += 1;
            }
        }
        Ok(())
    }

    fn start_sinks(&mut self, track: u32, sequence: u32, metadata: &TrackMetadata) -> Result<(), PipelineError> {
        for index in 0..self.sinks.len() {
            let slot = &mut self.sinks[index];
            let number = slot.track_number(track, sequence);
            if let Err(e) = slot.sink.track_start(number, metadata) {
                log::error!("{} sink: track_start({}) failed: {}", slot.sink.name(), number, e);
                for started in &mut self.sinks[..index] {
                    let number = started.track_number(track, sequence);
                    started.sink.track_aborted(number);
                    if let Err(end_error) = started.sink.track_end(number) {
                        log::warn!("{} sink: track_end({}) failed: {}", started.sink.name(), number, end_error);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn end_sinks(&mut self, track: u32, sequence: u32, aborted: bool) -> Result<(), PipelineError> {
        let mut first_error = None;
        for slot in &mut self.sinks {
            let number = slot.track_number(track, sequence);
            if aborted {
                slot.sink.track_aborted(number);
            }
            if let Err(e) = slot.sink.track_end(number) {
                log::error!("{} sink: track_end({}) failed: {}", slot.sink.name(), number, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Finalizes and closes every open sink, reporting the first failure.
    fn finish_sinks(&mut self) -> Result<(), PipelineError> {
        let mut first_error = None;
        for slot in self.sinks.iter_mut().filter(|s| s.open) {
            if let Err(e) = slot.sink.finalize() {
                log::warn!("{} sink: finalize failed: {}", slot.sink.name(), e);
                first_error.get_or_insert(e);
            }
            slot.sink.close();
            slot.open = false;
        }
        first_error.map_or(Ok(()), Err)
    }

    fn close_sinks(&mut self) {
        for slot in self.sinks.iter_mut().filter(|s| s.open) {
            slot.sink.close();
            slot.open = false;
        }
    }

    // --- Helpers ---

    fn set_state(&mut self, state: PipelineState) {
        self.state = state;
        if let Some(observer) = &self.observer {
            observer.on_state_changed(state);
        }
    }

    /// Records an error that does not change the state.
    fn reject(&mut self, error: PipelineError) -> PipelineError {
        log::error!("{}", error);
        self.last_error = Some(error.clone());
        error
    }

    fn ensure_idle(&self) -> Result<(), PipelineError> {
        if self.state.is_running() {
            return Err(PipelineError::AlreadyRunning);
        }
        Ok(())
    }

    fn ensure_source(&self) -> Result<(), PipelineError> {
        self.source.as_ref().map(|_| ()).ok_or(PipelineError::NoSource)
    }

    fn shared_source(&self) -> Result<SharedSource, PipelineError> {
        self.source.clone().ok_or(PipelineError::NoSource)
    }

    #[cfg(test)]
    pub(crate) fn force_state(&mut self, state: PipelineState) {
        self.state = state;
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close_sinks();
        if let Some(source) = self.source.take() {
            source.lock().close();
        }
    }
}

fn convert(transform: &mut dyn Transform, inputs: &[Buffer], pool: &BufferPool) -> Result<Vec<Buffer>, PipelineError> {
    if transform.supports_batch() {
        transform.process_batch(inputs, pool)
    } else {
        inputs.iter().map(|input| transform.process(input, pool)).collect()
    }
}

/// Drains the converter after the last frame of a track. The tail becomes the
/// track's final frame and takes over its `TRACK_END` flag.
fn append_tail(
    converter: &mut dyn Transform,
    last: &Buffer,
    samples_per_frame: u64,
    pool: &BufferPool,
    pcm: &mut Vec<Buffer>,
) -> Result<(), PipelineError> {
    let Some(mut tail) = converter.flush(pool)? else {
        return Ok(());
    };
    if let Some(previous) = pcm.last_mut() {
        previous.flags.remove(BufferFlags::TRACK_END);
    }
    tail.track_number = last.track_number;
    tail.frame_number = last.frame_number + 1;
    tail.sample_offset = last.sample_offset + samples_per_frame;
    tail.flags = BufferFlags::TRACK_END;
    pcm.push(tail);
    Ok(())
}

fn decode_dst(decoder: &mut dyn Transform, frames: &[Buffer], pool: &BufferPool) -> Result<Vec<Buffer>, PipelineError> {
    let mut decoded = convert(decoder, frames, pool).map_err(|e| match e {
        PipelineError::DstDecode(_) | PipelineError::OutOfMemory => e,
        other => PipelineError::DstDecode(other.to_string()),
    })?;
    if decoded.len() != frames.len() {
        return Err(PipelineError::Internal(format!(
            "{} returned {} frames for {}",
            decoder.name(),
            decoded.len(),
            frames.len()
        )));
    }
    for (output, input) in decoded.iter_mut().zip(frames) {
        output.copy_frame_info_from(input);
    }
    Ok(decoded)
}

fn write_routed(sinks: &mut [SinkSlot], route: Route, buffer: &Buffer) -> Result<(), PipelineError> {
    for slot in sinks.iter_mut().filter(|s| s.route == route) {
        if !slot.caps.accepts(buffer.format) {
            return Err(PipelineError::Unsupported(format!(
                "{} sink cannot accept {:?} frames",
                slot.sink.name(),
                buffer.format
            )));
        }
        slot.sink.write_frame(buffer)?;
    }
    Ok(())
}
