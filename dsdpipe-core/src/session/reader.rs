use std::sync::Arc;
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::models::error::PipelineError;
use crate::models::format::BufferFlags;
use crate::processing::buffer_pool::{Buffer, BufferPool};
use crate::processing::frame_queue::FrameQueue;
use crate::session::cancel::CancelToken;
use crate::traits::source::{ReadStatus, Source};

/// Source shared between the pipeline thread (metadata) and the reader (frames).
pub type SharedSource = Arc<Mutex<Box<dyn Source>>>;

enum ReaderCommand {
    StartTrack(u32),
    Shutdown,
}

struct TrackFinished {
    track: u32,
    result: Result<u64, PipelineError>,
}

/// Background producer that streams one track at a time into a [`FrameQueue`].
///
/// The thread idles on a command channel. Starting a track resets the queue,
/// after which the thread seeks the source and pushes frames until the track
/// ends or fails. The outcome comes back on an event channel and the thread
/// goes idle again.
///
/// ```text
/// idle ──StartTrack──▶ streaming ──eof / error / cancel──▶ idle
///   └──────────────────Shutdown──────────────────────────▶ exited
/// ```
pub struct ReaderThread {
    commands: Sender<ReaderCommand>,
    events: Receiver<TrackFinished>,
    queue: Arc<FrameQueue>,
    cancel: CancelToken,
    in_flight: Option<u32>,
    last_error: Option<PipelineError>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ReaderThread {
    /// Spawns an idle reader. `pipeline_cancel` aborts any track it streams.
    pub fn spawn(
        source: SharedSource,
        queue: Arc<FrameQueue>,
        pool: BufferPool,
        pipeline_cancel: CancelToken,
    ) -> Result<Self, PipelineError> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (event_tx, event_rx) = crossbeam_channel::bounded(1);
        let cancel = CancelToken::new();

        let worker = ReaderWorker {
            source,
            queue: Arc::clone(&queue),
            pool,
            cancel: cancel.clone(),
            pipeline_cancel,
        };
        let handle = thread::Builder::new()
            .name("dsd-reader".into())
            .spawn(move || worker.run(command_rx, event_tx))
            .map_err(|e| PipelineError::Internal(format!("failed to spawn reader thread: {}", e)))?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            queue,
            cancel,
            in_flight: None,
            last_error: None,
            handle: Some(handle),
        })
    }

    /// Begins streaming `track`, first waiting out any track still in flight.
    pub fn start_track(&mut self, track: u32) -> Result<(), PipelineError> {
        if self.in_flight.is_some() {
            // Previous outcome is superseded by the new track.
            let _ = self.wait_track_done();
        }
        // Reset here, not on the reader thread, so a consumer that pops right
        // away cannot see the previous track's EOF.
        self.queue.reset();
        self.cancel.clear();
        self.last_error = None;
        self.commands
            .send(ReaderCommand::StartTrack(track))
            .map_err(|_| PipelineError::Internal("reader thread has exited".into()))?;
        self.in_flight = Some(track);
        Ok(())
    }

    /// Blocks until the current track is fully read and returns its frame count.
    pub fn wait_track_done(&mut self) -> Result<u64, PipelineError> {
        let Some(expected) = self.in_flight.take() else {
            return match &self.last_error {
                Some(error) => Err(error.clone()),
                None => Ok(0),
            };
        };
        let finished = self
            .events
            .recv()
            .map_err(|_| PipelineError::Internal("reader thread exited mid-track".into()))?;
        debug_assert_eq!(finished.track, expected);
        if let Err(error) = &finished.result {
            self.last_error = Some(error.clone());
        }
        finished.result
    }

    /// Aborts the current track. Idempotent; the thread stays available.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.queue.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// A track was started and its outcome has not been collected yet.
    pub fn is_active(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Outcome of the last track whose result was collected, if it failed.
    pub fn last_error(&self) -> Option<&PipelineError> {
        self.last_error.as_ref()
    }

    /// Stops the thread and joins it. A track still in flight is cancelled.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if self.in_flight.is_some() {
            self.cancel();
            let _ = self.wait_track_done();
        }
        let _ = self.commands.send(ReaderCommand::Shutdown);
        if handle.join().is_err() {
            log::error!("reader thread panicked");
        }
    }
}

impl Drop for ReaderThread {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ReaderWorker {
    source: SharedSource,
    queue: Arc<FrameQueue>,
    pool: BufferPool,
    cancel: CancelToken,
    pipeline_cancel: CancelToken,
}

impl ReaderWorker {
    fn run(self, commands: Receiver<ReaderCommand>, events: Sender<TrackFinished>) {
        while let Ok(command) = commands.recv() {
            match command {
                ReaderCommand::StartTrack(track) => {
                    let result = self.stream_track(track);
                    match &result {
                        Ok(frames) => log::debug!("track {}: read {} frames", track, *frames),
                        Err(PipelineError::Cancelled) => log::debug!("track {}: read cancelled", track),
                        Err(e) => log::error!("track {}: read failed: {}", track, e),
                    }
                    // Wake the consumer even when nothing was pushed.
                    self.queue.signal_eof();
                    if events.send(TrackFinished { track, result }).is_err() {
                        break;
                    }
                }
                ReaderCommand::Shutdown => break,
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.pipeline_cancel.is_cancelled()
    }

    fn stream_track(&self, track: u32) -> Result<u64, PipelineError> {
        if self.is_cancelled() {
            self.queue.cancel();
            return Err(PipelineError::Cancelled);
        }

        let mut source = self.source.lock();
        source.seek_track(track)?;
        let samples_per_frame = source.format().samples_per_frame();

        // One frame of look-ahead so the last frame can be pushed with is_last.
        let mut pending: Option<Buffer> = None;
        let mut frames_read = 0u64;
        loop {
            if self.is_cancelled() {
                self.queue.cancel();
                return Err(PipelineError::Cancelled);
            }

            let mut buffer = self.pool.alloc()?;
            match source.read_frame(&mut buffer)? {
                ReadStatus::Frame => {
                    buffer.frame_number = frames_read;
                    buffer.sample_offset = frames_read * samples_per_frame;
                    buffer.track_number = track;
                    buffer.flags = if frames_read == 0 {
                        BufferFlags::TRACK_START
                    } else {
                        BufferFlags::empty()
                    };
                    frames_read += 1;
                    if let Some(previous) = pending.replace(buffer) {
                        self.queue.push(previous, false)?;
                    }
                }
                ReadStatus::Eof => {
                    if let Some(mut last) = pending.take() {
                        last.flags |= BufferFlags::TRACK_END;
                        self.queue.push(last, true)?;
                    }
                    return Ok(frames_read);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::models::format::{AudioFormat, DSD64_SAMPLE_RATE};
    use crate::models::metadata::{AlbumMetadata, TrackMetadata};

    const FRAME_BYTES: usize = 32;

    /// Serves `frames[track - 1]` frames per track; each frame is filled with
    /// the track number. Fails reading once `fail_at` frames were served.
    struct CountingSource {
        frames: Vec<u64>,
        current: u32,
        position: u64,
        fail_at: Option<u64>,
    }

    impl CountingSource {
        fn shared(frames: Vec<u64>, fail_at: Option<u64>) -> SharedSource {
            Arc::new(Mutex::new(Box::new(Self {
                frames,
                current: 0,
                position: 0,
                fail_at,
            })))
        }
    }

    impl Source for CountingSource {
        fn name(&self) -> &str {
            "counting"
        }

        fn open(&mut self, _path: &Path) -> Result<(), PipelineError> {
            Ok(())
        }

        fn close(&mut self) {}

        fn track_count(&self) -> u32 {
            self.frames.len() as u32
        }

        fn format(&self) -> AudioFormat {
            AudioFormat::dsd(DSD64_SAMPLE_RATE, 2)
        }

        fn seek_track(&mut self, track: u32) -> Result<(), PipelineError> {
            if track == 0 || track as usize > self.frames.len() {
                return Err(PipelineError::TrackNotFound(track));
            }
            self.current = track;
            self.position = 0;
            Ok(())
        }

        fn read_frame(&mut self, buffer: &mut Buffer) -> Result<ReadStatus, PipelineError> {
            if self.fail_at == Some(self.position) {
                return Err(PipelineError::Read("bad sector".into()));
            }
            if self.position >= self.frames[self.current as usize - 1] {
                return Ok(ReadStatus::Eof);
            }
            buffer.fill_from(&[self.current as u8; FRAME_BYTES])?;
            self.position += 1;
            Ok(ReadStatus::Frame)
        }

        fn album_metadata(&self) -> Result<AlbumMetadata, PipelineError> {
            Ok(AlbumMetadata::default())
        }

        fn track_metadata(&self, track: u32) -> Result<TrackMetadata, PipelineError> {
            Ok(TrackMetadata::new(track, format!("Track {}", track)))
        }
    }

    fn spawn_reader(source: SharedSource, queue_capacity: usize) -> (ReaderThread, Arc<FrameQueue>) {
        let queue = Arc::new(FrameQueue::new(queue_capacity));
        let pool = BufferPool::new("dsd", FRAME_BYTES, queue_capacity + 8);
        let reader = ReaderThread::spawn(source, Arc::clone(&queue), pool, CancelToken::new()).unwrap();
        (reader, queue)
    }

    fn drain(queue: &FrameQueue) -> Vec<Buffer> {
        let mut frames = Vec::new();
        loop {
            let batch = queue.pop_batch(4).unwrap();
            if batch.is_empty() {
                return frames;
            }
            let complete = batch.track_complete;
            frames.extend(batch.buffers);
            if complete {
                return frames;
            }
        }
    }

    #[test]
    fn streams_a_track_with_boundary_flags() {
        let (mut reader, queue) = spawn_reader(CountingSource::shared(vec![10, 3], None), 4);

        reader.start_track(1).unwrap();
        assert!(reader.is_active());
        let frames = drain(&queue);
        assert_eq!(reader.wait_track_done().unwrap(), 10);
        assert!(!reader.is_active());

        assert_eq!(frames.len(), 10);
        assert!(frames[0].flags.contains(BufferFlags::TRACK_START));
        assert!(frames[9].flags.contains(BufferFlags::TRACK_END));
        assert!(frames[1..9].iter().all(|f| f.flags.is_empty()));
        for (n, frame) in frames.iter().enumerate() {
            assert_eq!(frame.frame_number, n as u64);
            assert_eq!(frame.track_number, 1);
            assert_eq!(frame.sample_offset, n as u64 * u64::from(DSD64_SAMPLE_RATE / 75));
            assert_eq!(frame.data(), &[1u8; FRAME_BYTES]);
        }
        drop(frames);

        // The same thread serves the next track.
        reader.start_track(2).unwrap();
        let frames = drain(&queue);
        assert_eq!(reader.wait_track_done().unwrap(), 3);
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].frame_number, 0);
        assert!(frames.iter().all(|f| f.track_number == 2));
        reader.shutdown();
    }

    #[test]
    fn read_error_is_reported_and_wakes_consumer() {
        let (mut reader, queue) = spawn_reader(CountingSource::shared(vec![10], Some(5)), 16);

        reader.start_track(1).unwrap();
        let frames = drain(&queue);
        // Frame 4 is still held as look-ahead when the read fails.
        assert_eq!(frames.len(), 4);
        assert!(queue.is_eof());

        let result = reader.wait_track_done();
        assert!(matches!(result, Err(PipelineError::Read(_))));
        assert!(matches!(reader.last_error(), Some(PipelineError::Read(_))));
    }

    #[test]
    fn seek_failure_surfaces_as_track_error() {
        let (mut reader, queue) = spawn_reader(CountingSource::shared(vec![2], None), 4);
        reader.start_track(7).unwrap();
        assert!(drain(&queue).is_empty());
        assert_eq!(reader.wait_track_done(), Err(PipelineError::TrackNotFound(7)));
    }

    #[test]
    fn cancel_unblocks_a_full_queue_promptly() {
        let (mut reader, queue) = spawn_reader(CountingSource::shared(vec![1000], None), 2);
        reader.start_track(1).unwrap();

        // Nobody consumes, so the reader ends up blocked in push.
        std::thread::sleep(Duration::from_millis(20));
        reader.cancel();
        reader.cancel();

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let result = reader.wait_track_done();
            let _ = tx.send(result);
            reader.shutdown();
        });
        let result = rx.recv_timeout(Duration::from_secs(2)).expect("reader did not stop");
        assert_eq!(result, Err(PipelineError::Cancelled));
        assert!(queue.is_cancelled());
    }

    #[test]
    fn cancel_is_per_track() {
        let (mut reader, queue) = spawn_reader(CountingSource::shared(vec![1000, 2], None), 2);
        reader.start_track(1).unwrap();
        reader.cancel();
        assert_eq!(reader.wait_track_done(), Err(PipelineError::Cancelled));

        reader.start_track(2).unwrap();
        let frames = drain(&queue);
        assert_eq!(frames.len(), 2);
        assert_eq!(reader.wait_track_done(), Ok(2));
    }

    #[test]
    fn pipeline_cancel_stops_before_reading() {
        let queue = Arc::new(FrameQueue::new(4));
        let pool = BufferPool::new("dsd", FRAME_BYTES, 8);
        let pipeline_cancel = CancelToken::new();
        pipeline_cancel.cancel();
        let mut reader = ReaderThread::spawn(
            CountingSource::shared(vec![5], None),
            Arc::clone(&queue),
            pool.clone(),
            pipeline_cancel,
        )
        .unwrap();

        reader.start_track(1).unwrap();
        assert_eq!(reader.wait_track_done(), Err(PipelineError::Cancelled));
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn drop_with_track_in_flight_joins() {
        let (mut reader, _queue) = spawn_reader(CountingSource::shared(vec![1000], None), 2);
        reader.start_track(1).unwrap();
        drop(reader);
    }
}
