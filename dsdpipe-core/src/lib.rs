//! # dsdpipe-core
//!
//! Conversion pipeline core for SACD-style DSD audio.
//!
//! Provides the buffer pool, track selection, the bounded frame queue, the
//! per-track reader thread and the [`Pipeline`] orchestrator. Sources, sinks
//! and codecs implement the [`Source`], [`Sink`] and [`Transform`] traits and
//! plug into the pipeline; reference implementations live in `dsdpipe-plugins`.
//!
//! ## Architecture
//!
//! ```text
//! dsdpipe-core (this crate)
//! ├── traits/       ← Source, Sink, Transform, TransformFactory, PipelineObserver
//! ├── models/       ← PipelineError, PipelineState, AudioFormat, PipelineConfig, metadata
//! ├── processing/   ← BufferPool, FrameQueue, TrackSelection
//! ├── session/      ← Pipeline (orchestrator), ReaderThread, CancelHandle
//! └── storage/      ← file and folder naming
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::config::{DsdOptions, OutputFormats, PcmBitDepth, PcmQuality, PcmSettings, PipelineConfig};
pub use models::error::{error_string, PipelineError, Result};
pub use models::format::{AudioFormat, BufferFlags, FrameFormat, SinkCapabilities, DSD64_SAMPLE_RATE, SACD_FRAME_RATE};
pub use models::metadata::{AlbumMetadata, TrackMetadata};
pub use models::state::{PipelineState, Progress, RunSummary};
pub use processing::buffer_pool::{Buffer, BufferPool};
pub use processing::frame_queue::{Batch, FrameQueue};
pub use processing::track_selection::TrackSelection;
pub use session::cancel::{CancelHandle, CancelToken};
pub use session::pipeline::{Pipeline, BATCH_SIZE, FRAME_QUEUE_CAPACITY, MAX_SINKS};
pub use session::reader::ReaderThread;
pub use storage::naming::{album_folder_name, sanitize, track_filename, AlbumFolderFormat, TrackFilenameFormat};
pub use traits::observer::{progress_fn, PipelineObserver};
pub use traits::sink::Sink;
pub use traits::source::{ReadStatus, Source};
pub use traits::transform::{distribute_output, split_by_input_share, NoTransforms, Transform, TransformFactory};
