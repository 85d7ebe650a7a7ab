//! # dsdpipe-plugins
//!
//! Reference plugins for the `dsdpipe-core` pipeline.
//!
//! Provides:
//! - `SyntheticSource`: generated DSD tracks (silence or square wave)
//! - `DsdToPcm`: bit-counting decimator with moving-average smoothing, channels converted with rayon
//! - `WavSink`: one WAV file per track, SHA-256 recorded on close
//! - `RawDsdSink`: raw DSD/DST dumps, per track or as an edit master with markers
//! - `MetadataSink`: JSON sidecar with album and track tags
//! - `BuiltinTransforms`: the `TransformFactory` wiring the above into a pipeline
//!
//! ## Usage
//! ```no_run
//! use std::sync::Arc;
//! use dsdpipe_core::{Pipeline, TrackFilenameFormat};
//! use dsdpipe_plugins::{BuiltinTransforms, SyntheticSource, WavSink};
//!
//! let mut pipeline = Pipeline::with_transforms(Arc::new(BuiltinTransforms));
//! pipeline.set_source(Box::new(SyntheticSource::new(vec![750, 375])), "demo.iso")?;
//! pipeline.add_sink(Box::new(WavSink::new(TrackFilenameFormat::NumberTitle)), "out")?;
//! pipeline.select_tracks("all")?;
//! pipeline.run()?;
//! # Ok::<(), dsdpipe_core::PipelineError>(())
//! ```

pub mod builtin;
pub mod checksum;
pub mod dsd_to_pcm;
pub mod metadata_sink;
pub mod pcm;
pub mod raw_dsd_sink;
pub mod synthetic_source;
pub mod wav_format;
pub mod wav_sink;

pub use builtin::BuiltinTransforms;
pub use checksum::{hex_encode, sha256_file};
pub use dsd_to_pcm::{DsdToPcm, DEFAULT_DECIMATION, DSD_IDLE_BYTE};
pub use metadata_sink::{AlbumReport, MetadataSink, TrackEntry};
pub use raw_dsd_sink::{RawDsdSink, TrackMarker};
pub use synthetic_source::{Pattern, SyntheticSource};
pub use wav_sink::{WavFileWriter, WavSink, WrittenTrack};
