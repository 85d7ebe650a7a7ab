use dsdpipe_core::{PcmSettings, PipelineError, Transform, TransformFactory};

use crate::dsd_to_pcm::DsdToPcm;

/// Transforms shipped with this crate.
///
/// There is no DST decoder here; DST sources need `keep_dst` with
/// DST-capable sinks, or a factory that provides one.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTransforms;

impl TransformFactory for BuiltinTransforms {
    fn dst_decoder(&self) -> Result<Box<dyn Transform>, PipelineError> {
        Err(PipelineError::CodecUnavailable("DST decoder".into()))
    }

    fn dsd_to_pcm(&self, settings: &PcmSettings) -> Result<Box<dyn Transform>, PipelineError> {
        Ok(Box::new(DsdToPcm::new(*settings)))
    }
}
