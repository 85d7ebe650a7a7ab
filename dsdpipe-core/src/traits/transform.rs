use crate::models::config::PcmSettings;
use crate::models::error::PipelineError;
use crate::models::format::{AudioFormat, FrameFormat};
use crate::processing::buffer_pool::{Buffer, BufferPool};

/// A conversion stage between source and sinks (DST decoding, DSD→PCM).
///
/// Transforms are inserted by the pipeline based on sink capabilities and are
/// never supplied by callers directly; see [`TransformFactory`].
pub trait Transform: Send {
    fn name(&self) -> &str;

    /// Configures the stage for `input` and returns the output format.
    fn init(&mut self, input: &AudioFormat) -> Result<AudioFormat, PipelineError>;

    /// Converts one frame into a new buffer taken from `pool`.
    fn process(&mut self, input: &Buffer, pool: &BufferPool) -> Result<Buffer, PipelineError>;

    /// Whether [`process_batch`](Self::process_batch) is worth calling.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Converts a batch of frames, one output buffer per input, in order.
    ///
    /// Implementations may parallelise internally.
    fn process_batch(
        &mut self,
        inputs: &[Buffer],
        pool: &BufferPool,
    ) -> Result<Vec<Buffer>, PipelineError> {
        inputs.iter().map(|input| self.process(input, pool)).collect()
    }

    /// Drains internal filter delay at the end of a track. May be approximate.
    fn flush(&mut self, _pool: &BufferPool) -> Result<Option<Buffer>, PipelineError> {
        Ok(None)
    }

    /// Clears state between tracks.
    fn reset(&mut self) {}
}

/// Creates the transforms the pipeline inserts automatically.
pub trait TransformFactory: Send + Sync {
    fn dst_decoder(&self) -> Result<Box<dyn Transform>, PipelineError>;

    fn dsd_to_pcm(&self, settings: &PcmSettings) -> Result<Box<dyn Transform>, PipelineError>;
}

/// Factory for builds without any codecs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransforms;

impl TransformFactory for NoTransforms {
    fn dst_decoder(&self) -> Result<Box<dyn Transform>, PipelineError> {
        Err(PipelineError::CodecUnavailable("DST decoder".into()))
    }

    fn dsd_to_pcm(&self, _settings: &PcmSettings) -> Result<Box<dyn Transform>, PipelineError> {
        Err(PipelineError::CodecUnavailable("DSD to PCM converter".into()))
    }
}

/// Splits `total_output` bytes across frames in proportion to each frame's
/// share of the input bytes.
///
/// Every boundary falls on a multiple of `align` (one interleaved sample
/// frame) and the last frame absorbs the remainder, so the sizes always sum
/// to `total_output`. The split is an approximation when a converter's delay
/// does not map linearly onto its input.
pub fn split_by_input_share(input_sizes: &[usize], total_output: usize, align: usize) -> Vec<usize> {
    let Some(last) = input_sizes.len().checked_sub(1) else {
        return Vec::new();
    };
    let align = align.max(1) as u128;
    let total_input: u128 = input_sizes.iter().map(|&s| s as u128).sum();
    let total = total_output as u128;

    let mut sizes = Vec::with_capacity(input_sizes.len());
    let mut consumed_input = 0u128;
    let mut previous_boundary = 0u128;
    for &size in &input_sizes[..last] {
        consumed_input += size as u128;
        let boundary = if total_input == 0 {
            0
        } else {
            (total * consumed_input / total_input) / align * align
        };
        sizes.push((boundary - previous_boundary) as usize);
        previous_boundary = boundary;
    }
    sizes.push((total - previous_boundary) as usize);
    sizes
}

/// Cuts one combined conversion result into per-frame buffers.
///
/// Frame info (number, offset, track, flags) is copied from the matching input.
pub fn distribute_output(
    combined: &[u8],
    inputs: &[Buffer],
    align: usize,
    format: FrameFormat,
    pool: &BufferPool,
) -> Result<Vec<Buffer>, PipelineError> {
    let input_sizes: Vec<usize> = inputs.iter().map(Buffer::size).collect();
    let sizes = split_by_input_share(&input_sizes, combined.len(), align);

    let mut outputs = Vec::with_capacity(inputs.len());
    let mut offset = 0;
    for (input, size) in inputs.iter().zip(sizes) {
        let mut output = pool.alloc()?;
        output.fill_from(&combined[offset..offset + size]).map_err(|_| {
            PipelineError::Internal(format!(
                "{} output bytes exceed {} pool capacity {}",
                size,
                pool.name(),
                pool.buffer_capacity()
            ))
        })?;
        output.copy_frame_info_from(input);
        output.format = format;
        outputs.push(output);
        offset += size;
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proportional_split_sums_to_total() {
        let sizes = split_by_input_share(&[100, 100, 100], 1000, 4);
        assert_eq!(sizes.iter().sum::<usize>(), 1000);
        assert_eq!(sizes, vec![332, 332, 336]);
        assert!(sizes[..2].iter().all(|s| s % 4 == 0));
    }

    #[test]
    fn uneven_inputs() {
        let sizes = split_by_input_share(&[300, 100], 800, 2);
        assert_eq!(sizes, vec![600, 200]);

        let sizes = split_by_input_share(&[1, 2, 3, 4, 5], 997, 6);
        assert_eq!(sizes.iter().sum::<usize>(), 997);
    }

    #[test]
    fn degenerate_inputs() {
        assert!(split_by_input_share(&[], 10, 1).is_empty());
        assert_eq!(split_by_input_share(&[0, 0], 10, 1), vec![0, 10]);
        assert_eq!(split_by_input_share(&[5], 7, 4), vec![7]);
    }

    #[test]
    fn distribute_copies_frame_info() {
        let pool = BufferPool::new("test", 64, 8);
        let inputs: Vec<Buffer> = (0..3)
            .map(|n| {
                let mut b = pool.alloc().unwrap();
                b.fill_from(&[0u8; 10]).unwrap();
                b.frame_number = n;
                b.track_number = 4;
                b
            })
            .collect();
        let combined: Vec<u8> = (0..60u8).collect();

        let outputs = distribute_output(&combined, &inputs, 4, FrameFormat::PcmInt16, &pool).unwrap();
        assert_eq!(outputs.len(), 3);
        assert_eq!(outputs.iter().map(Buffer::size).sum::<usize>(), combined.len());
        let rejoined: Vec<u8> = outputs.iter().flat_map(|b| b.data().to_vec()).collect();
        assert_eq!(rejoined, combined);
        for (n, output) in outputs.iter().enumerate() {
            assert_eq!(output.frame_number, n as u64);
            assert_eq!(output.track_number, 4);
            assert_eq!(output.format, FrameFormat::PcmInt16);
        }
    }

    #[test]
    fn distribute_rejects_oversized_chunks() {
        let pool = BufferPool::new("tiny", 4, 4);
        let mut input = pool.alloc().unwrap();
        input.fill_from(&[0; 4]).unwrap();
        let result = distribute_output(&[0u8; 8], &[input], 1, FrameFormat::PcmInt16, &pool);
        assert!(matches!(result, Err(PipelineError::Internal(_))));
    }

    #[test]
    fn no_transforms_reports_missing_codecs() {
        let factory = NoTransforms;
        assert!(matches!(factory.dst_decoder(), Err(PipelineError::CodecUnavailable(_))));
        assert!(matches!(
            factory.dsd_to_pcm(&PcmSettings::default()),
            Err(PipelineError::CodecUnavailable(_))
        ));
    }
}
