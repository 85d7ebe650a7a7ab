use std::collections::VecDeque;

use dsdpipe_core::{
    distribute_output, AudioFormat, Buffer, BufferPool, FrameFormat, PcmQuality, PcmSettings, PipelineError, Transform,
};
use rayon::prelude::*;

use crate::pcm::encode_samples;

/// DSD "digital silence": equal ones and zeros.
pub const DSD_IDLE_BYTE: u8 = 0x69;

/// Decimation used when no output rate is configured (DSD64 → 88.2 kHz).
pub const DEFAULT_DECIMATION: u32 = 32;

/// Converts raw DSD to PCM by bit counting and moving-average smoothing.
///
/// Every `ratio` DSD bits of a channel become one PCM sample whose level is
/// the density of ones mapped to `[-1, 1]`. A moving average over the last
/// 1, 4 or 8 levels (Fast / Normal / High) smooths the result; its history
/// carries across frames and is cleared by [`reset`](Transform::reset).
///
/// Channels are decimated in parallel.
pub struct DsdToPcm {
    settings: PcmSettings,
    output: Option<AudioFormat>,
    channels: Vec<ChannelDecimator>,
}

impl DsdToPcm {
    pub fn new(settings: PcmSettings) -> Self {
        Self {
            settings,
            output: None,
            channels: Vec::new(),
        }
    }

    fn taps(quality: PcmQuality) -> usize {
        match quality {
            PcmQuality::Fast => 1,
            PcmQuality::Normal => 4,
            PcmQuality::High => 8,
        }
    }

    fn output_format(&self) -> Result<AudioFormat, PipelineError> {
        self.output
            .ok_or_else(|| PipelineError::PcmConvert("converter used before init".into()))
    }

    /// Decimates byte-interleaved DSD and returns interleaved PCM bytes.
    fn convert(&mut self, data: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let output = self.output_format()?;
        let channel_count = self.channels.len();
        if data.len() % channel_count != 0 {
            return Err(PipelineError::PcmConvert(format!(
                "{} DSD bytes do not split evenly across {} channels",
                data.len(),
                channel_count
            )));
        }

        let mut per_channel = vec![Vec::with_capacity(data.len() / channel_count); channel_count];
        for group in data.chunks_exact(channel_count) {
            for (channel, &byte) in per_channel.iter_mut().zip(group) {
                channel.push(byte);
            }
        }

        let decimated: Vec<Vec<f64>> = self
            .channels
            .par_iter_mut()
            .zip(per_channel.into_par_iter())
            .map(|(decimator, bytes)| decimator.decimate(&bytes))
            .collect();

        let mut pcm = Vec::new();
        encode_samples(&interleave(&decimated), output.kind, &mut pcm)?;
        Ok(pcm)
    }

    fn fill(pool: &BufferPool, bytes: &[u8]) -> Result<Buffer, PipelineError> {
        let mut buffer = pool.alloc()?;
        buffer.fill_from(bytes).map_err(|_| {
            PipelineError::PcmConvert(format!(
                "{} PCM bytes exceed {} pool capacity {}",
                bytes.len(),
                pool.name(),
                pool.buffer_capacity()
            ))
        })?;
        Ok(buffer)
    }
}

impl Transform for DsdToPcm {
    fn name(&self) -> &str {
        "dsd2pcm"
    }

    fn init(&mut self, input: &AudioFormat) -> Result<AudioFormat, PipelineError> {
        if input.kind != FrameFormat::DsdRaw {
            return Err(PipelineError::Unsupported(format!(
                "DSD to PCM conversion needs raw DSD input, got {:?}",
                input.kind
            )));
        }
        if input.channel_count == 0 {
            return Err(PipelineError::InvalidArgument("DSD input has no channels".into()));
        }

        let target_rate = self
            .settings
            .sample_rate
            .unwrap_or(input.sample_rate / DEFAULT_DECIMATION);
        if target_rate == 0 || input.sample_rate % target_rate != 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "PCM rate {} Hz is not an integer fraction of DSD rate {} Hz",
                target_rate, input.sample_rate
            )));
        }
        let ratio = input.sample_rate / target_rate;
        if ratio < 8 || ratio % 8 != 0 {
            return Err(PipelineError::InvalidArgument(format!(
                "decimation ratio {} must be a multiple of 8",
                ratio
            )));
        }

        let group_bytes = (ratio / 8) as usize;
        let taps = Self::taps(self.settings.quality);
        self.channels = (0..input.channel_count)
            .map(|_| ChannelDecimator::new(group_bytes, taps))
            .collect();

        let output = AudioFormat::pcm(self.settings.bit_depth.frame_format(), target_rate, input.channel_count);
        log::debug!(
            "dsd2pcm: {} Hz -> {} Hz (ratio {}, {} taps, {:?})",
            input.sample_rate,
            target_rate,
            ratio,
            taps,
            output.kind
        );
        self.output = Some(output);
        Ok(output)
    }

    fn process(&mut self, input: &Buffer, pool: &BufferPool) -> Result<Buffer, PipelineError> {
        let kind = self.output_format()?.kind;
        let pcm = self.convert(input.data())?;
        let mut output = Self::fill(pool, &pcm)?;
        output.copy_frame_info_from(input);
        output.format = kind;
        Ok(output)
    }

    fn supports_batch(&self) -> bool {
        true
    }

    fn process_batch(&mut self, inputs: &[Buffer], pool: &BufferPool) -> Result<Vec<Buffer>, PipelineError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let output = self.output_format()?;

        let total: usize = inputs.iter().map(Buffer::size).sum();
        let mut combined = Vec::with_capacity(total);
        for input in inputs {
            combined.extend_from_slice(input.data());
        }

        let pcm = self.convert(&combined)?;
        distribute_output(&pcm, inputs, output.pcm_block_align(), output.kind, pool)
    }

    /// Emits one sample frame for a partial group, padded with idle bits.
    fn flush(&mut self, pool: &BufferPool) -> Result<Option<Buffer>, PipelineError> {
        if self.channels.iter().all(|c| c.pending.is_empty()) {
            return Ok(None);
        }
        let output = self.output_format()?;

        let tail: Vec<Vec<f64>> = self.channels.iter_mut().map(|c| c.flush().into_iter().collect()).collect();
        let mut pcm = Vec::new();
        encode_samples(&interleave(&tail), output.kind, &mut pcm)?;

        let mut buffer = Self::fill(pool, &pcm)?;
        buffer.format = output.kind;
        Ok(Some(buffer))
    }

    fn reset(&mut self) {
        for channel in &mut self.channels {
            channel.reset();
        }
    }
}

/// Per-channel decimation state.
struct ChannelDecimator {
    group_bytes: usize,
    /// Bytes of an incomplete group left over from the previous frame.
    pending: Vec<u8>,
    history: VecDeque<f64>,
}

impl ChannelDecimator {
    fn new(group_bytes: usize, taps: usize) -> Self {
        Self {
            group_bytes,
            pending: Vec::with_capacity(group_bytes),
            history: VecDeque::from(vec![0.0; taps.max(1)]),
        }
    }

    fn decimate(&mut self, bytes: &[u8]) -> Vec<f64> {
        let mut samples = Vec::with_capacity((self.pending.len() + bytes.len()) / self.group_bytes);
        let mut input = bytes;

        if !self.pending.is_empty() {
            let take = (self.group_bytes - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < self.group_bytes {
                return samples;
            }
            let level = group_level(&self.pending);
            self.pending.clear();
            samples.push(self.smooth(level));
        }

        let mut groups = input.chunks_exact(self.group_bytes);
        for group in &mut groups {
            samples.push(self.smooth(group_level(group)));
        }
        self.pending.extend_from_slice(groups.remainder());
        samples
    }

    fn flush(&mut self) -> Option<f64> {
        if self.pending.is_empty() {
            return None;
        }
        self.pending.resize(self.group_bytes, DSD_IDLE_BYTE);
        let level = group_level(&self.pending);
        self.pending.clear();
        Some(self.smooth(level))
    }

    fn smooth(&mut self, level: f64) -> f64 {
        self.history.pop_front();
        self.history.push_back(level);
        self.history.iter().sum::<f64>() / self.history.len() as f64
    }

    fn reset(&mut self) {
        self.pending.clear();
        for value in &mut self.history {
            *value = 0.0;
        }
    }
}

/// Density of ones in `group`, mapped to `[-1, 1]`.
fn group_level(group: &[u8]) -> f64 {
    let bits = (group.len() * 8) as f64;
    let ones: u32 = group.iter().map(|b| b.count_ones()).sum();
    (2.0 * f64::from(ones) - bits) / bits
}

fn interleave(channels: &[Vec<f64>]) -> Vec<f64> {
    let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
    let mut interleaved = Vec::with_capacity(frames * channels.len());
    for n in 0..frames {
        for channel in channels {
            interleaved.push(channel[n]);
        }
    }
    interleaved
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsdpipe_core::{PcmBitDepth, DSD64_SAMPLE_RATE};

    const DSD64_STEREO_FRAME: usize = 9408;

    fn settings(quality: PcmQuality) -> PcmSettings {
        PcmSettings {
            bit_depth: PcmBitDepth::Bits16,
            quality,
            sample_rate: None,
        }
    }

    fn converter(quality: PcmQuality) -> DsdToPcm {
        let mut converter = DsdToPcm::new(settings(quality));
        converter.init(&AudioFormat::dsd(DSD64_SAMPLE_RATE, 2)).unwrap();
        converter
    }

    fn frame(pool: &BufferPool, bytes: &[u8], number: u64) -> Buffer {
        let mut buffer = pool.alloc().unwrap();
        buffer.fill_from(bytes).unwrap();
        buffer.frame_number = number;
        buffer.track_number = 1;
        buffer
    }

    fn samples16(buffer: &Buffer) -> Vec<i16> {
        buffer
            .data()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn default_rate_is_a_32x_decimation() {
        let mut converter = DsdToPcm::new(PcmSettings::default());
        let output = converter.init(&AudioFormat::dsd(DSD64_SAMPLE_RATE, 2)).unwrap();
        assert_eq!(output.sample_rate, 88_200);
        assert_eq!(output.kind, FrameFormat::PcmInt24);
        assert_eq!(output.channel_count, 2);
    }

    #[test]
    fn rejects_unusable_rates_and_inputs() {
        let dsd64 = AudioFormat::dsd(DSD64_SAMPLE_RATE, 2);
        let with_rate = |rate| PcmSettings {
            sample_rate: Some(rate),
            ..PcmSettings::default()
        };

        assert_eq!(DsdToPcm::new(with_rate(176_400)).init(&dsd64).unwrap().sample_rate, 176_400);
        assert!(matches!(
            DsdToPcm::new(with_rate(48_000)).init(&dsd64),
            Err(PipelineError::InvalidArgument(_))
        ));
        // 2822400 / 705600 = 4 bits per sample
        assert!(matches!(
            DsdToPcm::new(with_rate(705_600)).init(&dsd64),
            Err(PipelineError::InvalidArgument(_))
        ));
        assert!(matches!(
            DsdToPcm::new(PcmSettings::default()).init(&AudioFormat::dst(DSD64_SAMPLE_RATE, 2)),
            Err(PipelineError::Unsupported(_))
        ));
    }

    #[test]
    fn one_dsd64_frame_yields_1176_sample_frames() {
        let pool = BufferPool::new("pcm", 65_536, 8);
        let mut converter = converter(PcmQuality::Fast);
        let input = frame(&pool, &[DSD_IDLE_BYTE; DSD64_STEREO_FRAME], 7);

        let output = converter.process(&input, &pool).unwrap();
        assert_eq!(output.size(), 1176 * 2 * 2);
        assert_eq!(output.format, FrameFormat::PcmInt16);
        assert_eq!(output.frame_number, 7);
        assert!(samples16(&output).iter().all(|&s| s == 0));
    }

    #[test]
    fn bit_density_maps_to_level() {
        let pool = BufferPool::new("pcm", 1024, 8);
        let mut converter = converter(PcmQuality::Fast);
        // Left all ones, right all zeros: 4 bytes per channel per sample.
        let bytes: Vec<u8> = (0..16).map(|i| if i % 2 == 0 { 0xFF } else { 0x00 }).collect();

        let output = converter.process(&frame(&pool, &bytes, 0), &pool).unwrap();
        let samples = samples16(&output);
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0], i16::MAX);
        assert_eq!(samples[1], -i16::MAX);
    }

    #[test]
    fn smoothing_history_carries_across_frames() {
        let pool = BufferPool::new("pcm", 1024, 8);
        let mut converter = converter(PcmQuality::Normal);

        // Four groups of silence-at-minus-one fill the 4-tap window...
        converter.process(&frame(&pool, &[0x00; 32], 0), &pool).unwrap();
        // ...so the first full-scale group of the next frame averages to -0.5.
        let output = converter.process(&frame(&pool, &[0xFF; 8], 1), &pool).unwrap();
        assert_eq!(samples16(&output), vec![-16383, -16383]);

        converter.reset();
        let output = converter.process(&frame(&pool, &[0xFF; 8], 0), &pool).unwrap();
        // After reset the window holds zeros: (0 + 0 + 0 + 1) / 4.
        assert_eq!(samples16(&output), vec![8191, 8191]);
    }

    #[test]
    fn partial_groups_carry_over_and_flush() {
        let pool = BufferPool::new("pcm", 1024, 8);
        let mut converter = converter(PcmQuality::Fast);

        let output = converter.process(&frame(&pool, &[0xFF; 6], 0), &pool).unwrap();
        assert!(output.is_empty());
        let output = converter.process(&frame(&pool, &[0xFF; 2], 1), &pool).unwrap();
        assert_eq!(samples16(&output), vec![i16::MAX, i16::MAX]);

        assert!(converter.flush(&pool).unwrap().is_none());
        converter.process(&frame(&pool, &[0xFF; 2], 2), &pool).unwrap();
        let tail = converter.flush(&pool).unwrap().expect("pending group");
        // One 0xFF byte padded with three idle bytes: 20 of 32 bits set.
        assert_eq!(samples16(&tail), vec![8191, 8191]);
        assert!(converter.flush(&pool).unwrap().is_none());
    }

    #[test]
    fn batch_matches_frame_by_frame() {
        let pool = BufferPool::new("pcm", 65_536, 32);
        let inputs: Vec<Buffer> = (0..5u8)
            .map(|n| {
                let bytes: Vec<u8> = (0..DSD64_STEREO_FRAME).map(|i| (i as u8).wrapping_mul(n + 3)).collect();
                frame(&pool, &bytes, u64::from(n))
            })
            .collect();

        let mut sequential = converter(PcmQuality::High);
        let expected: Vec<u8> = inputs
            .iter()
            .flat_map(|input| sequential.process(input, &pool).unwrap().data().to_vec())
            .collect();

        let mut batched = converter(PcmQuality::High);
        let outputs = batched.process_batch(&inputs, &pool).unwrap();
        assert_eq!(outputs.len(), inputs.len());
        let actual: Vec<u8> = outputs.iter().flat_map(|b| b.data().to_vec()).collect();
        assert_eq!(actual, expected);
        for (n, output) in outputs.iter().enumerate() {
            assert_eq!(output.frame_number, n as u64);
            assert_eq!(output.size(), 1176 * 4);
        }
    }

    #[test]
    fn ragged_frames_are_rejected() {
        let pool = BufferPool::new("pcm", 1024, 8);
        let mut converter = converter(PcmQuality::Fast);
        let result = converter.process(&frame(&pool, &[0; 7], 0), &pool);
        assert!(matches!(result, Err(PipelineError::PcmConvert(_))));
    }
}
