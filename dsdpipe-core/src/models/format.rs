use serde::{Deserialize, Serialize};

use super::flags::flag_set;

/// Nominal SACD frame rate (frames per second).
pub const SACD_FRAME_RATE: u32 = 75;

/// DSD64 sample rate in Hz (64 × 44.1 kHz).
pub const DSD64_SAMPLE_RATE: u32 = 2_822_400;

/// Encoding of the bytes carried by a [`Buffer`](crate::Buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameFormat {
    /// 1-bit DSD, channels byte-interleaved, MSB first.
    DsdRaw,
    /// DST-compressed DSD, one compressed frame per buffer.
    Dst,
    PcmInt16,
    PcmInt24,
    PcmInt32,
    PcmFloat32,
    PcmFloat64,
}

impl FrameFormat {
    pub fn is_dsd(self) -> bool {
        matches!(self, Self::DsdRaw)
    }

    pub fn is_dst(self) -> bool {
        matches!(self, Self::Dst)
    }

    pub fn is_pcm(self) -> bool {
        !matches!(self, Self::DsdRaw | Self::Dst)
    }

    /// Bytes per PCM sample, or `None` for DSD/DST.
    pub fn bytes_per_sample(self) -> Option<usize> {
        match self {
            Self::PcmInt16 => Some(2),
            Self::PcmInt24 => Some(3),
            Self::PcmInt32 | Self::PcmFloat32 => Some(4),
            Self::PcmFloat64 => Some(8),
            Self::DsdRaw | Self::Dst => None,
        }
    }
}

/// Stream description reported by sources and produced by transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub kind: FrameFormat,
    pub sample_rate: u32,
    pub channel_count: u16,
    pub bits_per_sample: u16,
    /// Source frames per second (75 for SACD). Zero for PCM streams.
    pub frame_rate: u32,
}

impl AudioFormat {
    pub fn dsd(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            kind: FrameFormat::DsdRaw,
            sample_rate,
            channel_count,
            bits_per_sample: 1,
            frame_rate: SACD_FRAME_RATE,
        }
    }

    pub fn dst(sample_rate: u32, channel_count: u16) -> Self {
        Self {
            kind: FrameFormat::Dst,
            ..Self::dsd(sample_rate, channel_count)
        }
    }

    pub fn pcm(kind: FrameFormat, sample_rate: u32, channel_count: u16) -> Self {
        let bits_per_sample = kind.bytes_per_sample().map(|b| b as u16 * 8).unwrap_or(1);
        Self {
            kind,
            sample_rate,
            channel_count,
            bits_per_sample,
            frame_rate: 0,
        }
    }

    /// Bytes in one uncompressed DSD frame across all channels.
    ///
    /// DST frames are never larger than this, so it sizes the DSD pool.
    pub fn dsd_frame_bytes(&self) -> usize {
        let frame_rate = if self.frame_rate == 0 { SACD_FRAME_RATE } else { self.frame_rate };
        let per_channel = (self.sample_rate / 8 / frame_rate) as usize;
        per_channel.max(1) * self.channel_count.max(1) as usize
    }

    /// DSD samples per channel in one source frame.
    pub fn samples_per_frame(&self) -> u64 {
        let frame_rate = if self.frame_rate == 0 { SACD_FRAME_RATE } else { self.frame_rate };
        u64::from(self.sample_rate / frame_rate)
    }

    /// Bytes in one interleaved PCM sample frame (one sample per channel).
    pub fn pcm_block_align(&self) -> usize {
        self.kind.bytes_per_sample().unwrap_or(1) * self.channel_count.max(1) as usize
    }
}

flag_set! {
    /// What a sink accepts and which features it offers.
    pub struct SinkCapabilities: u8 {
        const DSD = 1 << 0;
        const DST = 1 << 1;
        const PCM = 1 << 2;
        const METADATA = 1 << 3;
        const MARKERS = 1 << 4;
        /// One output file across all tracks (edit master).
        const MULTI_TRACK = 1 << 5;
    }
}

impl SinkCapabilities {
    pub fn accepts(self, kind: FrameFormat) -> bool {
        match kind {
            FrameFormat::DsdRaw => self.contains(Self::DSD),
            FrameFormat::Dst => self.contains(Self::DST),
            _ => self.contains(Self::PCM),
        }
    }

    /// Whether the sink consumes audio frames at all.
    pub fn takes_audio(self) -> bool {
        self.intersects(Self::DSD | Self::DST | Self::PCM)
    }
}

flag_set! {
    /// Per-buffer markers describing its position in the stream.
    pub struct BufferFlags: u8 {
        const TRACK_START = 1 << 0;
        const TRACK_END = 1 << 1;
        const EOF = 1 << 2;
        const DISCONTINUITY = 1 << 3;
    }
}
