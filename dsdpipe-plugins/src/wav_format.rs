//! RIFF/WAVE header generation and patching.
//!
//! Headers are written with zero sizes when a file is opened and patched in
//! place once the amount of sample data is known.

use dsdpipe_core::{AudioFormat, FrameFormat};

/// Size of the canonical WAV header in bytes.
pub const WAV_HEADER_SIZE: usize = 44;

const FORMAT_PCM: u16 = 1;
const FORMAT_IEEE_FLOAT: u16 = 3;

/// Largest data chunk a RIFF size field can describe.
pub const MAX_DATA_SIZE: u64 = u32::MAX as u64 - 36;

/// Generate a 44-byte WAV header for `format`.
///
/// Layout:
/// ```text
/// [0-3]    "RIFF"
/// [4-7]    36 + data_size
/// [8-11]   "WAVE"
/// [12-15]  "fmt "
/// [16-19]  16
/// [20-21]  format code (1 = integer PCM, 3 = IEEE float)
/// [22-23]  channels
/// [24-27]  sample_rate
/// [28-31]  byte_rate = sample_rate * block_align
/// [32-33]  block_align = channels * bytes_per_sample
/// [34-35]  bits_per_sample
/// [36-39]  "data"
/// [40-43]  data_size
/// ```
pub fn generate_header(format: &AudioFormat, data_size: u32) -> [u8; WAV_HEADER_SIZE] {
    let format_code = match format.kind {
        FrameFormat::PcmFloat32 | FrameFormat::PcmFloat64 => FORMAT_IEEE_FLOAT,
        _ => FORMAT_PCM,
    };
    let block_align = format.pcm_block_align() as u16;
    let bits_per_sample = format.kind.bytes_per_sample().unwrap_or(1) as u16 * 8;
    let byte_rate = format.sample_rate * u32::from(block_align);

    let mut header = [0u8; WAV_HEADER_SIZE];

    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&(36 + data_size).to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");

    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&format_code.to_le_bytes());
    header[22..24].copy_from_slice(&format.channel_count.to_le_bytes());
    header[24..28].copy_from_slice(&format.sample_rate.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&bits_per_sample.to_le_bytes());

    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    header
}

/// Patch the RIFF chunk size at offset 4 (file size - 8).
pub fn patch_file_size(header: &mut [u8], total_file_size: u64) {
    let chunk_size = total_file_size.saturating_sub(8).min(u64::from(u32::MAX)) as u32;
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
}

/// Patch the data chunk size at offset 40.
pub fn patch_data_size(header: &mut [u8], data_size: u64) {
    let data_size = data_size.min(u64::from(u32::MAX)) as u32;
    header[40..44].copy_from_slice(&data_size.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u16_at(header: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes([header[offset], header[offset + 1]])
    }

    fn u32_at(header: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes([header[offset], header[offset + 1], header[offset + 2], header[offset + 3]])
    }

    #[test]
    fn header_magic() {
        let header = generate_header(&AudioFormat::pcm(FrameFormat::PcmInt16, 44_100, 2), 0);
        assert_eq!(&header[0..4], b"RIFF");
        assert_eq!(&header[8..12], b"WAVE");
        assert_eq!(&header[12..16], b"fmt ");
        assert_eq!(&header[36..40], b"data");
    }

    #[test]
    fn header_88k_stereo_24bit() {
        let header = generate_header(&AudioFormat::pcm(FrameFormat::PcmInt24, 88_200, 2), 6000);

        assert_eq!(u16_at(&header, 20), 1);
        assert_eq!(u16_at(&header, 22), 2);
        assert_eq!(u32_at(&header, 24), 88_200);
        assert_eq!(u32_at(&header, 28), 88_200 * 6);
        assert_eq!(u16_at(&header, 32), 6);
        assert_eq!(u16_at(&header, 34), 24);
        assert_eq!(u32_at(&header, 40), 6000);
        assert_eq!(u32_at(&header, 4), 36 + 6000);
    }

    #[test]
    fn float_formats_use_ieee_code() {
        let header = generate_header(&AudioFormat::pcm(FrameFormat::PcmFloat32, 48_000, 1), 0);
        assert_eq!(u16_at(&header, 20), 3);
        assert_eq!(u16_at(&header, 34), 32);
    }

    #[test]
    fn patch_sizes() {
        let mut header = generate_header(&AudioFormat::pcm(FrameFormat::PcmInt16, 48_000, 2), 0);

        patch_data_size(&mut header, 19_200);
        assert_eq!(u32_at(&header, 40), 19_200);

        patch_file_size(&mut header, 19_200 + 44);
        assert_eq!(u32_at(&header, 4), 19_200 + 36);
    }
}
