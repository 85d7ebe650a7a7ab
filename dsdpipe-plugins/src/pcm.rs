use dsdpipe_core::{FrameFormat, PipelineError};

/// Appends `samples` in `[-1.0, 1.0]` to `out` as little-endian `kind` samples.
///
/// Out-of-range values are clamped.
pub fn encode_samples(samples: &[f64], kind: FrameFormat, out: &mut Vec<u8>) -> Result<(), PipelineError> {
    let encode: fn(f64, &mut Vec<u8>) = match kind {
        FrameFormat::PcmInt16 => |s: f64, out: &mut Vec<u8>| {
            out.extend_from_slice(&((s * f64::from(i16::MAX)) as i16).to_le_bytes());
        },
        FrameFormat::PcmInt24 => |s: f64, out: &mut Vec<u8>| {
            out.extend_from_slice(&((s * 8_388_607.0) as i32).to_le_bytes()[..3]);
        },
        FrameFormat::PcmInt32 => |s: f64, out: &mut Vec<u8>| {
            out.extend_from_slice(&((s * f64::from(i32::MAX)) as i32).to_le_bytes());
        },
        FrameFormat::PcmFloat32 => |s: f64, out: &mut Vec<u8>| out.extend_from_slice(&(s as f32).to_le_bytes()),
        FrameFormat::PcmFloat64 => |s: f64, out: &mut Vec<u8>| out.extend_from_slice(&s.to_le_bytes()),
        FrameFormat::DsdRaw | FrameFormat::Dst => {
            return Err(PipelineError::Unsupported(format!("{:?} is not a PCM format", kind)));
        }
    };

    out.reserve(samples.len() * kind.bytes_per_sample().unwrap_or(0));
    for &sample in samples {
        encode(sample.clamp(-1.0, 1.0), out);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int16_full_scale_and_clamping() {
        let mut out = Vec::new();
        encode_samples(&[1.0, -1.0, 0.0, 2.0], FrameFormat::PcmInt16, &mut out).unwrap();
        assert_eq!(out.len(), 8);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), -i16::MAX);
        assert_eq!(i16::from_le_bytes([out[4], out[5]]), 0);
        assert_eq!(i16::from_le_bytes([out[6], out[7]]), i16::MAX);
    }

    #[test]
    fn int24_is_three_bytes_little_endian() {
        let mut out = Vec::new();
        encode_samples(&[1.0, -1.0], FrameFormat::PcmInt24, &mut out).unwrap();
        assert_eq!(out, vec![0xFF, 0xFF, 0x7F, 0x01, 0x00, 0x80]);
    }

    #[test]
    fn float_output() {
        let mut out = Vec::new();
        encode_samples(&[0.5], FrameFormat::PcmFloat32, &mut out).unwrap();
        assert_eq!(f32::from_le_bytes([out[0], out[1], out[2], out[3]]), 0.5);
    }

    #[test]
    fn dsd_is_rejected() {
        let mut out = Vec::new();
        let result = encode_samples(&[0.0], FrameFormat::DsdRaw, &mut out);
        assert!(matches!(result, Err(PipelineError::Unsupported(_))));
    }
}
