use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::PipelineError;
use super::flags::flag_set;
use super::format::FrameFormat;
use crate::storage::naming::{AlbumFolderFormat, TrackFilenameFormat};

flag_set! {
    /// Output formats requested by the front end.
    pub struct OutputFormats: u16 {
        const DSF = 1 << 0;
        const DSDIFF = 1 << 1;
        const EDIT_MASTER = 1 << 2;
        const WAV = 1 << 3;
        const FLAC = 1 << 4;
        const XML = 1 << 5;
        const CUE = 1 << 6;
    }
}

impl OutputFormats {
    /// Whether any requested format needs PCM conversion.
    pub fn needs_pcm(self) -> bool {
        self.intersects(Self::WAV | Self::FLAC)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PcmBitDepth {
    #[serde(rename = "16")]
    Bits16,
    #[default]
    #[serde(rename = "24")]
    Bits24,
    #[serde(rename = "32")]
    Bits32,
}

impl PcmBitDepth {
    pub fn bits(self) -> u16 {
        match self {
            Self::Bits16 => 16,
            Self::Bits24 => 24,
            Self::Bits32 => 32,
        }
    }

    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            16 => Some(Self::Bits16),
            24 => Some(Self::Bits24),
            32 => Some(Self::Bits32),
            _ => None,
        }
    }

    pub fn frame_format(self) -> FrameFormat {
        match self {
            Self::Bits16 => FrameFormat::PcmInt16,
            Self::Bits24 => FrameFormat::PcmInt24,
            Self::Bits32 => FrameFormat::PcmInt32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcmQuality {
    Fast,
    #[default]
    Normal,
    High,
}

/// DSD→PCM conversion settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PcmSettings {
    pub bit_depth: PcmBitDepth,
    pub quality: PcmQuality,
    /// Output rate in Hz. `None` picks the converter's default for the source rate.
    pub sample_rate: Option<u32>,
}

/// Options for DSD-domain outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DsdOptions {
    /// Pass DST frames through untouched to sinks that accept them.
    pub keep_dst: bool,
    pub write_id3: bool,
}

/// Everything a front end hands the pipeline besides source and sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output_formats: OutputFormats,
    pub pcm: PcmSettings,

    /// FLAC compression level, 0–8.
    pub flac_compression: u8,

    pub dsd: DsdOptions,
    pub track_filename_format: TrackFilenameFormat,
    pub album_folder_format: AlbumFolderFormat,

    /// Track selection, e.g. `"all"` or `"1-3,5"`.
    pub track_spec: String,

    pub output_directory: PathBuf,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.output_formats.is_empty() {
            return Err("no output format selected".into());
        }
        if self.flac_compression > 8 {
            return Err(format!("unsupported FLAC compression level: {}", self.flac_compression));
        }
        if self.pcm.sample_rate == Some(0) {
            return Err("PCM sample rate must be positive".into());
        }
        if self.track_spec.trim().is_empty() {
            return Err("track selection is empty".into());
        }
        Ok(())
    }

    /// Read a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let json = fs::read_to_string(path)
            .map_err(|e| PipelineError::InvalidArgument(format!("failed to read config: {}", e)))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| PipelineError::InvalidArgument(format!("failed to parse config: {}", e)))?;
        config.validate().map_err(PipelineError::InvalidArgument)?;
        Ok(config)
    }

    /// Write this configuration as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::InvalidArgument(format!("failed to serialize config: {}", e)))?;
        fs::write(path, json)
            .map_err(|e| PipelineError::InvalidArgument(format!("failed to write config: {}", e)))?;
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_formats: OutputFormats::DSF,
            pcm: PcmSettings::default(),
            flac_compression: 5,
            dsd: DsdOptions::default(),
            track_filename_format: TrackFilenameFormat::default(),
            album_folder_format: AlbumFolderFormat::default(),
            track_spec: "all".into(),
            output_directory: PathBuf::from("."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let config = PipelineConfig {
            flac_compression: 9,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().contains("FLAC"));

        let config = PipelineConfig {
            output_formats: OutputFormats::empty(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            track_spec: "  ".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_front_end_json() {
        let json = r#"{
            "output_formats": 9,
            "pcm": { "bit_depth": "16", "quality": "high", "sample_rate": 176400 },
            "track_spec": "1-3"
        }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.output_formats, OutputFormats::DSF | OutputFormats::WAV);
        assert!(config.output_formats.needs_pcm());
        assert_eq!(config.pcm.bit_depth, PcmBitDepth::Bits16);
        assert_eq!(config.pcm.quality, PcmQuality::High);
        assert_eq!(config.pcm.sample_rate, Some(176_400));
        assert_eq!(config.flac_compression, 5);
        assert_eq!(config.track_spec, "1-3");
    }

    #[test]
    fn save_then_load_file() {
        let path = std::env::temp_dir().join(format!("dsdpipe_config_{}.json", uuid::Uuid::new_v4()));
        let config = PipelineConfig {
            output_formats: OutputFormats::EDIT_MASTER | OutputFormats::CUE,
            track_spec: "2,4".into(),
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(PipelineConfig::load(&path).unwrap(), config);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn bit_depth_mapping() {
        assert_eq!(PcmBitDepth::from_bits(24), Some(PcmBitDepth::Bits24));
        assert_eq!(PcmBitDepth::from_bits(20), None);
        assert_eq!(PcmBitDepth::Bits32.frame_format(), FrameFormat::PcmInt32);
    }
}
