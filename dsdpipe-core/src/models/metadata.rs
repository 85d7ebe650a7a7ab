use serde::{Deserialize, Serialize};

/// Album-level tags reported by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumMetadata {
    pub title: String,
    pub artist: String,
    pub publisher: Option<String>,
    pub copyright: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u16>,
    pub catalog_number: Option<String>,
    pub disc_number: u16,
    pub disc_total: u16,
    pub track_total: u32,
}

/// Per-track tags reported by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// 1-based track number on the source.
    pub number: u32,
    pub title: String,
    pub performer: Option<String>,
    pub composer: Option<String>,
    pub isrc: Option<String>,
    /// Length in frames, if the source knows it.
    pub frame_count: Option<u64>,
}

impl TrackMetadata {
    pub fn new(number: u32, title: impl Into<String>) -> Self {
        Self {
            number,
            title: title.into(),
            ..Default::default()
        }
    }
}
