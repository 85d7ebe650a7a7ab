//! Output file and folder naming.

use serde::{Deserialize, Serialize};

use crate::models::metadata::{AlbumMetadata, TrackMetadata};

/// How per-track output files are named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackFilenameFormat {
    /// `01`
    Number,
    /// `01 - Title`
    #[default]
    NumberTitle,
    /// `01 - Artist - Title`
    NumberArtistTitle,
}

/// How the album output folder is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlbumFolderFormat {
    Title,
    #[default]
    ArtistTitle,
}

/// File name (without extension) for a track.
pub fn track_filename(number: u32, track: &TrackMetadata, format: TrackFilenameFormat) -> String {
    let title = sanitize(&track.title);
    let title = if title.is_empty() {
        format!("Track {:02}", number)
    } else {
        title
    };
    match format {
        TrackFilenameFormat::Number => format!("{:02}", number),
        TrackFilenameFormat::NumberTitle => format!("{:02} - {}", number, title),
        TrackFilenameFormat::NumberArtistTitle => {
            match track.performer.as_deref().map(sanitize).filter(|p| !p.is_empty()) {
                Some(artist) => format!("{:02} - {} - {}", number, artist, title),
                None => format!("{:02} - {}", number, title),
            }
        }
    }
}

/// Folder name for an album.
pub fn album_folder_name(album: &AlbumMetadata, format: AlbumFolderFormat) -> String {
    let title = sanitize(&album.title);
    let title = if title.is_empty() { "Unknown Album".to_string() } else { title };
    let base = match format {
        AlbumFolderFormat::Title => title,
        AlbumFolderFormat::ArtistTitle => {
            let artist = sanitize(&album.artist);
            if artist.is_empty() {
                title
            } else {
                format!("{} - {}", artist, title)
            }
        }
    };
    if album.disc_total > 1 {
        format!("{} (Disc {})", base, album.disc_number)
    } else {
        base
    }
}

/// Replaces characters that are not portable in file names.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .trim()
        .trim_end_matches('.')
        .to_string()
}
