//! Track selection parsing.
//!
//! Grammar:
//! ```text
//! spec  := "all" | item ("," item)*
//! item  := number | number "-" number
//! ```
//! Whitespace around tokens is ignored. `"all"` is only special when nothing
//! but whitespace follows it; `"all,3"` goes through the general parser and
//! is rejected as a malformed item.

use crate::models::error::PipelineError;

/// Ordered, duplicate-free list of 1-based track numbers.
///
/// Tracks are processed in insertion order, so `"5-1"` visits 5, 4, 3, 2, 1.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackSelection {
    tracks: Vec<u32>,
    current_idx: usize,
}

impl TrackSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every track from 1 to `track_count`.
    pub fn all(track_count: u32) -> Self {
        Self {
            tracks: (1..=track_count).collect(),
            current_idx: 0,
        }
    }

    /// Parses a selection string against a source with `max_track` tracks.
    pub fn parse(spec: &str, max_track: u32) -> Result<Self, PipelineError> {
        let trimmed = spec.trim_start();
        if let Some(rest) = trimmed.strip_prefix("all") {
            if rest.trim().is_empty() {
                let selection = Self::all(max_track);
                if selection.is_empty() {
                    return Err(PipelineError::InvalidTrackSpec("source has no tracks".into()));
                }
                return Ok(selection);
            }
        }

        let mut selection = Self::new();
        for item in spec.split(',') {
            let item = item.trim();
            if item.is_empty() {
                return Err(PipelineError::InvalidTrackSpec(format!("empty item in {:?}", spec)));
            }

            match item.split_once('-') {
                Some((start, end)) => {
                    let start = parse_track_number(start, max_track)?;
                    let end = parse_track_number(end, max_track)?;
                    if start <= end {
                        for track in start..=end {
                            selection.add(track, max_track)?;
                        }
                    } else {
                        for track in (end..=start).rev() {
                            selection.add(track, max_track)?;
                        }
                    }
                }
                None => {
                    let track = parse_track_number(item, max_track)?;
                    selection.add(track, max_track)?;
                }
            }
        }

        if selection.is_empty() {
            return Err(PipelineError::InvalidTrackSpec(format!("{:?} selects no tracks", spec)));
        }
        Ok(selection)
    }

    /// Appends a track unless it is already selected.
    pub fn add(&mut self, track: u32, max_track: u32) -> Result<(), PipelineError> {
        if track == 0 || track > max_track {
            return Err(PipelineError::TrackNotFound(track));
        }
        if !self.contains(track) {
            self.tracks.push(track);
        }
        Ok(())
    }

    pub fn contains(&self, track: u32) -> bool {
        self.tracks.contains(&track)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.tracks
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.tracks.iter().copied()
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current_idx = 0;
    }

    /// Position of the track being processed during a run.
    pub fn current_index(&self) -> usize {
        self.current_idx
    }

    pub(crate) fn set_current_index(&mut self, idx: usize) {
        self.current_idx = idx;
    }
}

fn parse_track_number(token: &str, max_track: u32) -> Result<u32, PipelineError> {
    let token = token.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PipelineError::InvalidTrackSpec(format!("{:?} is not a track number", token)));
    }
    // All digits, so the only parse failure left is overflow.
    let track = token.parse::<u32>().unwrap_or(u32::MAX);
    if track == 0 || track > max_track {
        return Err(PipelineError::TrackNotFound(track));
    }
    Ok(track)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(spec: &str) -> Result<Vec<u32>, PipelineError> {
        TrackSelection::parse(spec, 10).map(|s| s.as_slice().to_vec())
    }

    #[test]
    fn all_selects_every_track() {
        assert_eq!(parse("all").unwrap(), (1..=10).collect::<Vec<_>>());
        assert_eq!(parse("  all \t").unwrap().len(), 10);
    }

    #[test]
    fn all_followed_by_more_falls_through() {
        assert!(matches!(parse("all,3"), Err(PipelineError::InvalidTrackSpec(_))));
        assert!(matches!(parse("all 3"), Err(PipelineError::InvalidTrackSpec(_))));
        assert!(matches!(parse("allx"), Err(PipelineError::InvalidTrackSpec(_))));
    }

    #[test]
    fn lists_and_ranges() {
        assert_eq!(parse("1,3,5").unwrap(), vec![1, 3, 5]);
        assert_eq!(parse("1-3,5,7-9").unwrap(), vec![1, 2, 3, 5, 7, 8, 9]);
        assert_eq!(parse(" 2 - 4 , 6 ").unwrap(), vec![2, 3, 4, 6]);
    }

    #[test]
    fn descending_range_keeps_insertion_order() {
        assert_eq!(parse("5-1").unwrap(), vec![5, 4, 3, 2, 1]);
        assert_eq!(parse("3,1-4").unwrap(), vec![3, 1, 2, 4]);
    }

    #[test]
    fn duplicates_are_dropped() {
        assert_eq!(parse("2,2,1-3").unwrap(), vec![2, 1, 3]);
    }

    #[test]
    fn out_of_range_tracks() {
        assert_eq!(parse("0"), Err(PipelineError::TrackNotFound(0)));
        assert_eq!(parse("11"), Err(PipelineError::TrackNotFound(11)));
        assert_eq!(parse("8-12"), Err(PipelineError::TrackNotFound(12)));
        assert_eq!(parse("99999999999"), Err(PipelineError::TrackNotFound(u32::MAX)));
    }

    #[test]
    fn malformed_specs() {
        for spec in ["1-", "-3", "a", "1,,2", "1;2", "", "   ", "1-2-3", "+1"] {
            assert!(
                matches!(parse(spec), Err(PipelineError::InvalidTrackSpec(_))),
                "{spec:?} should be rejected"
            );
        }
    }

    #[test]
    fn empty_source_has_nothing_to_select() {
        assert!(matches!(
            TrackSelection::parse("all", 0),
            Err(PipelineError::InvalidTrackSpec(_))
        ));
    }

    #[test]
    fn manual_add_checks_range() {
        let mut selection = TrackSelection::new();
        selection.add(2, 3).unwrap();
        selection.add(2, 3).unwrap();
        assert_eq!(selection.len(), 1);
        assert_eq!(selection.add(4, 3), Err(PipelineError::TrackNotFound(4)));
        assert!(selection.contains(2));
        selection.clear();
        assert!(selection.is_empty());
    }
}
