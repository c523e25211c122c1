//! Track data model and shared-timeline arithmetic.

use std::fmt;
use std::path::{Path, PathBuf};

use multitrack_types::TrackStatus;

/// Player-assigned track handle. Unique for the lifetime of a player.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(u64);

impl TrackId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric id.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One audio source placed on the shared timeline.
///
/// Only `timing_offset` and `volume` change after the track is added; `duration`
/// is filled in once the source has been opened.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    id: TrackId,
    source: PathBuf,
    timing_offset: f64,
    volume: f32,
    duration: Option<f64>,
}

impl Track {
    pub(crate) fn new(id: TrackId, source: PathBuf, timing_offset: f64) -> Self {
        Self {
            id,
            source,
            timing_offset,
            volume: 1.0,
            duration: None,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Shared-timeline position of the track's first sample, in seconds.
    pub fn timing_offset(&self) -> f64 {
        self.timing_offset
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Decoded length in seconds, once known.
    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    /// Shared-timeline position of the track's last sample.
    pub fn end_time(&self) -> Option<f64> {
        self.duration.map(|d| self.timing_offset + d)
    }

    /// Local position for shared time `at`: `clamp(at - offset, 0, duration)`.
    pub fn local_position(&self, at: f64) -> f64 {
        let len = self.duration.unwrap_or(0.0).max(0.0);
        (at - self.timing_offset).clamp(0.0, len)
    }

    /// `true` while the shared clock has not reached this track's first sample.
    pub fn starts_after(&self, at: f64) -> bool {
        at < self.timing_offset
    }

    pub(crate) fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    pub(crate) fn set_timing_offset(&mut self, offset: f64) {
        self.timing_offset = offset;
    }

    pub(crate) fn set_duration(&mut self, duration: f64) {
        self.duration = Some(duration.max(0.0));
    }

    pub fn status(&self) -> TrackStatus {
        TrackStatus {
            id: self.id.get(),
            source: self.source.display().to_string(),
            timing_offset: self.timing_offset,
            volume: self.volume,
            duration: self.duration,
        }
    }
}

/// Length of the shared timeline: the latest end time over tracks with a known
/// duration, never below zero.
pub fn timeline_duration<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> f64 {
    tracks
        .into_iter()
        .filter_map(Track::end_time)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: u64, offset: f64, duration: Option<f64>) -> Track {
        let mut t = Track::new(TrackId::new(id), PathBuf::from(format!("{id}.flac")), offset);
        if let Some(d) = duration {
            t.set_duration(d);
        }
        t
    }

    #[test]
    fn timeline_duration_takes_latest_end() {
        let a = track(1, 0.0, Some(10.0));
        let b = track(2, 3.0, Some(10.0));
        assert_eq!(timeline_duration([&a, &b]), 13.0);
    }

    #[test]
    fn timeline_duration_ignores_unknown_and_clamps_negative() {
        let pending = track(1, 50.0, None);
        let early = track(2, -20.0, Some(5.0));
        assert_eq!(timeline_duration([&pending, &early]), 0.0);
        assert_eq!(timeline_duration(std::iter::empty()), 0.0);
    }

    #[test]
    fn adding_a_longer_track_never_shrinks_duration() {
        let mut tracks = vec![track(1, 0.0, Some(10.0))];
        let before = timeline_duration(&tracks);
        tracks.push(track(2, 2.0, Some(4.0)));
        assert_eq!(timeline_duration(&tracks), before);
        tracks.push(track(3, 8.0, Some(4.0)));
        assert_eq!(timeline_duration(&tracks), 12.0);
    }

    #[test]
    fn local_position_translates_and_clamps() {
        let b = track(2, 3.0, Some(10.0));
        assert_eq!(b.local_position(5.0), 2.0);
        assert_eq!(b.local_position(1.0), 0.0);
        assert_eq!(b.local_position(20.0), 10.0);
        assert!(b.starts_after(2.999));
        assert!(!b.starts_after(3.0));
    }

    #[test]
    fn negative_offset_skips_head_of_track() {
        let t = track(1, -2.0, Some(10.0));
        assert_eq!(t.local_position(0.0), 2.0);
        assert_eq!(t.end_time(), Some(8.0));
        assert!(!t.starts_after(0.0));
    }

    #[test]
    fn status_reports_fields() {
        let mut t = track(7, 1.5, Some(4.0));
        t.set_volume(0.25);
        let status = t.status();
        assert_eq!(status.id, 7);
        assert_eq!(status.source, "7.flac");
        assert_eq!(status.timing_offset, 1.5);
        assert_eq!(status.volume, 0.25);
        assert_eq!(status.duration, Some(4.0));
        assert_eq!(TrackId::new(7).to_string(), "#7");
    }
}
