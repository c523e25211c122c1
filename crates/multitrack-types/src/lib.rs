use serde::{Deserialize, Serialize};

/// Transport state of a multitrack player.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Tracks may be added; nothing has been prepared yet.
    #[default]
    Idle,
    /// Waiting for every track to finish opening.
    Preparing,
    /// All tracks are open and playback may start.
    Ready,
    /// The shared clock is running.
    Playing,
    /// The shared clock is frozen at the current position.
    Paused,
    /// Playback was halted and the position reset.
    Stopped,
    /// A track failed to open. Terminal.
    Failed,
}

impl PlaybackState {
    /// `true` for the only state the player never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, PlaybackState::Failed)
    }

    /// Short lowercase label used in logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Preparing => "preparing",
            PlaybackState::Ready => "ready",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the player, taken under a single lock.
///
/// Times are seconds on the shared timeline.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    /// Transport state.
    pub state: PlaybackState,
    /// Current position on the shared timeline.
    pub current_time: f64,
    /// Length of the shared timeline (`max(offset + duration)` over known tracks).
    pub duration: f64,
    /// Shared playback rate.
    pub rate: f64,
    /// Number of tracks registered with the player.
    pub track_count: usize,
    /// Number of tracks whose source finished opening.
    pub ready_tracks: usize,
}

impl PlayerStatus {
    /// Position as a fraction of the timeline, for progress displays.
    ///
    /// Returns `0.0` when the duration is not known yet.
    pub fn progress(&self) -> f64 {
        if self.duration > 0.0 {
            (self.current_time / self.duration).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Per-track entry reported alongside [`PlayerStatus`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackStatus {
    /// Player-assigned track id.
    pub id: u64,
    /// Source path as given when the track was added.
    pub source: String,
    /// Start position of the track on the shared timeline (seconds, may be negative).
    pub timing_offset: f64,
    /// Track gain in `[0.0, 1.0]`.
    pub volume: f32,
    /// Decoded duration in seconds, once known.
    pub duration: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_zero_without_duration() {
        let status = PlayerStatus {
            current_time: 3.0,
            ..PlayerStatus::default()
        };
        assert_eq!(status.progress(), 0.0);
    }

    #[test]
    fn progress_is_clamped_fraction() {
        let mut status = PlayerStatus {
            current_time: 3.25,
            duration: 13.0,
            ..PlayerStatus::default()
        };
        assert_eq!(status.progress(), 0.25);
        status.current_time = 20.0;
        assert_eq!(status.progress(), 1.0);
    }

    #[test]
    fn only_failed_is_terminal() {
        assert!(PlaybackState::Failed.is_terminal());
        assert!(!PlaybackState::Stopped.is_terminal());
        assert_eq!(PlaybackState::default(), PlaybackState::Idle);
        assert_eq!(PlaybackState::Playing.to_string(), "playing");
    }
}
