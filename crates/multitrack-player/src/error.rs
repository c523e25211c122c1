//! Error taxonomy for the multitrack player.

use std::path::PathBuf;

use multitrack_types::PlaybackState;
use thiserror::Error;

use crate::track::TrackId;

/// Errors reported by [`crate::MultitrackPlayer`] operations and events.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// The source could not be resolved when the track was added.
    #[error("source unavailable: {path:?}: {reason}")]
    SourceUnavailable { path: PathBuf, reason: String },

    /// The source resolved but could not be decoded. Fatal for the player.
    #[error("decode failed for track {track}: {reason}")]
    Decode { track: TrackId, reason: String },

    /// A transport call was made before preparation finished.
    #[error("player is not prepared (state: {state})")]
    NotPrepared { state: PlaybackState },

    /// An argument was out of range.
    ///
    /// When `clamped_to` is set the clamped value was applied before the error was returned.
    #[error("invalid {name}: {value}")]
    InvalidArgument {
        name: &'static str,
        value: f64,
        clamped_to: Option<f64>,
    },

    /// The call is not legal in the current state. State was left unchanged.
    #[error("cannot {operation} while {state}")]
    InvalidStateTransition {
        operation: &'static str,
        state: PlaybackState,
    },

    /// The handle does not belong to this player.
    #[error("unknown track {0}")]
    UnknownTrack(TrackId),

    /// The engine thread is gone.
    #[error("player engine has shut down")]
    EngineShutdown,
}

impl PlayerError {
    /// Value that was applied despite the error, if the argument was clamped.
    pub fn clamped_to(&self) -> Option<f64> {
        match self {
            PlayerError::InvalidArgument { clamped_to, .. } => *clamped_to,
            _ => None,
        }
    }

    /// Track responsible for the error, when there is one.
    pub fn track(&self) -> Option<TrackId> {
        match self {
            PlayerError::Decode { track, .. } => Some(*track),
            PlayerError::UnknownTrack(track) => Some(*track),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_to_only_reported_for_invalid_argument() {
        let err = PlayerError::InvalidArgument {
            name: "volume",
            value: 1.5,
            clamped_to: Some(1.0),
        };
        assert_eq!(err.clamped_to(), Some(1.0));
        assert_eq!(err.to_string(), "invalid volume: 1.5");
        assert!(PlayerError::EngineShutdown.clamped_to().is_none());
    }

    #[test]
    fn decode_error_names_track() {
        let err = PlayerError::Decode {
            track: TrackId::new(3),
            reason: "bad header".to_string(),
        };
        assert_eq!(err.track(), Some(TrackId::new(3)));
        assert_eq!(err.to_string(), "decode failed for track #3: bad header");
    }

    #[test]
    fn state_errors_render_state_label() {
        let err = PlayerError::InvalidStateTransition {
            operation: "pause",
            state: PlaybackState::Idle,
        };
        assert_eq!(err.to_string(), "cannot pause while idle");
    }
}
