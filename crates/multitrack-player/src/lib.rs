//! Synchronized multitrack playback.
//!
//! A [`MultitrackPlayer`] plays several audio files against one shared timeline.
//! Each track may start at its own offset; seeking, pausing and rate changes apply
//! to all of them together.

pub mod binding;
pub mod clock;
pub mod config;
pub mod device;
pub mod device_binding;
pub mod engine;
pub mod error;
pub mod notify;
pub mod output;
pub mod track;

mod decode;
mod mixer;
mod resample;

pub use config::{OutputConfig, PlayerConfig};
pub use engine::MultitrackPlayer;
pub use error::{PlayerError, Result};
pub use multitrack_types::{PlaybackState, PlayerStatus, TrackStatus};
pub use notify::PlayerListener;
pub use track::TrackId;
