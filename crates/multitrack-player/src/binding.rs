//! Per-track transport primitives.
//!
//! A [`TrackBinding`] owns whatever resources play one track. It only knows the track's
//! own time axis: every position it receives is relative to the track's first sample.
//! The engine translates shared-timeline time into local time and is the only caller.

use std::path::Path;

use crossbeam_channel::Sender;

use crate::error::Result;
use crate::track::TrackId;

/// Transport primitives for one track.
pub trait TrackBinding: Send {
    /// Begin opening the source. Completion (duration in seconds, or a decode failure) is
    /// reported through `reporter`, from any thread. Failures are not retried.
    fn open(&mut self, reporter: OpenReporter);

    /// Move to `local` seconds from the track's first sample.
    fn seek(&mut self, local: f64);

    fn set_rate(&mut self, rate: f64);

    /// Gain in `[0.0, 1.0]`.
    fn set_volume(&mut self, gain: f32);

    /// Run from the current position. A position outside `[0, duration)` stays silent.
    fn start(&mut self);

    fn pause(&mut self);
}

/// Creates bindings for newly added tracks.
pub trait BindingFactory: Send {
    /// Resolve `source` and build its binding, or fail with
    /// [`crate::PlayerError::SourceUnavailable`].
    fn create(&mut self, track: TrackId, source: &Path) -> Result<Box<dyn TrackBinding>>;
}

/// Result of opening one track: its duration in seconds or a failure reason.
#[derive(Debug)]
pub(crate) struct OpenOutcome {
    pub(crate) track: TrackId,
    pub(crate) result: std::result::Result<f64, String>,
}

/// One-shot completion handle passed to [`TrackBinding::open`].
///
/// Dropping it without reporting counts as a failed open.
pub struct OpenReporter {
    track: TrackId,
    tx: Option<Sender<OpenOutcome>>,
}

impl OpenReporter {
    pub(crate) fn new(track: TrackId, tx: Sender<OpenOutcome>) -> Self {
        Self {
            track,
            tx: Some(tx),
        }
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    /// The source is open and `duration` seconds long.
    pub fn ready(mut self, duration: f64) {
        self.send(Ok(duration));
    }

    pub fn failed(mut self, reason: impl Into<String>) {
        self.send(Err(reason.into()));
    }

    fn send(&mut self, result: std::result::Result<f64, String>) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(OpenOutcome {
                track: self.track,
                result,
            });
        }
    }
}

impl Drop for OpenReporter {
    fn drop(&mut self) {
        if self.tx.is_some() {
            tracing::warn!(track = %self.track, "open abandoned without a result");
            self.send(Err("open abandoned".to_string()));
        }
    }
}
