//! Master clock for the shared timeline.
//!
//! The clock is a position anchored to an [`Instant`]. While running it advances at
//! `rate` seconds of timeline per second of wall time; while stopped it holds its
//! position. Every mutating call re-anchors at the moment it is made, so rate changes
//! and seeks never make the reading jump except to the requested position.
//!
//! The `*_at` variants take the instant explicitly so callers can use one instant for
//! a batch of related updates.

use std::time::{Duration, Instant};

#[derive(Clone, Debug)]
pub struct MasterClock {
    position: f64,
    anchor: Option<Instant>,
    rate: f64,
}

impl MasterClock {
    /// A stopped clock at position zero.
    pub fn new(rate: f64) -> Self {
        Self {
            position: 0.0,
            anchor: None,
            rate,
        }
    }

    pub fn now(&self) -> f64 {
        self.now_at(Instant::now())
    }

    pub fn now_at(&self, at: Instant) -> f64 {
        match self.anchor {
            Some(anchor) => {
                self.position + at.saturating_duration_since(anchor).as_secs_f64() * self.rate
            }
            None => self.position,
        }
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Run from `from`.
    pub fn start(&mut self, from: f64) {
        self.start_at(from, Instant::now());
    }

    pub fn start_at(&mut self, from: f64, at: Instant) {
        self.position = from;
        self.anchor = Some(at);
    }

    /// Freeze the clock and return the frozen position.
    pub fn stop(&mut self) -> f64 {
        self.stop_at(Instant::now())
    }

    pub fn stop_at(&mut self, at: Instant) -> f64 {
        self.position = self.now_at(at);
        self.anchor = None;
        self.position
    }

    /// Change rate, keeping the position reached so far.
    pub fn set_rate(&mut self, rate: f64) {
        self.set_rate_at(rate, Instant::now());
    }

    pub fn set_rate_at(&mut self, rate: f64, at: Instant) {
        if self.anchor.is_some() {
            self.position = self.now_at(at);
            self.anchor = Some(at);
        }
        self.rate = rate;
    }

    /// Jump to `position` without changing whether the clock runs.
    pub fn set_position(&mut self, position: f64) {
        self.set_position_at(position, Instant::now());
    }

    pub fn set_position_at(&mut self, position: f64, at: Instant) {
        self.position = position;
        if self.anchor.is_some() {
            self.anchor = Some(at);
        }
    }

    /// Wall time until the clock reads `target`.
    ///
    /// `None` while stopped, or when the wait does not fit in a `Duration` (a vanishingly
    /// small rate). Targets already reached yield `Duration::ZERO`.
    pub fn time_until(&self, target: f64, at: Instant) -> Option<Duration> {
        if self.anchor.is_none() || self.rate <= 0.0 {
            return None;
        }
        let remaining = target - self.now_at(at);
        if remaining <= 0.0 {
            return Some(Duration::ZERO);
        }
        Duration::try_from_secs_f64(remaining / self.rate).ok()
    }
}
