//! Listener callbacks and the notification thread.
//!
//! Events and periodic time samples are delivered from a dedicated thread, so a
//! listener may call back into the player from inside a callback. The listener is
//! held through a [`Weak`] reference; once the caller drops it, delivery stops.

use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, after, never, select};
use multitrack_types::{PlaybackState, PlayerStatus};

use crate::engine::{SharedState, lock_shared};
use crate::error::PlayerError;

/// Observer of player lifecycle and position. Every method defaults to a no-op.
pub trait PlayerListener: Send + Sync {
    /// Preparation finished. `Err` carries the track that failed to open.
    fn on_prepared(&self, _status: &PlayerStatus, _result: Result<(), &PlayerError>) {}

    fn on_started(&self, _status: &PlayerStatus) {}

    fn on_paused(&self, _status: &PlayerStatus) {}

    fn on_stopped(&self, _status: &PlayerStatus) {}

    /// Periodic sample of the shared clock while playing.
    fn on_time_changed(&self, _status: &PlayerStatus, _current_time: f64) {}
}

/// Lifecycle events produced by the engine.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Event {
    Prepared(Result<(), PlayerError>),
    Started,
    Paused,
    Stopped,
}

enum Message {
    Event(Event, PlayerStatus),
    Listener(Option<Weak<dyn PlayerListener>>),
    Shutdown,
}

/// Sending side used by the engine and the player handle.
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: Sender<Message>,
}

impl Notifier {
    pub(crate) fn emit(&self, event: Event, status: PlayerStatus) {
        tracing::debug!(?event, state = %status.state, "notify");
        let _ = self.tx.send(Message::Event(event, status));
    }

    pub(crate) fn set_listener(&self, listener: Option<Weak<dyn PlayerListener>>) {
        let _ = self.tx.send(Message::Listener(listener));
    }
}

/// Owner of the notification thread.
pub(crate) struct Dispatcher {
    notifier: Notifier,
    join: Option<thread::JoinHandle<()>>,
}

impl Dispatcher {
    pub(crate) fn spawn(shared: Arc<Mutex<SharedState>>) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        let join = thread::spawn(move || dispatch_loop(shared, rx));
        Self {
            notifier: Notifier { tx },
            join: Some(join),
        }
    }

    pub(crate) fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let _ = self.notifier.tx.send(Message::Shutdown);
        if let Some(join) = self.join.take() {
            // The last player handle may be released from inside a callback.
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
    }
}

fn dispatch_loop(shared: Arc<Mutex<SharedState>>, rx: Receiver<Message>) {
    let mut listener: Option<Weak<dyn PlayerListener>> = None;
    let mut next_tick: Option<Instant> = None;

    loop {
        let timer = match next_tick {
            Some(due) => after(due.saturating_duration_since(Instant::now())),
            None => never(),
        };

        select! {
            recv(rx) -> msg => match msg {
                Ok(Message::Event(event, status)) => {
                    deliver(&listener, &event, &status);
                }
                Ok(Message::Listener(l)) => listener = l,
                Ok(Message::Shutdown) | Err(_) => break,
            },
            recv(timer) -> _ => {
                next_tick = None;
                if let Some((status, time)) = sample(&shared) {
                    if let Some(l) = listener.as_ref().and_then(Weak::upgrade) {
                        l.on_time_changed(&status, time);
                    }
                }
            },
        }

        // Re-arm from "now" so a shortened interval never produces catch-up ticks.
        let guard = lock_shared(&shared);
        if guard.state == PlaybackState::Playing {
            if next_tick.is_none() {
                next_tick = Some(Instant::now() + guard.update_interval);
            }
        } else {
            next_tick = None;
        }
    }
    tracing::debug!("notification thread exiting");
}

/// Current time and status, or `None` once the state has left Playing.
fn sample(shared: &Arc<Mutex<SharedState>>) -> Option<(PlayerStatus, f64)> {
    let guard = lock_shared(shared);
    if guard.state != PlaybackState::Playing {
        return None;
    }
    let status = guard.status();
    let time = status.current_time;
    Some((status, time))
}

fn deliver(listener: &Option<Weak<dyn PlayerListener>>, event: &Event, status: &PlayerStatus) {
    let Some(l) = listener.as_ref().and_then(Weak::upgrade) else {
        return;
    };
    match event {
        Event::Prepared(result) => l.on_prepared(status, result.as_ref().map(|_| ())),
        Event::Started => l.on_started(status),
        Event::Paused => l.on_paused(status),
        Event::Stopped => l.on_stopped(status),
    }
}
