//! Synchronization engine.
//!
//! [`MultitrackPlayer`] is a handle to an engine thread that owns every track binding
//! and the master clock. Control calls are sent to that thread and applied one at a
//! time; the caller blocks only until the command has been applied, never on I/O.
//!
//! The engine thread also receives open results from bindings and runs the timers
//! that start offset tracks when the clock reaches them and end playback at the end
//! of the timeline.
//!
//! State readable from other threads (transport state, clock, rate, duration, tracks)
//! lives in one [`SharedState`] behind one mutex, so every read sees a consistent
//! snapshot. Only the engine thread writes it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, after, never, select};
use multitrack_types::{PlaybackState, PlayerStatus, TrackStatus};

use crate::binding::{BindingFactory, OpenOutcome, OpenReporter, TrackBinding};
use crate::clock::MasterClock;
use crate::config::{OutputConfig, PlayerConfig};
use crate::device_binding::DeviceBindingFactory;
use crate::error::{PlayerError, Result};
use crate::notify::{Dispatcher, Event, Notifier, PlayerListener};
use crate::track::{Track, TrackId, timeline_duration};

/// Tolerance when comparing the clock against a track offset.
const START_EPSILON_SECS: f64 = 1e-6;

/// Longest single timer wait; the deadline is recomputed when it fires.
const MAX_TIMER_WAIT: Duration = Duration::from_secs(60);

/// Snapshot shared between the engine thread and readers.
pub(crate) struct SharedState {
    pub(crate) state: PlaybackState,
    pub(crate) clock: MasterClock,
    pub(crate) duration: f64,
    pub(crate) update_interval: Duration,
    pub(crate) tracks: Vec<Track>,
    pub(crate) ready_tracks: usize,
}

impl SharedState {
    fn new(config: &PlayerConfig) -> Self {
        Self {
            state: PlaybackState::Idle,
            clock: MasterClock::new(initial_rate(config.initial_rate)),
            duration: 0.0,
            update_interval: config.update_interval,
            tracks: Vec::new(),
            ready_tracks: 0,
        }
    }

    /// Clock reading clamped to the timeline.
    pub(crate) fn current_time(&self) -> f64 {
        self.clock.now().clamp(0.0, self.duration)
    }

    pub(crate) fn status(&self) -> PlayerStatus {
        PlayerStatus {
            state: self.state,
            current_time: self.current_time(),
            duration: self.duration,
            rate: self.clock.rate(),
            track_count: self.tracks.len(),
            ready_tracks: self.ready_tracks,
        }
    }

    fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }
}

fn initial_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        tracing::warn!(rate, "ignoring invalid initial rate");
        1.0
    }
}

pub(crate) fn lock_shared(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

type Reply<T> = Sender<Result<T>>;

enum Command {
    AddTrack {
        source: PathBuf,
        offset: f64,
        reply: Reply<TrackId>,
    },
    SetVolume {
        track: TrackId,
        gain: f32,
        reply: Reply<()>,
    },
    SetTimingOffset {
        track: TrackId,
        offset: f64,
        reply: Reply<()>,
    },
    Prepare {
        reply: Reply<()>,
    },
    Play {
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<()>,
    },
    Stop {
        reply: Reply<()>,
    },
    Seek {
        time: f64,
        reply: Reply<()>,
    },
    SetRate {
        rate: f64,
        reply: Reply<()>,
    },
    Shutdown,
}

/// Multitrack player handle.
///
/// Dropping the handle stops the engine and releases every binding.
pub struct MultitrackPlayer {
    cmd_tx: Sender<Command>,
    shared: Arc<Mutex<SharedState>>,
    notifier: Notifier,
    join: Option<thread::JoinHandle<()>>,
    _dispatcher: Dispatcher,
}

impl MultitrackPlayer {
    /// Player whose tracks are created by `factory`.
    pub fn new(factory: impl BindingFactory + 'static, config: PlayerConfig) -> Self {
        let shared = Arc::new(Mutex::new(SharedState::new(&config)));
        let dispatcher = Dispatcher::spawn(shared.clone());
        let notifier = dispatcher.notifier();
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();

        let engine_shared = shared.clone();
        let engine_notifier = dispatcher.notifier();
        let factory: Box<dyn BindingFactory> = Box::new(factory);
        let join = thread::spawn(move || {
            Engine::new(engine_shared, factory, engine_notifier).run(cmd_rx);
        });

        Self {
            cmd_tx,
            shared,
            notifier,
            join: Some(join),
            _dispatcher: dispatcher,
        }
    }

    /// Player that plays through the local output device described by `output`.
    pub fn with_output(output: &OutputConfig, config: PlayerConfig) -> anyhow::Result<Self> {
        let factory = DeviceBindingFactory::open(output)?;
        Ok(Self::new(factory, config))
    }

    /// Add a track starting at shared time zero.
    pub fn add_track(&self, source: impl AsRef<Path>) -> Result<TrackId> {
        self.add_track_with_offset(source, 0.0)
    }

    /// Add a track whose first sample sits at `offset` seconds on the shared timeline.
    ///
    /// Returns as soon as the source is resolved; the track opens in the background.
    pub fn add_track_with_offset(&self, source: impl AsRef<Path>, offset: f64) -> Result<TrackId> {
        let source = source.as_ref().to_path_buf();
        self.request(|reply| Command::AddTrack {
            source,
            offset,
            reply,
        })
    }

    pub fn volume(&self, track: TrackId) -> Result<f32> {
        lock_shared(&self.shared)
            .track(track)
            .map(Track::volume)
            .ok_or(PlayerError::UnknownTrack(track))
    }

    /// Set a track's gain. Out-of-range values are clamped to `[0, 1]`, applied, and
    /// reported as [`PlayerError::InvalidArgument`].
    pub fn set_volume(&self, track: TrackId, gain: f32) -> Result<()> {
        self.request(|reply| Command::SetVolume { track, gain, reply })
    }

    pub fn timing_offset(&self, track: TrackId) -> Result<f64> {
        lock_shared(&self.shared)
            .track(track)
            .map(Track::timing_offset)
            .ok_or(PlayerError::UnknownTrack(track))
    }

    /// Move a track on the shared timeline. While playing, the track is re-aligned
    /// against the current clock immediately.
    pub fn set_timing_offset(&self, track: TrackId, offset: f64) -> Result<()> {
        self.request(|reply| Command::SetTimingOffset {
            track,
            offset,
            reply,
        })
    }

    /// Start waiting for every track to open. Completion is reported through
    /// [`PlayerListener::on_prepared`].
    pub fn prepare_for_playback(&self) -> Result<()> {
        self.request(|reply| Command::Prepare { reply })
    }

    pub fn play(&self) -> Result<()> {
        self.request(|reply| Command::Play { reply })
    }

    pub fn pause(&self) -> Result<()> {
        self.request(|reply| Command::Pause { reply })
    }

    pub fn stop(&self) -> Result<()> {
        self.request(|reply| Command::Stop { reply })
    }

    /// Seek the shared timeline. Targets outside `[0, duration]` are clamped, applied,
    /// and reported as [`PlayerError::InvalidArgument`].
    pub fn set_current_time(&self, time: f64) -> Result<()> {
        self.request(|reply| Command::Seek { time, reply })
    }

    pub fn current_time(&self) -> f64 {
        lock_shared(&self.shared).current_time()
    }

    /// Set the shared playback rate. Must be finite and greater than zero.
    pub fn set_rate(&self, rate: f64) -> Result<()> {
        self.request(|reply| Command::SetRate { rate, reply })
    }

    pub fn rate(&self) -> f64 {
        lock_shared(&self.shared).clock.rate()
    }

    pub fn duration(&self) -> f64 {
        lock_shared(&self.shared).duration
    }

    pub fn playback_state(&self) -> PlaybackState {
        lock_shared(&self.shared).state
    }

    pub fn is_playing(&self) -> bool {
        self.playback_state() == PlaybackState::Playing
    }

    /// Consistent snapshot of the transport.
    pub fn status(&self) -> PlayerStatus {
        lock_shared(&self.shared).status()
    }

    pub fn tracks(&self) -> Vec<TrackStatus> {
        lock_shared(&self.shared)
            .tracks
            .iter()
            .map(Track::status)
            .collect()
    }

    pub fn current_time_update_interval(&self) -> Duration {
        lock_shared(&self.shared).update_interval
    }

    /// Change the notification cadence. Applies from the next scheduled tick.
    pub fn set_current_time_update_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(PlayerError::InvalidArgument {
                name: "update interval",
                value: 0.0,
                clamped_to: None,
            });
        }
        lock_shared(&self.shared).update_interval = interval;
        Ok(())
    }

    /// Deliver events to `listener` without keeping it alive.
    pub fn set_listener<L: PlayerListener + 'static>(&self, listener: &Arc<L>) {
        let weak: Weak<L> = Arc::downgrade(listener);
        let weak: Weak<dyn PlayerListener> = weak;
        self.notifier.set_listener(Some(weak));
    }

    pub fn clear_listener(&self) {
        self.notifier.set_listener(None);
    }

    fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.cmd_tx
            .send(build(reply_tx))
            .map_err(|_| PlayerError::EngineShutdown)?;
        reply_rx.recv().map_err(|_| PlayerError::EngineShutdown)?
    }
}

impl Drop for MultitrackPlayer {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Engine-side bookkeeping for one track. Indexes match `SharedState::tracks`.
struct Slot {
    binding: Box<dyn TrackBinding>,
    ready: bool,
    /// Part of the current playback run but held silent until the clock reaches the offset.
    waiting: bool,
}

struct Engine {
    shared: Arc<Mutex<SharedState>>,
    factory: Box<dyn BindingFactory>,
    slots: Vec<Slot>,
    next_id: u64,
    open_tx: Sender<OpenOutcome>,
    open_rx: Receiver<OpenOutcome>,
    notifier: Notifier,
    /// Set once every track has opened; cleared by nothing but a new preparation.
    prepared: bool,
    /// Open failure seen before preparation started; surfaces on `prepare`.
    pending_failure: Option<PlayerError>,
}

impl Engine {
    fn new(
        shared: Arc<Mutex<SharedState>>,
        factory: Box<dyn BindingFactory>,
        notifier: Notifier,
    ) -> Self {
        let (open_tx, open_rx) = crossbeam_channel::unbounded();
        Self {
            shared,
            factory,
            slots: Vec::new(),
            next_id: 1,
            open_tx,
            open_rx,
            notifier,
            prepared: false,
            pending_failure: None,
        }
    }

    fn run(mut self, cmd_rx: Receiver<Command>) {
        let open_rx = self.open_rx.clone();
        loop {
            let timer = match self.next_deadline() {
                Some(wait) => after(wait),
                None => never(),
            };

            select! {
                recv(cmd_rx) -> cmd => match cmd {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(cmd) => self.handle(cmd),
                },
                recv(open_rx) -> outcome => {
                    if let Ok(outcome) = outcome {
                        self.on_open(outcome);
                    }
                },
                recv(timer) -> _ => self.on_timer(),
            }
        }

        self.halt_bindings();
        tracing::debug!(tracks = self.slots.len(), "engine thread exiting");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::AddTrack {
                source,
                offset,
                reply,
            } => {
                let _ = reply.send(self.add_track(source, offset));
            }
            Command::SetVolume { track, gain, reply } => {
                let _ = reply.send(self.set_volume(track, gain));
            }
            Command::SetTimingOffset {
                track,
                offset,
                reply,
            } => {
                let _ = reply.send(self.set_timing_offset(track, offset));
            }
            Command::Prepare { reply } => {
                let _ = reply.send(self.prepare());
            }
            Command::Play { reply } => {
                let _ = reply.send(self.play());
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop());
            }
            Command::Seek { time, reply } => {
                let _ = reply.send(self.seek(time));
            }
            Command::SetRate { rate, reply } => {
                let _ = reply.send(self.set_rate(rate));
            }
            Command::Shutdown => {}
        }
    }

    fn add_track(&mut self, source: PathBuf, offset: f64) -> Result<TrackId> {
        let state = lock_shared(&self.shared).state;
        if state == PlaybackState::Failed {
            return Err(invalid_transition("add a track", state));
        }
        if !offset.is_finite() {
            return Err(PlayerError::InvalidArgument {
                name: "timing offset",
                value: offset,
                clamped_to: None,
            });
        }

        let id = TrackId::new(self.next_id);
        let mut binding = self.factory.create(id, &source)?;
        self.next_id += 1;

        tracing::info!(track = %id, path = ?source, offset, "track added");
        lock_shared(&self.shared)
            .tracks
            .push(Track::new(id, source, offset));
        binding.open(OpenReporter::new(id, self.open_tx.clone()));
        self.slots.push(Slot {
            binding,
            ready: false,
            waiting: false,
        });
        Ok(id)
    }

    fn set_volume(&mut self, track: TrackId, gain: f32) -> Result<()> {
        if !gain.is_finite() {
            return Err(PlayerError::InvalidArgument {
                name: "volume",
                value: f64::from(gain),
                clamped_to: None,
            });
        }
        let mut shared = lock_shared(&self.shared);
        let index = track_index(&shared, track)?;

        let applied = gain.clamp(0.0, 1.0);
        shared.tracks[index].set_volume(applied);
        let slot = &mut self.slots[index];
        if slot.ready {
            slot.binding.set_volume(applied);
        }

        if applied != gain {
            tracing::warn!(track = %track, gain, applied, "volume clamped");
            return Err(PlayerError::InvalidArgument {
                name: "volume",
                value: f64::from(gain),
                clamped_to: Some(f64::from(applied)),
            });
        }
        Ok(())
    }

    fn set_timing_offset(&mut self, track: TrackId, offset: f64) -> Result<()> {
        if !offset.is_finite() {
            return Err(PlayerError::InvalidArgument {
                name: "timing offset",
                value: offset,
                clamped_to: None,
            });
        }
        let mut shared = lock_shared(&self.shared);
        let index = track_index(&shared, track)?;

        shared.tracks[index].set_timing_offset(offset);
        shared.duration = timeline_duration(&shared.tracks);
        if shared.state == PlaybackState::Playing && self.slots[index].ready {
            let at = shared.current_time();
            sync_slot(&mut self.slots[index], &shared.tracks[index], at);
        }
        tracing::info!(track = %track, offset, duration = shared.duration, "timing offset changed");
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        let handle = Arc::clone(&self.shared);
        let mut shared = lock_shared(&handle);
        match shared.state {
            PlaybackState::Idle | PlaybackState::Stopped => {}
            PlaybackState::Failed => return Err(invalid_transition("prepare", shared.state)),
            _ => return Ok(()),
        }

        shared.state = PlaybackState::Preparing;
        tracing::info!(tracks = shared.tracks.len(), "preparing for playback");
        if let Some(err) = self.pending_failure.take() {
            drop(shared);
            self.fail(err);
            return Ok(());
        }
        self.finish_preparing_if_ready(&mut shared);
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        let mut shared = lock_shared(&self.shared);
        match shared.state {
            PlaybackState::Playing => return Ok(()),
            PlaybackState::Ready | PlaybackState::Paused => {}
            PlaybackState::Stopped if self.prepared => {}
            PlaybackState::Failed => return Err(invalid_transition("play", shared.state)),
            state => return Err(PlayerError::NotPrepared { state }),
        }

        let at = shared.clock.now().clamp(0.0, shared.duration);
        let rate = shared.clock.rate();
        for (slot, track) in self.slots.iter_mut().zip(&shared.tracks) {
            if slot.ready {
                slot.binding.set_rate(rate);
                sync_slot(slot, track, at);
            }
        }
        shared.clock.start(at);
        shared.state = PlaybackState::Playing;
        tracing::info!(at, rate, "playback started");
        self.notifier.emit(Event::Started, shared.status());
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        let handle = Arc::clone(&self.shared);
        let mut shared = lock_shared(&handle);
        match shared.state {
            PlaybackState::Paused => return Ok(()),
            PlaybackState::Playing => {}
            state => return Err(invalid_transition("pause", state)),
        }

        let at = shared.clock.stop().clamp(0.0, shared.duration);
        shared.clock.set_position(at);
        self.halt_slots();
        shared.state = PlaybackState::Paused;
        tracing::info!(at, "playback paused");
        self.notifier.emit(Event::Paused, shared.status());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let handle = Arc::clone(&self.shared);
        let mut shared = lock_shared(&handle);
        match shared.state {
            PlaybackState::Stopped => Ok(()),
            PlaybackState::Failed => Err(invalid_transition("stop", shared.state)),
            _ => {
                self.stop_locked(&mut shared);
                Ok(())
            }
        }
    }

    fn stop_locked(&mut self, shared: &mut SharedState) {
        shared.clock.stop();
        shared.clock.set_position(0.0);
        self.halt_slots();
        shared.state = PlaybackState::Stopped;
        tracing::info!("playback stopped");
        self.notifier.emit(Event::Stopped, shared.status());
    }

    fn seek(&mut self, time: f64) -> Result<()> {
        if time.is_nan() {
            return Err(PlayerError::InvalidArgument {
                name: "current time",
                value: time,
                clamped_to: None,
            });
        }
        let mut shared = lock_shared(&self.shared);
        if shared.state == PlaybackState::Failed {
            return Err(invalid_transition("seek", shared.state));
        }

        let target = time.clamp(0.0, shared.duration);
        if shared.state == PlaybackState::Playing {
            for (slot, track) in self.slots.iter_mut().zip(&shared.tracks) {
                if slot.ready {
                    sync_slot(slot, track, target);
                }
            }
            shared.clock.start(target);
        } else {
            shared.clock.set_position(target);
        }
        tracing::debug!(requested = time, target, state = %shared.state, "seek");

        if target != time {
            return Err(PlayerError::InvalidArgument {
                name: "current time",
                value: time,
                clamped_to: Some(target),
            });
        }
        Ok(())
    }

    fn set_rate(&mut self, rate: f64) -> Result<()> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(PlayerError::InvalidArgument {
                name: "rate",
                value: rate,
                clamped_to: None,
            });
        }
        let mut shared = lock_shared(&self.shared);
        shared.clock.set_rate(rate);
        for slot in self.slots.iter_mut().filter(|s| s.ready) {
            slot.binding.set_rate(rate);
        }
        tracing::info!(rate, state = %shared.state, "rate changed");
        Ok(())
    }

    fn on_open(&mut self, outcome: OpenOutcome) {
        let handle = Arc::clone(&self.shared);
        let mut shared = lock_shared(&handle);
        let Ok(index) = track_index(&shared, outcome.track) else {
            return;
        };

        let duration = match outcome.result {
            Ok(duration) => duration,
            Err(reason) => {
                tracing::error!(track = %outcome.track, %reason, "track failed to open");
                let err = PlayerError::Decode {
                    track: outcome.track,
                    reason,
                };
                let defer = shared.state == PlaybackState::Idle
                    || (shared.state == PlaybackState::Stopped && !self.prepared);
                if defer {
                    if self.pending_failure.is_none() {
                        self.pending_failure = Some(err);
                    }
                } else if shared.state != PlaybackState::Failed {
                    drop(shared);
                    self.fail(err);
                }
                return;
            }
        };

        shared.tracks[index].set_duration(duration);
        shared.duration = timeline_duration(&shared.tracks);
        shared.ready_tracks += 1;

        let volume = shared.tracks[index].volume();
        let rate = shared.clock.rate();
        let slot = &mut self.slots[index];
        slot.ready = true;
        slot.binding.set_volume(volume);
        slot.binding.set_rate(rate);
        tracing::debug!(
            track = %outcome.track,
            duration,
            timeline = shared.duration,
            "track ready"
        );

        match shared.state {
            PlaybackState::Preparing => self.finish_preparing_if_ready(&mut shared),
            PlaybackState::Playing => {
                let at = shared.current_time();
                sync_slot(&mut self.slots[index], &shared.tracks[index], at);
            }
            _ => {}
        }
    }

    /// Start offset tracks whose time has come and finish playback at the end of the timeline.
    fn on_timer(&mut self) {
        let handle = Arc::clone(&self.shared);
        let mut shared = lock_shared(&handle);
        if shared.state != PlaybackState::Playing {
            return;
        }
        let now = shared.clock.now();

        for (slot, track) in self.slots.iter_mut().zip(&shared.tracks) {
            if slot.waiting && track.timing_offset() <= now + START_EPSILON_SECS {
                slot.binding.seek(track.local_position(now));
                slot.binding.start();
                slot.waiting = false;
                tracing::debug!(track = %track.id(), at = now, "offset reached; track started");
            }
        }

        if now >= shared.duration {
            tracing::info!(duration = shared.duration, "end of timeline");
            self.stop_locked(&mut shared);
        }
    }

    /// Wall time until the next offset start or the end of the timeline.
    fn next_deadline(&self) -> Option<Duration> {
        let shared = lock_shared(&self.shared);
        if shared.state != PlaybackState::Playing {
            return None;
        }
        let now = Instant::now();
        let end = shared.clock.time_until(shared.duration, now);
        self.slots
            .iter()
            .zip(&shared.tracks)
            .filter(|(slot, _)| slot.waiting)
            .filter_map(|(_, track)| shared.clock.time_until(track.timing_offset(), now))
            .chain(end)
            .min()
            .map(|wait| wait.min(MAX_TIMER_WAIT))
    }

    fn finish_preparing_if_ready(&mut self, shared: &mut SharedState) {
        if self.slots.iter().all(|s| s.ready) {
            shared.state = PlaybackState::Ready;
            self.prepared = true;
            tracing::info!(duration = shared.duration, "prepared for playback");
            self.notifier.emit(Event::Prepared(Ok(())), shared.status());
        }
    }

    /// Move to the terminal Failed state, naming the failing track.
    fn fail(&mut self, err: PlayerError) {
        let handle = Arc::clone(&self.shared);
        let mut shared = lock_shared(&handle);
        shared.clock.stop();
        self.halt_slots();
        shared.state = PlaybackState::Failed;
        tracing::error!(track = ?err.track(), "player failed: {err}");
        self.notifier.emit(Event::Prepared(Err(err)), shared.status());
    }

    fn halt_slots(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.waiting = false;
            if slot.ready {
                slot.binding.pause();
            }
        }
    }

    fn halt_bindings(&mut self) {
        self.halt_slots();
        lock_shared(&self.shared).clock.stop();
    }
}

/// Align one ready binding with shared time `at`: silence it, move it to its local
/// position, then either run it or hold it until the clock reaches its offset.
fn sync_slot(slot: &mut Slot, track: &Track, at: f64) {
    slot.binding.pause();
    slot.binding.seek(track.local_position(at));
    if track.starts_after(at) {
        slot.waiting = true;
    } else {
        slot.waiting = false;
        slot.binding.start();
    }
}

fn track_index(shared: &SharedState, track: TrackId) -> Result<usize> {
    shared
        .tracks
        .iter()
        .position(|t| t.id() == track)
        .ok_or(PlayerError::UnknownTrack(track))
}

fn invalid_transition(operation: &'static str, state: PlaybackState) -> PlayerError {
    PlayerError::InvalidStateTransition { operation, state }
}
