//! `mtplay` plays several audio files in sync on the local output device.
//!
//! Each file can be placed on the shared timeline with `PATH@OFFSET`. Once every
//! track has opened, playback starts at `--seek` and runs until the end of the
//! timeline. Transport commands are read from stdin (`help` lists them).

mod cli;
mod commands;
mod config;

use std::io::BufRead;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use crossbeam_channel::{Receiver, Sender, select};
use multitrack_player::device_binding::DeviceBindingFactory;
use multitrack_player::{
    MultitrackPlayer, PlaybackState, PlayerError, PlayerListener, PlayerStatus, TrackId,
};
use tracing_subscriber::EnvFilter;

use crate::commands::Control;

enum UiEvent {
    Prepared(std::result::Result<(), String>),
    Started,
    Paused,
    Stopped(PlayerStatus),
    Time(PlayerStatus),
}

/// Forwards player callbacks to the main loop.
struct ChannelListener {
    tx: Sender<UiEvent>,
}

impl PlayerListener for ChannelListener {
    fn on_prepared(&self, _status: &PlayerStatus, result: std::result::Result<(), &PlayerError>) {
        let _ = self
            .tx
            .send(UiEvent::Prepared(result.map_err(|e| e.to_string())));
    }

    fn on_started(&self, _status: &PlayerStatus) {
        let _ = self.tx.send(UiEvent::Started);
    }

    fn on_paused(&self, _status: &PlayerStatus) {
        let _ = self.tx.send(UiEvent::Paused);
    }

    fn on_stopped(&self, status: &PlayerStatus) {
        let _ = self.tx.send(UiEvent::Stopped(status.clone()));
    }

    fn on_time_changed(&self, status: &PlayerStatus, _current_time: f64) {
        let _ = self.tx.send(UiEvent::Time(status.clone()));
    }
}

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,mtplay=info")),
        )
        .init();

    if args.list_devices {
        let host = cpal::default_host();
        for name in multitrack_player::device::list_devices(&host)? {
            println!("{name}");
        }
        return Ok(());
    }

    let factory = DeviceBindingFactory::open(&config::output_config(&args))?;
    let format = factory.format();
    tracing::info!(
        device = %format.device,
        sample_rate = format.sample_rate,
        channels = format.channels,
        sample_format = %format.sample_format,
        "output device"
    );
    let player = MultitrackPlayer::new(factory, config::player_config(&args));

    let (event_tx, event_rx) = crossbeam_channel::unbounded();
    let listener = Arc::new(ChannelListener { tx: event_tx });
    player.set_listener(&listener);

    let mut ids = Vec::with_capacity(args.tracks.len());
    for spec in &args.tracks {
        let id = player
            .add_track_with_offset(&spec.path, spec.offset)
            .with_context(|| format!("add track {:?}", spec.path))?;
        ids.push(id);
    }
    if args.volumes.len() > ids.len() {
        tracing::warn!(
            volumes = args.volumes.len(),
            tracks = ids.len(),
            "extra --volume values ignored"
        );
    }
    for (id, gain) in ids.iter().zip(&args.volumes) {
        report(player.set_volume(*id, *gain));
    }
    player.set_rate(args.rate).context("set rate")?;
    player.prepare_for_playback()?;

    let (quit_tx, quit_rx) = crossbeam_channel::bounded(1);
    let _ = ctrlc::set_handler(move || {
        let _ = quit_tx.try_send(());
    });
    let control_rx = spawn_stdin_reader();

    run(&player, &ids, &args, event_rx, control_rx, quit_rx)
}

fn run(
    player: &MultitrackPlayer,
    ids: &[TrackId],
    args: &cli::Args,
    events: Receiver<UiEvent>,
    controls: Receiver<Result<Control>>,
    quit: Receiver<()>,
) -> Result<()> {
    // Set when the user asked for the stop, so the stop event does not end the session.
    let mut stop_requested = false;
    let mut stdin_open = true;
    let stdin_closed = crossbeam_channel::never();

    loop {
        let input = if stdin_open { &controls } else { &stdin_closed };
        select! {
            recv(events) -> ev => match ev {
                Ok(UiEvent::Prepared(Ok(()))) => {
                    tracing::info!(duration = player.duration(), tracks = ids.len(), "all tracks ready");
                    if args.seek != 0.0 {
                        report(player.set_current_time(args.seek));
                    }
                    player.play()?;
                }
                Ok(UiEvent::Prepared(Err(reason))) => {
                    return Err(anyhow!("preparation failed: {reason}"));
                }
                Ok(UiEvent::Started) => tracing::info!("playing"),
                Ok(UiEvent::Paused) => tracing::info!(at = player.current_time(), "paused"),
                Ok(UiEvent::Stopped(status)) => {
                    if !stop_requested {
                        print_status(&status, args.json);
                        tracing::info!("end of timeline");
                        return Ok(());
                    }
                    stop_requested = false;
                    tracing::info!("stopped");
                }
                Ok(UiEvent::Time(status)) => print_status(&status, args.json),
                Err(_) => return Ok(()),
            },
            recv(input) -> ctl => match ctl {
                Ok(Ok(Control::Quit)) => return Ok(()),
                Ok(Ok(control)) => {
                    if matches!(control, Control::Stop)
                        && player.playback_state() != PlaybackState::Stopped
                    {
                        stop_requested = true;
                    }
                    apply(player, ids, control, args.json);
                }
                Ok(Err(e)) => eprintln!("{e:#}"),
                // stdin closed; keep playing until the timeline ends.
                Err(_) => stdin_open = false,
            },
            recv(quit) -> _ => {
                tracing::info!("interrupted");
                return Ok(());
            },
        }
    }
}

fn apply(player: &MultitrackPlayer, ids: &[TrackId], control: Control, json: bool) {
    let result = match control {
        Control::Play => player.play(),
        Control::Pause => player.pause(),
        Control::Toggle if player.is_playing() => player.pause(),
        Control::Toggle => player.play(),
        Control::Stop => player.stop(),
        Control::Seek(secs) => player.set_current_time(secs),
        Control::Rate(rate) => player.set_rate(rate),
        Control::Volume { track, gain } => match lookup(ids, track) {
            Some(id) => player.set_volume(id, gain),
            None => {
                eprintln!("no track #{track}");
                return;
            }
        },
        Control::Offset { track, offset } => match lookup(ids, track) {
            Some(id) => player.set_timing_offset(id, offset),
            None => {
                eprintln!("no track #{track}");
                return;
            }
        },
        Control::Status => {
            print_status(&player.status(), json);
            Ok(())
        }
        Control::Tracks => {
            for track in player.tracks() {
                if json {
                    match serde_json::to_string(&track) {
                        Ok(line) => println!("{line}"),
                        Err(e) => tracing::warn!("encode track status: {e}"),
                    }
                } else {
                    let duration = track
                        .duration
                        .map(format_time)
                        .unwrap_or_else(|| "--:--".to_string());
                    println!(
                        "#{} {} @{:+.3}s vol {:.2} len {}",
                        track.id, track.source, track.timing_offset, track.volume, duration
                    );
                }
            }
            Ok(())
        }
        Control::Help => {
            println!("{}", commands::HELP);
            Ok(())
        }
        Control::Quit => Ok(()),
    };
    report(result);
}

fn lookup(ids: &[TrackId], raw: u64) -> Option<TrackId> {
    ids.iter().copied().find(|id| id.get() == raw)
}

fn report(result: multitrack_player::Result<()>) {
    match result {
        Ok(()) => {}
        Err(e) if e.clamped_to().is_some() => tracing::warn!("{e}"),
        Err(e) => eprintln!("error: {e}"),
    }
}

fn print_status(status: &PlayerStatus, json: bool) {
    if json {
        match serde_json::to_string(status) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!("encode status: {e}"),
        }
        return;
    }
    println!(
        "{:<9} {} / {}  x{:.2}  [{}/{} ready]",
        status.state.as_str(),
        format_time(status.current_time),
        format_time(status.duration),
        status.rate,
        status.ready_tracks,
        status.track_count,
    );
}

fn format_time(secs: f64) -> String {
    let total_ms = (secs.max(0.0) * 1000.0).round() as u64;
    let minutes = total_ms / 60_000;
    let seconds = (total_ms % 60_000) as f64 / 1000.0;
    format!("{minutes:02}:{seconds:06.3}")
}

fn spawn_stdin_reader() -> Receiver<Result<Control>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            match commands::parse(&line) {
                Ok(None) => {}
                Ok(Some(control)) => {
                    if tx.send(Ok(control)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    if tx.send(Err(e)).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_time_as_minutes_and_seconds() {
        assert_eq!(format_time(0.0), "00:00.000");
        assert_eq!(format_time(75.5), "01:15.500");
        assert_eq!(format_time(-3.0), "00:00.000");
    }
}
