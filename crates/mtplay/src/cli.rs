use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

/// A file placed on the shared timeline.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackSpec {
    pub path: PathBuf,
    pub offset: f64,
}

/// Accepts `path` or `path@offset` (offset in seconds, may be negative).
fn parse_track(raw: &str) -> Result<TrackSpec, String> {
    if let Some((path, offset)) = raw.rsplit_once('@') {
        if let Ok(offset) = offset.parse::<f64>() {
            if !offset.is_finite() {
                return Err(format!("offset must be finite: {offset}"));
            }
            if path.is_empty() {
                return Err("missing path before '@'".to_string());
            }
            return Ok(TrackSpec {
                path: PathBuf::from(path),
                offset,
            });
        }
    }
    Ok(TrackSpec {
        path: PathBuf::from(raw),
        offset: 0.0,
    })
}

#[derive(Parser, Debug)]
#[command(name = "mtplay", version = VERSION)]
pub struct Args {
    /// Audio files to play together, each as PATH or PATH@OFFSET_SECONDS
    #[arg(value_parser = parse_track, required_unless_present = "list_devices")]
    pub tracks: Vec<TrackSpec>,

    /// Per-track gain in [0, 1], applied to tracks in the order given
    #[arg(long = "volume")]
    pub volumes: Vec<f32>,

    /// Shared playback rate
    #[arg(long, default_value_t = 1.0)]
    pub rate: f64,

    /// Start position on the shared timeline, in seconds
    #[arg(long, default_value_t = 0.0)]
    pub seek: f64,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Interval between position reports while playing
    #[arg(long, default_value_t = 500)]
    pub update_interval_ms: u64,

    /// Print status reports as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long, default_value_t = 1024)]
    pub chunk_frames: usize,

    /// Preferred device buffer size in frames
    #[arg(long, default_value_t = 1024)]
    pub buffer_frames: u32,
}
