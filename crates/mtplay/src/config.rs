use std::time::Duration;

use multitrack_player::{OutputConfig, PlayerConfig};

use crate::cli::Args;

pub fn output_config(args: &Args) -> OutputConfig {
    OutputConfig {
        device: args.device.clone(),
        chunk_frames: args.chunk_frames.max(1),
        buffer_frames: args.buffer_frames.max(1),
    }
}

pub fn player_config(args: &Args) -> PlayerConfig {
    PlayerConfig {
        update_interval: Duration::from_millis(args.update_interval_ms.max(1)),
        ..PlayerConfig::default()
    }
}
