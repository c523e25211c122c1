use std::time::Duration;

/// Engine-level settings.
#[derive(Clone, Debug)]
pub struct PlayerConfig {
    /// Cadence of `on_time_changed` notifications while playing.
    pub update_interval: Duration,
    /// Shared playback rate applied before the first `set_rate` call.
    pub initial_rate: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_millis(100),
            initial_rate: 1.0,
        }
    }
}

/// Output device settings for [`crate::device_binding::DeviceBindingFactory`].
#[derive(Clone, Debug)]
pub struct OutputConfig {
    /// Substring of the output device name; `None` selects the host default.
    pub device: Option<String>,
    /// Resampler input chunk size in frames used while opening tracks.
    pub chunk_frames: usize,
    /// Preferred device callback size in frames. Smaller keeps tracks closer to the clock.
    pub buffer_frames: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: None,
            chunk_frames: 1024,
            buffer_frames: 1024,
        }
    }
}
