//! Track bindings backed by the local output device.
//!
//! All device bindings of one factory share a single [`MixBus`] rendered by one
//! output stream, so every track is clocked by the same device callback. Opening a
//! track decodes and resamples it on a background thread, then installs the PCM in
//! the track's voice.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::Result;

use crate::binding::{BindingFactory, OpenReporter, TrackBinding};
use crate::config::OutputConfig;
use crate::error::PlayerError;
use crate::mixer::{MixBus, PcmBuffer, Voice};
use crate::output::{self, OutputFormat, OutputHandle};
use crate::track::TrackId;
use crate::{decode, resample};

/// Creates [`TrackBinding`]s that play through one output device.
pub struct DeviceBindingFactory {
    bus: Arc<MixBus>,
    chunk_frames: usize,
    output: OutputHandle,
}

impl DeviceBindingFactory {
    /// Open the configured device and start its (initially silent) output stream.
    pub fn open(cfg: &OutputConfig) -> Result<Self> {
        let bus = Arc::new(MixBus::default());
        let output = output::spawn_output(cfg, bus.clone())?;
        Ok(Self {
            bus,
            chunk_frames: cfg.chunk_frames,
            output,
        })
    }

    pub fn format(&self) -> &OutputFormat {
        self.output.format()
    }
}

impl BindingFactory for DeviceBindingFactory {
    fn create(
        &mut self,
        track: TrackId,
        source: &Path,
    ) -> crate::error::Result<Box<dyn TrackBinding>> {
        let meta = std::fs::metadata(source).map_err(|e| PlayerError::SourceUnavailable {
            path: source.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !meta.is_file() {
            return Err(PlayerError::SourceUnavailable {
                path: source.to_path_buf(),
                reason: "not a regular file".to_string(),
            });
        }

        let voice = Arc::new(Voice::default());
        self.bus.add(voice.clone());
        Ok(Box::new(DeviceBinding {
            track,
            source: source.to_path_buf(),
            output_rate: self.output.format().sample_rate,
            chunk_frames: self.chunk_frames,
            voice,
            bus: self.bus.clone(),
        }))
    }
}

struct DeviceBinding {
    track: TrackId,
    source: PathBuf,
    output_rate: u32,
    chunk_frames: usize,
    voice: Arc<Voice>,
    bus: Arc<MixBus>,
}

impl TrackBinding for DeviceBinding {
    fn open(&mut self, reporter: OpenReporter) {
        let source = self.source.clone();
        let voice = self.voice.clone();
        let output_rate = self.output_rate;
        let chunk_frames = self.chunk_frames;
        let track = self.track;

        thread::spawn(move || match load_pcm(&source, output_rate, chunk_frames) {
            Ok((pcm, duration)) => {
                voice.lock().pcm = Some(Arc::new(pcm));
                tracing::info!(track = %track, path = ?source, duration_secs = duration, "track opened");
                reporter.ready(duration);
            }
            Err(e) => {
                tracing::error!(track = %track, path = ?source, "track open failed: {e:#}");
                reporter.failed(format!("{e:#}"));
            }
        });
    }

    fn seek(&mut self, local: f64) {
        self.voice.lock().position = local.max(0.0) * self.output_rate as f64;
    }

    fn set_rate(&mut self, rate: f64) {
        self.voice.lock().rate = rate;
    }

    fn set_volume(&mut self, gain: f32) {
        self.voice.lock().gain = gain.clamp(0.0, 1.0);
    }

    fn start(&mut self) {
        self.voice.lock().running = true;
    }

    fn pause(&mut self) {
        self.voice.lock().running = false;
    }
}

impl Drop for DeviceBinding {
    fn drop(&mut self) {
        self.bus.remove(&self.voice);
    }
}

/// Decode `source` and convert it to the output rate. Returns the PCM and its
/// duration in seconds (measured at the source rate).
fn load_pcm(source: &Path, output_rate: u32, chunk_frames: usize) -> Result<(PcmBuffer, f64)> {
    let decoded = decode::decode_file(source)?;
    let duration = decoded.duration_secs();
    tracing::debug!(
        path = ?source,
        codec = decoded.codec.unwrap_or("unknown"),
        source_rate_hz = decoded.sample_rate,
        output_rate_hz = output_rate,
        channels = decoded.channels,
        "decoded track"
    );
    let channels = decoded.channels;
    let samples = resample::resample_interleaved(
        decoded.samples,
        channels,
        decoded.sample_rate,
        output_rate,
        chunk_frames,
    )?;
    Ok((PcmBuffer::new(channels, samples), duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, rate: u32, samples: &[i16]) {
        let data_len = (samples.len() * 2) as u32;
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&rate.to_le_bytes());
        bytes.extend_from_slice(&(rate * 2).to_le_bytes());
        bytes.extend_from_slice(&2u16.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn load_pcm_reports_source_duration() {
        let path = std::env::temp_dir().join(format!("mt-load-{}.wav", std::process::id()));
        write_wav(&path, 8_000, &vec![1000i16; 4_000]);

        let result = load_pcm(&path, 8_000, 256);
        let _ = std::fs::remove_file(&path);

        let (pcm, duration) = result.unwrap();
        assert_eq!(duration, 0.5);
        assert_eq!(pcm.frames(), 4_000);
    }

    #[test]
    fn binding_commands_drive_voice_state() {
        let bus = Arc::new(MixBus::default());
        let voice = Arc::new(Voice::default());
        bus.add(voice.clone());
        let mut binding = DeviceBinding {
            track: TrackId::new(1),
            source: PathBuf::from("unused.wav"),
            output_rate: 48_000,
            chunk_frames: 1024,
            voice: voice.clone(),
            bus: bus.clone(),
        };

        binding.seek(2.0);
        binding.set_rate(1.5);
        binding.set_volume(3.0);
        binding.start();
        {
            let st = voice.lock();
            assert_eq!(st.position, 96_000.0);
            assert_eq!(st.rate, 1.5);
            assert_eq!(st.gain, 1.0);
            assert!(st.running);
        }
        binding.pause();
        assert!(!voice.lock().running);

        drop(binding);
        assert_eq!(bus.len(), 0);
    }
}
