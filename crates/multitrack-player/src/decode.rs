//! Whole-track decode stage.
//!
//! Uses Symphonia to probe a local file and decode its default track into one
//! interleaved `f32` buffer. Tracks are held in memory so every seek is
//! sample-accurate and costs nothing beyond moving a read head.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// A fully decoded source at its native sample rate.
#[derive(Debug)]
pub(crate) struct DecodedTrack {
    pub(crate) sample_rate: u32,
    pub(crate) channels: usize,
    /// Interleaved samples.
    pub(crate) samples: Vec<f32>,
    pub(crate) codec: Option<&'static str>,
}

impl DecodedTrack {
    pub(crate) fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1)
    }

    /// Length in seconds.
    pub(crate) fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Decode the default audio track of `path`.
pub(crate) fn decode_file(path: &Path) -> Result<DecodedTrack> {
    let file = File::open(path).with_context(|| format!("open {:?}", path))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {:?}", path))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("No default audio track"))?;
    let track_id = track.id;
    let codec_params: CodecParameters = track.codec_params.clone();

    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;
    let channels = codec_params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();

    let mut decoder =
        symphonia::default::get_codecs().make(&codec_params, &DecoderOptions::default())?;

    let capacity = codec_params
        .n_frames
        .map(|n| (n as usize).saturating_mul(channels))
        .unwrap_or(0);
    let mut samples = Vec::with_capacity(capacity);
    let mut skipped_packets = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => {
                tracing::debug!(path = ?path, "packet read stopped: {e}");
                break;
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                skipped_packets += 1;
                tracing::debug!(path = ?path, "skipping corrupt packet: {e}");
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("decode {:?}", path)),
        };

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() {
        bail!("no audio decoded from {:?}", path);
    }
    if skipped_packets > 0 {
        tracing::warn!(path = ?path, skipped_packets, "decoded with corrupt packets skipped");
    }

    Ok(DecodedTrack {
        sample_rate,
        channels,
        samples,
        codec: codec_name_from_params(&codec_params),
    })
}

/// Best-effort codec label for logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;

    #[test]
    fn duration_follows_frames_and_rate() {
        let track = DecodedTrack {
            sample_rate: 48_000,
            channels: 2,
            samples: vec![0.0; 96_000 * 2],
            codec: None,
        };
        assert_eq!(track.frames(), 96_000);
        assert_eq!(track.duration_secs(), 2.0);
    }

    #[test]
    fn duration_is_zero_for_zero_rate() {
        let track = DecodedTrack {
            sample_rate: 0,
            channels: 1,
            samples: vec![0.0; 10],
            codec: None,
        };
        assert_eq!(track.duration_secs(), 0.0);
    }

    #[test]
    fn codec_names_cover_common_formats() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_MP3;
        assert_eq!(codec_name_from_params(&params), Some("MP3"));
        params.codec = CODEC_TYPE_PCM_S24LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S24"));
        assert!(codec_name_from_params(&CodecParameters::new()).is_none());
    }

    #[test]
    fn missing_file_fails_with_context() {
        let err = decode_file(Path::new("/nonexistent/missing.flac")).unwrap_err();
        assert!(format!("{err:#}").contains("missing.flac"));
    }

    #[test]
    fn garbage_file_fails_to_probe() {
        let path = std::env::temp_dir().join(format!("mt-garbage-{}.bin", std::process::id()));
        std::fs::write(&path, b"definitely not audio").unwrap();
        let result = decode_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(result.is_err());
    }
}
