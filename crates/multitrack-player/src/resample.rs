//! Whole-buffer resample stage.
//!
//! Converts a decoded track to the output device rate with Rubato's sinc resampler
//! so every voice on the mix bus shares one frame clock.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

/// Resample interleaved `samples` from `src_rate` to `dst_rate`.
///
/// Returns the input unchanged when the rates already match. The output is trimmed
/// to `ceil(frames * dst_rate / src_rate)` frames so track durations survive the
/// conversion.
pub(crate) fn resample_interleaved(
    samples: Vec<f32>,
    channels: usize,
    src_rate: u32,
    dst_rate: u32,
    chunk_frames: usize,
) -> Result<Vec<f32>> {
    if src_rate == dst_rate || samples.is_empty() {
        return Ok(samples);
    }
    if src_rate == 0 || dst_rate == 0 || channels == 0 {
        return Err(anyhow!(
            "cannot resample {channels} channel(s) from {src_rate} Hz to {dst_rate} Hz"
        ));
    }

    let f_ratio = dst_rate as f64 / src_rate as f64;
    let total_frames = samples.len() / channels;
    let expected_frames = (total_frames as f64 * f_ratio).ceil() as usize;

    let sinc_len = 128;
    let window = WindowFunction::BlackmanHarris2;
    let params = SincInterpolationParameters {
        sinc_len,
        f_cutoff: calculate_cutoff(sinc_len, window),
        interpolation: SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window,
    };

    let chunk_in_frames = chunk_frames.max(1);
    let mut resampler = Async::<f32>::new_sinc(
        f_ratio,
        1.1,
        &params,
        chunk_in_frames,
        channels,
        FixedAsync::Input,
    )
    .map_err(|e| anyhow!("resampler init: {e}"))?;

    let out_capacity_frames = (chunk_in_frames as f64 * f_ratio * 1.2).ceil() as usize + 64;
    let mut scratch = vec![0.0f32; out_capacity_frames * channels];
    let mut out = Vec::with_capacity((expected_frames + out_capacity_frames) * channels);

    let mut indexing = Indexing {
        input_offset: 0,
        output_offset: 0,
        active_channels_mask: None,
        partial_len: None,
    };

    // The sinc filter delays its output; run silence through until the delayed tail is out.
    let delay_frames = resampler.output_delay();
    let silence = vec![0.0f32; chunk_in_frames * channels];
    let max_flush_chunks =
        (delay_frames as f64 / (chunk_in_frames as f64 * f_ratio)).ceil() as usize + 2;
    let mut flush_chunks = 0usize;
    let mut start = 0usize;
    loop {
        let frames = total_frames.saturating_sub(start).min(chunk_in_frames);
        if frames == 0 {
            let done = out.len() / channels >= expected_frames + delay_frames;
            if done || flush_chunks >= max_flush_chunks {
                break;
            }
            flush_chunks += 1;
        }
        // The last chunk is short; pad it so the resampler still sees a full input block.
        let chunk: Vec<f32> = if frames == chunk_in_frames {
            samples[start * channels..(start + frames) * channels].to_vec()
        } else if frames == 0 {
            silence.clone()
        } else {
            let mut padded = silence.clone();
            padded[..frames * channels]
                .copy_from_slice(&samples[start * channels..(start + frames) * channels]);
            padded
        };

        let input_adapter = InterleavedSlice::new(&chunk, channels, chunk_in_frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut scratch, channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        indexing.input_offset = 0;
        indexing.output_offset = 0;
        indexing.partial_len = if frames == chunk_in_frames || frames == 0 {
            None
        } else {
            Some(frames)
        };

        let (_nbr_in, nbr_out) = resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process: {e}"))?;
        out.extend_from_slice(&scratch[..nbr_out * channels]);
        start += frames;
    }

    let skip = (delay_frames * channels).min(out.len());
    out.drain(..skip);
    out.resize(expected_frames * channels, 0.0);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_rates_pass_through() {
        let input = vec![0.1, 0.2, 0.3, 0.4];
        let out = resample_interleaved(input.clone(), 2, 48_000, 48_000, 1024).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(resample_interleaved(vec![0.0; 4], 1, 0, 48_000, 1024).is_err());
    }

    #[test]
    fn output_length_tracks_rate_ratio() {
        let input = vec![0.0f32; 44_100 * 2];
        let out = resample_interleaved(input, 2, 44_100, 48_000, 1024).unwrap();
        assert_eq!(out.len(), 48_000 * 2);
    }

    #[test]
    fn downsampling_keeps_duration() {
        let input = vec![0.25f32; 96_000];
        let out = resample_interleaved(input, 1, 96_000, 48_000, 512).unwrap();
        assert_eq!(out.len(), 48_000);
    }
}
