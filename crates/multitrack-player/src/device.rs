//! Output device discovery and stream configuration.

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, HostTrait};

/// Display names of every output device on `host`, in host order.
pub fn list_devices(host: &cpal::Host) -> Result<Vec<String>> {
    let devices = host.output_devices().context("No output devices")?;
    Ok(devices.map(|d| device_name(&d)).collect())
}

/// First output device whose name contains `needle` (case-insensitive), or the host
/// default when `needle` is `None`.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device> {
    let Some(needle) = needle else {
        return host
            .default_output_device()
            .ok_or_else(|| anyhow!("No default output device"));
    };
    host.output_devices()
        .context("No output devices")?
        .find(|d| matches_device_name(&device_name(d), needle))
        .ok_or_else(|| anyhow!("No output device matched: {needle}"))
}

pub(crate) fn device_name(device: &cpal::Device) -> String {
    device
        .description()
        .map(|d| d.to_string())
        .unwrap_or_else(|_| "unknown device".to_string())
}

/// Stream config for the mix bus.
///
/// The device default is kept when its sample format is one the mixer can write;
/// otherwise the best supported range is chosen, preferring float output and rates
/// closest to `preferred_rate`.
pub(crate) fn pick_output_config(
    device: &cpal::Device,
    preferred_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    if let Ok(default) = device.default_output_config() {
        if format_rank(default.sample_format()).is_some() {
            return Ok(default);
        }
    }

    device
        .supported_output_configs()
        .context("query output configs")?
        .filter_map(|range| {
            let rank = format_rank(range.sample_format())?;
            let rate = preferred_rate.clamp(range.min_sample_rate(), range.max_sample_rate());
            Some((rank, rate.abs_diff(preferred_rate), range.with_sample_rate(rate)))
        })
        .min_by_key(|(rank, distance, _)| (*rank, *distance))
        .map(|(_, _, config)| config)
        .ok_or_else(|| anyhow!("No supported output configs"))
}

/// Fixed callback size closest to `target_frames`, or `None` to keep the device default.
///
/// Shorter callbacks keep every voice closer to the master clock.
pub(crate) fn pick_buffer_size(
    config: &cpal::SupportedStreamConfig,
    target_frames: u32,
) -> Option<cpal::BufferSize> {
    match config.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => Some(cpal::BufferSize::Fixed(
            clamp_frames(target_frames, *min, *max),
        )),
        cpal::SupportedBufferSize::Unknown => None,
    }
}

fn clamp_frames(target: u32, min: u32, max: u32) -> u32 {
    if min > max {
        return min;
    }
    target.clamp(min, max)
}

/// Preference order of output sample formats; `None` for formats the mixer cannot write.
fn format_rank(format: cpal::SampleFormat) -> Option<u8> {
    match format {
        cpal::SampleFormat::F32 => Some(0),
        cpal::SampleFormat::I32 => Some(1),
        cpal::SampleFormat::I16 => Some(2),
        cpal::SampleFormat::U16 => Some(3),
        _ => None,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    !needle.is_empty() && name.to_lowercase().contains(&needle.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_name_match_ignores_case_and_blank_needles() {
        assert!(matches_device_name("USB Audio DAC", "dac"));
        assert!(matches_device_name("usb audio dac", " USB "));
        assert!(!matches_device_name("USB Audio DAC", "hdmi"));
        assert!(!matches_device_name("USB Audio DAC", "   "));
    }

    #[test]
    fn clamp_frames_respects_range() {
        assert_eq!(clamp_frames(1024, 64, 4096), 1024);
        assert_eq!(clamp_frames(16, 64, 4096), 64);
        assert_eq!(clamp_frames(8192, 64, 4096), 4096);
        assert_eq!(clamp_frames(1024, 2048, 512), 2048);
    }

    #[test]
    fn float_formats_rank_first() {
        assert_eq!(format_rank(cpal::SampleFormat::F32), Some(0));
        assert!(format_rank(cpal::SampleFormat::I16) > format_rank(cpal::SampleFormat::I32));
        assert_eq!(format_rank(cpal::SampleFormat::U8), None);
    }
}
