//! Output stage: one CPAL stream rendering the mix bus.
//!
//! CPAL streams are not `Send` on every platform, so the stream is built and kept
//! alive on a dedicated thread. The thread reports the negotiated format once the
//! stream is playing and then parks until shutdown.

use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::Sender;

use crate::config::OutputConfig;
use crate::device;
use crate::mixer::MixBus;

const PREFERRED_RATE_HZ: u32 = 48_000;

/// Negotiated output format.
#[derive(Clone, Debug)]
pub struct OutputFormat {
    pub device: String,
    pub sample_rate: u32,
    pub channels: usize,
    pub sample_format: String,
}

/// Keeps the output thread (and its stream) alive.
pub(crate) struct OutputHandle {
    format: OutputFormat,
    shutdown_tx: Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl OutputHandle {
    pub(crate) fn format(&self) -> &OutputFormat {
        &self.format
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Open the configured device and start rendering `bus` into it.
pub(crate) fn spawn_output(cfg: &OutputConfig, bus: Arc<MixBus>) -> Result<OutputHandle> {
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<OutputFormat>>(1);
    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    let cfg = cfg.clone();

    let join = thread::spawn(move || {
        let stream = match open_stream(&cfg, bus) {
            Ok((stream, format)) => {
                let _ = ready_tx.send(Ok(format));
                stream
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        let _ = shutdown_rx.recv();
        drop(stream);
        tracing::debug!("output stream closed");
    });

    let format = ready_rx
        .recv()
        .map_err(|_| anyhow!("output thread exited before reporting"))??;
    tracing::info!(
        device = %format.device,
        rate_hz = format.sample_rate,
        channels = format.channels,
        sample_format = %format.sample_format,
        "output stream started"
    );

    Ok(OutputHandle {
        format,
        shutdown_tx,
        join: Some(join),
    })
}

fn open_stream(cfg: &OutputConfig, bus: Arc<MixBus>) -> Result<(cpal::Stream, OutputFormat)> {
    let host = cpal::default_host();
    let device = device::pick_device(&host, cfg.device.as_deref())?;
    let supported = device::pick_output_config(&device, PREFERRED_RATE_HZ)?;
    let mut stream_config: cpal::StreamConfig = supported.config();
    if let Some(buf) = device::pick_buffer_size(&supported, cfg.buffer_frames) {
        stream_config.buffer_size = buf;
    }

    let stream = build_output_stream(&device, &stream_config, supported.sample_format(), bus)?;
    stream.play().context("start output stream")?;

    let format = OutputFormat {
        device: device::device_name(&device),
        sample_rate: stream_config.sample_rate,
        channels: stream_config.channels as usize,
        sample_format: format!("{:?}", supported.sample_format()),
    };
    Ok((stream, format))
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    bus: Arc<MixBus>,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, bus),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, bus),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, bus),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, bus),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

/// Stream whose callback renders the bus into a scratch `f32` buffer and converts it to `T`.
///
/// The scratch buffer only grows, so steady-state callbacks do not allocate.
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    bus: Arc<MixBus>,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let mix = &mut scratch[..data.len()];
            bus.render(mix, channels_out);
            for (dst, src) in data.iter_mut().zip(mix.iter()) {
                *dst = <T as cpal::Sample>::from_sample::<f32>(src.clamp(-1.0, 1.0));
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}
