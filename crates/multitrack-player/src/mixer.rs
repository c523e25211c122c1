//! Mix bus shared by every device-backed track.
//!
//! Each track owns a [`Voice`]: its decoded PCM plus transport state. The output
//! callback calls [`MixBus::render`], which sums every running voice into one
//! interleaved `f32` buffer:
//! - the read head advances by `rate` source frames per output frame (varispeed)
//! - samples between frames are linearly interpolated
//! - source channels are mapped onto the output layout
//! - the voice gain is applied last

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Decoded interleaved audio at the output sample rate.
#[derive(Debug)]
pub(crate) struct PcmBuffer {
    channels: usize,
    samples: Vec<f32>,
}

impl PcmBuffer {
    pub(crate) fn new(channels: usize, samples: Vec<f32>) -> Self {
        Self {
            channels: channels.max(1),
            samples,
        }
    }

    pub(crate) fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    fn sample(&self, frame: usize, ch: usize) -> f32 {
        self.samples
            .get(frame * self.channels + ch)
            .copied()
            .unwrap_or(0.0)
    }

    /// Source sample for output channel `dst_ch` at `frame`, after channel mapping.
    ///
    /// - mono → stereo: duplicate channel 0
    /// - stereo → mono: average L/R
    /// - anything else: clamp to the last available source channel
    fn mapped(&self, frame: usize, dst_ch: usize, dst_channels: usize) -> f32 {
        match (self.channels, dst_channels) {
            (2, 1) => 0.5 * (self.sample(frame, 0) + self.sample(frame, 1)),
            (src, _) => self.sample(frame, dst_ch.min(src - 1)),
        }
    }
}

/// Transport state of one voice. Positions are in output-rate frames.
#[derive(Debug)]
pub(crate) struct VoiceState {
    pub(crate) pcm: Option<Arc<PcmBuffer>>,
    pub(crate) position: f64,
    pub(crate) rate: f64,
    pub(crate) gain: f32,
    pub(crate) running: bool,
}

impl Default for VoiceState {
    fn default() -> Self {
        Self {
            pcm: None,
            position: 0.0,
            rate: 1.0,
            gain: 1.0,
            running: false,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Voice {
    state: Mutex<VoiceState>,
}

impl Voice {
    pub(crate) fn lock(&self) -> MutexGuard<'_, VoiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Default)]
pub(crate) struct MixBus {
    voices: Mutex<Vec<Arc<Voice>>>,
}

impl MixBus {
    pub(crate) fn add(&self, voice: Arc<Voice>) {
        self.voices_guard().push(voice);
    }

    pub(crate) fn remove(&self, voice: &Arc<Voice>) {
        self.voices_guard().retain(|v| !Arc::ptr_eq(v, voice));
    }

    pub(crate) fn len(&self) -> usize {
        self.voices_guard().len()
    }

    /// Overwrite `out` (interleaved, `channels` wide) with the mix of every running voice.
    pub(crate) fn render(&self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = out.len() / channels;

        for voice in self.voices_guard().iter() {
            let mut st = voice.lock();
            if !st.running {
                continue;
            }
            let Some(pcm) = st.pcm.clone() else {
                continue;
            };
            if st.gain <= 0.0 {
                // Silent voices keep their place on the clock.
                st.position += st.rate * frames as f64;
                continue;
            }
            let total = pcm.frames();
            let gain = st.gain;
            let rate = st.rate;
            let mut pos = st.position;

            for frame in 0..frames {
                if pos < 0.0 || pos >= total as f64 {
                    break;
                }
                let index = pos as usize;
                let frac = (pos - index as f64) as f32;
                let next = (index + 1).min(total - 1);
                for ch in 0..channels {
                    let a = pcm.mapped(index, ch, channels);
                    let b = pcm.mapped(next, ch, channels);
                    out[frame * channels + ch] += (a + (b - a) * frac) * gain;
                }
                pos += rate;
            }
            st.position = pos;
        }
    }

    fn voices_guard(&self) -> MutexGuard<'_, Vec<Arc<Voice>>> {
        self.voices.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice_with(samples: Vec<f32>, channels: usize) -> Arc<Voice> {
        let voice = Arc::new(Voice::default());
        {
            let mut st = voice.lock();
            st.pcm = Some(Arc::new(PcmBuffer::new(channels, samples)));
            st.running = true;
        }
        voice
    }

    #[test]
    fn paused_voice_contributes_silence_and_keeps_position() {
        let bus = MixBus::default();
        let voice = voice_with(vec![1.0; 8], 1);
        voice.lock().running = false;
        bus.add(voice.clone());

        let mut out = vec![0.5; 4];
        bus.render(&mut out, 1);
        assert_eq!(out, vec![0.0; 4]);
        assert_eq!(voice.lock().position, 0.0);
    }

    #[test]
    fn voices_are_summed_with_gain() {
        let bus = MixBus::default();
        let a = voice_with(vec![0.5; 4], 1);
        let b = voice_with(vec![0.25; 4], 1);
        b.lock().gain = 0.5;
        bus.add(a);
        bus.add(b);

        let mut out = vec![0.0; 2];
        bus.render(&mut out, 1);
        assert_eq!(out, vec![0.625, 0.625]);
    }

    #[test]
    fn muted_voice_keeps_advancing() {
        let bus = MixBus::default();
        let voice = voice_with(vec![1.0; 8], 1);
        voice.lock().gain = 0.0;
        bus.add(voice.clone());

        let mut out = vec![0.0; 4];
        bus.render(&mut out, 1);
        assert_eq!(out, vec![0.0; 4]);
        assert_eq!(voice.lock().position, 4.0);
    }

    #[test]
    fn rate_advances_read_head_with_interpolation() {
        let bus = MixBus::default();
        let voice = voice_with(vec![0.0, 1.0, 2.0, 3.0], 1);
        voice.lock().rate = 0.5;
        bus.add(voice.clone());

        let mut out = vec![0.0; 4];
        bus.render(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.5, 1.0, 1.5]);
        assert_eq!(voice.lock().position, 2.0);
    }

    #[test]
    fn voice_past_end_is_silent() {
        let bus = MixBus::default();
        let voice = voice_with(vec![1.0, 1.0], 1);
        voice.lock().position = 1.0;
        bus.add(voice);

        let mut out = vec![0.0; 3];
        bus.render(&mut out, 1);
        assert_eq!(out, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn mono_source_is_duplicated_to_stereo() {
        let bus = MixBus::default();
        bus.add(voice_with(vec![0.25, 0.75], 1));

        let mut out = vec![0.0; 4];
        bus.render(&mut out, 2);
        assert_eq!(out, vec![0.25, 0.25, 0.75, 0.75]);
    }

    #[test]
    fn stereo_source_is_averaged_to_mono() {
        let bus = MixBus::default();
        bus.add(voice_with(vec![1.0, 0.0, 0.5, 0.5], 2));

        let mut out = vec![0.0; 2];
        bus.render(&mut out, 1);
        assert_eq!(out, vec![0.5, 0.5]);
    }

    #[test]
    fn removed_voice_is_not_rendered() {
        let bus = MixBus::default();
        let voice = voice_with(vec![1.0; 4], 1);
        bus.add(voice.clone());
        assert_eq!(bus.len(), 1);
        bus.remove(&voice);
        assert_eq!(bus.len(), 0);

        let mut out = vec![0.0; 2];
        bus.render(&mut out, 1);
        assert_eq!(out, vec![0.0, 0.0]);
    }
}
