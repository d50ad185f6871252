//! Channel mixing and sample-rate conversion for captured audio.
//!
//! Devices report their own native format (commonly 44.1/48 kHz stereo);
//! outbound chunks are mono at the configured rate. [`downmix`] and
//! [`Resampler`] bridge the two, one cpal callback buffer at a time.
//!
//! The resampler is linear interpolation: cheap, allocation-bounded, and good
//! enough for speech headed to a recogniser.

/// Average interleaved channels into a single mono channel.
///
/// * `channels == 1` returns the input unchanged.
/// * `channels == 0` returns an empty vector.
/// * A trailing partial frame is discarded.
///
/// ```rust
/// use voice_session::audio::downmix;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, 0.4]; // L R L R
/// let mono = downmix(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = usize::from(n);
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Streaming linear-interpolation resampler for mono audio.
///
/// Buffers may be cut anywhere: the fractional read position and the last
/// input sample carry over to the next [`process`](Self::process) call, so a
/// signal split across device buffers resamples exactly as if it had arrived
/// whole.
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    /// Input samples advanced per output sample.
    step: f64,
    /// Read position, relative to `prev` when it is set.
    pos: f64,
    /// Last sample of the previous buffer.
    prev: Option<f32>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if from_rate == 0 || to_rate == 0 {
            1.0
        } else {
            f64::from(from_rate) / f64::from(to_rate)
        };
        Self {
            from_rate,
            to_rate,
            step,
            pos: 0.0,
            prev: None,
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate || self.from_rate == 0 || self.to_rate == 0
    }

    /// Append the output for `input` to `out`.
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) {
        if self.is_passthrough() {
            out.extend_from_slice(input);
            return;
        }
        let Some(&last) = input.last() else {
            return;
        };

        // Index 0 is the carried sample when there is one.
        let offset = usize::from(self.prev.is_some());
        let len = input.len() + offset;
        let at = |i: usize| match self.prev {
            Some(prev) if i == 0 => prev,
            _ => input[i - offset],
        };

        loop {
            let idx = self.pos as usize;
            if idx + 1 >= len {
                break;
            }
            let (a, b) = (at(idx), at(idx + 1));
            out.push(a + (b - a) * (self.pos - idx as f64) as f32);
            self.pos += self.step;
        }

        self.pos -= (len - 1) as f64;
        self.prev = Some(last);
    }

    /// Emit the samples that were waiting on input past the last one, holding
    /// the final value, and reset for a new span.
    pub fn finish(&mut self, out: &mut Vec<f32>) {
        if let Some(last) = self.prev.take() {
            while self.pos < 1.0 {
                out.push(last);
                self.pos += self.step;
            }
        }
        self.pos = 0.0;
    }
}

/// Convert a complete mono signal from `from_rate` Hz to `to_rate` Hz.
///
/// Equal rates (or either rate being zero) return the input unchanged.
///
/// ```rust
/// use voice_session::audio::resample;
///
/// let hi = vec![0.5_f32; 480]; // 10 ms @ 48 kHz
/// assert_eq!(resample(&hi, 48_000, 16_000).len(), 160);
/// ```
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let mut resampler = Resampler::new(from_rate, to_rate);
    let mut out = Vec::new();
    resampler.process(samples, &mut out);
    resampler.finish(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_mono_is_identity() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix(&input, 1), input);
    }

    #[test]
    fn downmix_drops_partial_trailing_frame() {
        let out = downmix(&[1.0_f32, 1.0, 0.5], 2);
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn downmix_zero_channels_is_empty() {
        assert!(downmix(&[1.0_f32, 2.0], 0).is_empty());
    }

    #[test]
    fn resample_same_rate_is_identity() {
        let input: Vec<f32> = (0..160).map(|i| i as f32 / 160.0).collect();
        assert_eq!(resample(&input, 16_000, 16_000), input);
    }

    #[test]
    fn resample_empty_input() {
        assert!(resample(&[], 48_000, 16_000).is_empty());
    }

    #[test]
    fn resample_44100_one_second_length() {
        let out = resample(&vec![0.0_f32; 44_100], 44_100, 16_000);
        assert!(out.len().abs_diff(16_000) <= 1, "got {}", out.len());
    }

    #[test]
    fn resample_upsamples() {
        let out = resample(&vec![0.0_f32; 80], 8_000, 16_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn resample_preserves_dc_level() {
        for &s in &resample(&vec![0.25_f32; 441], 44_100, 16_000) {
            assert!((s - 0.25).abs() < 1e-5, "amplitude drift: {s}");
        }
    }

    #[test]
    fn resample_interpolates_ramp() {
        // 0, 1, 2, 3 at 2 Hz → 4 Hz doubles resolution
        let out = resample(&[0.0_f32, 1.0, 2.0, 3.0], 2, 4);
        assert_eq!(out.len(), 8);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[7] - 3.0).abs() < 1e-6);
    }

    #[test]
    fn streaming_matches_one_shot_length() {
        // 100 buffers of 512 samples at 44.1 kHz
        let mut resampler = Resampler::new(44_100, 16_000);
        let mut out = Vec::new();
        for _ in 0..100 {
            resampler.process(&[0.0_f32; 512], &mut out);
        }
        resampler.finish(&mut out);

        let whole = resample(&vec![0.0_f32; 51_200], 44_100, 16_000);
        assert!(out.len().abs_diff(whole.len()) <= 1);
        assert!(out.len().abs_diff(18_576) <= 1, "got {}", out.len());
    }

    #[test]
    fn ramp_stays_continuous_across_buffer_edges() {
        let ramp: Vec<f32> = (0..300).map(|i| i as f32).collect();
        let mut resampler = Resampler::new(3, 2);
        let mut out = Vec::new();
        for piece in ramp.chunks(7) {
            resampler.process(piece, &mut out);
        }

        assert_eq!(out.len(), 200);
        for (i, &s) in out.iter().enumerate() {
            assert!((s - i as f32 * 1.5).abs() < 1e-3, "sample {i} = {s}");
        }
    }

    #[test]
    fn finish_resets_for_the_next_span() {
        let mut resampler = Resampler::new(48_000, 16_000);
        let mut first = Vec::new();
        resampler.process(&[1.0_f32; 480], &mut first);
        resampler.finish(&mut first);

        let mut second = Vec::new();
        resampler.process(&[1.0_f32; 480], &mut second);
        resampler.finish(&mut second);
        assert_eq!(first.len(), second.len());
    }
}
