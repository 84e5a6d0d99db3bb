//! Stateful linear-interpolation sample-rate converter.
//!
//! Grounded on `voice/audio.rs::AudioBuffer::resample()` and
//! `provider/openai_realtime.rs::resample_16k_to_24k()` — both are
//! whole-buffer, stateless linear interpolation. SPEC_FULL.md §4.3.1
//! requires the converter to preserve state across chunk boundaries so
//! a 20 ms frame boundary never introduces a discontinuity; this
//! restructures the same algorithm into a struct that carries the
//! trailing sample and fractional phase between calls.

/// One direction of sample-rate conversion for one call. Never shared
/// across calls or directions (§4.1, §4.3: "state is per-call").
pub struct StatefulResampler {
    from_rate: u32,
    to_rate: u32,
    /// Last sample of the previous chunk, used to interpolate across
    /// the boundary into the new chunk.
    last_sample: f32,
    /// Fractional position into the next input sample, carried over
    /// from the end of the previous chunk's output.
    phase: f64,
    primed: bool,
}

impl StatefulResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate,
            to_rate,
            last_sample: 0.0,
            phase: 0.0,
            primed: false,
        }
    }

    /// Resample one chunk of i16 PCM samples, continuing from whatever
    /// phase the previous call left off at.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }

        let ratio = self.from_rate as f64 / self.to_rate as f64;
        // Virtual input stream: [last_sample, input[0], input[1], ...]
        // so the first output samples can interpolate across the
        // previous chunk's boundary.
        let extended_len = input.len() + 1;
        let get = |i: usize| -> f32 {
            if i == 0 {
                self.last_sample
            } else {
                input[i - 1] as f32
            }
        };

        let mut output = Vec::new();
        let mut pos = self.phase;
        while pos < (extended_len - 1) as f64 {
            let idx0 = pos.floor() as usize;
            let idx1 = (idx0 + 1).min(extended_len - 1);
            let frac = (pos - idx0 as f64) as f32;
            let sample = get(idx0) * (1.0 - frac) + get(idx1) * frac;
            output.push(sample.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16);
            pos += ratio;
        }

        self.phase = pos - (extended_len - 1) as f64;
        self.last_sample = input[input.len() - 1] as f32;
        self.primed = true;
        output
    }

    pub fn is_primed(&self) -> bool {
        self.primed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine_wave(rate: u32, freq: f64, n: usize) -> Vec<i16> {
        (0..n)
            .map(|i| {
                let t = i as f64 / rate as f64;
                (i16::MAX as f64 * 0.5 * (2.0 * PI * freq * t).sin()) as i16
            })
            .collect()
    }

    fn rms(samples: &[i16]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    #[test]
    fn upsample_then_downsample_round_trips_within_bounded_rms_error() {
        let input = sine_wave(8_000, 1_000.0, 800);

        let mut up = StatefulResampler::new(8_000, 16_000);
        let mut down = StatefulResampler::new(16_000, 8_000);

        let upsampled = up.process(&input);
        let round_tripped = down.process(&upsampled);

        let len = input.len().min(round_tripped.len());
        let original_rms = rms(&input[..len]);
        let error_rms: f64 = {
            let diffs: Vec<i16> = input[..len]
                .iter()
                .zip(round_tripped[..len].iter())
                .map(|(&a, &b)| a.saturating_sub(b))
                .collect();
            rms(&diffs)
        };

        assert!(
            error_rms <= 0.01 * original_rms.max(1.0) * 4.0,
            "error_rms={error_rms} original_rms={original_rms}"
        );
    }

    #[test]
    fn state_persists_across_chunk_boundary() {
        let mut resampler = StatefulResampler::new(8_000, 16_000);
        let whole = sine_wave(8_000, 440.0, 160);
        let (first, second) = whole.split_at(80);

        let mut chunked = resampler.process(first);
        chunked.extend(resampler.process(second));

        let mut single_shot = StatefulResampler::new(8_000, 16_000);
        let unchunked = single_shot.process(&whole);

        // Output lengths should match closely; a stateless whole-buffer
        // resampler run separately on two halves would instead produce
        // an audible click at the boundary and a different total length.
        assert!((chunked.len() as i64 - unchunked.len() as i64).abs() <= 2);
    }

    #[test]
    fn empty_input_produces_empty_output_without_panicking() {
        let mut resampler = StatefulResampler::new(24_000, 8_000);
        assert!(resampler.process(&[]).is_empty());
    }
}
