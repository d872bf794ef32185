//! Time-preserving pitch shifter
//!
//! Two read heads sweep a delay line at a rate set by the pitch ratio,
//! half a window apart. Each head is faded out with a triangular window as
//! it wraps, so the two gains always sum to one. Output length equals input
//! length; the shifted signal lags the input by about half a window.

use super::Effect;

/// Window length in frames (~46ms at 44.1kHz)
const WINDOW: usize = 2048;

/// Delay line length per channel (power of 2, > WINDOW + 2)
const LINE_SIZE: usize = 4096;
const LINE_MASK: usize = LINE_SIZE - 1;

/// Shifts below this are treated as no shift
const BYPASS_CENTS: f32 = 0.5;

/// Delay-line pitch shifter (stereo)
pub struct PitchShifter {
    line_l: Box<[f32; LINE_SIZE]>,
    line_r: Box<[f32; LINE_SIZE]>,
    write_pos: usize,

    /// Delay of head A in frames (0 .. WINDOW)
    delay: f32,

    /// Pitch shift in cents
    cents: f32,
    /// Frequency ratio 2^(cents/1200)
    ratio: f32,
}

impl Default for PitchShifter {
    fn default() -> Self {
        Self::new()
    }
}

impl PitchShifter {
    pub const MIN_CENTS: f32 = -2400.0;
    pub const MAX_CENTS: f32 = 2400.0;

    pub fn new() -> Self {
        Self {
            line_l: Box::new([0.0; LINE_SIZE]),
            line_r: Box::new([0.0; LINE_SIZE]),
            write_pos: 0,
            delay: 0.0,
            cents: 0.0,
            ratio: 1.0,
        }
    }

    /// Set pitch shift in cents (-2400 to +2400)
    pub fn set_cents(&mut self, cents: f32) {
        self.cents = cents.clamp(Self::MIN_CENTS, Self::MAX_CENTS);
        self.ratio = 2.0f32.powf(self.cents / 1200.0);
    }

    pub fn cents(&self) -> f32 {
        self.cents
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    /// Read the delay line `delay` frames behind the write head
    #[inline]
    fn tap(line: &[f32; LINE_SIZE], write_pos: usize, delay: f32) -> f32 {
        let whole = delay as usize;
        let frac = delay - whole as f32;
        let a = line[write_pos.wrapping_sub(whole) & LINE_MASK];
        let b = line[write_pos.wrapping_sub(whole + 1) & LINE_MASK];
        a + (b - a) * frac
    }

    /// Triangular crossfade gain for a head at `delay`
    #[inline]
    fn gain(delay: f32) -> f32 {
        1.0 - (2.0 * delay / WINDOW as f32 - 1.0).abs()
    }

    #[inline]
    fn wrap(delay: f32) -> f32 {
        let window = WINDOW as f32;
        if delay >= window {
            delay - window
        } else if delay < 0.0 {
            delay + window
        } else {
            delay
        }
    }
}

impl Effect for PitchShifter {
    fn process(&mut self, samples: &mut [f32]) {
        let shifting = self.cents.abs() >= BYPASS_CENTS;
        let half = (WINDOW / 2) as f32;
        let drift = 1.0 - self.ratio;

        for frame in samples.chunks_exact_mut(2) {
            // Keep the line filled even when bypassed so engaging is seamless
            self.line_l[self.write_pos] = frame[0];
            self.line_r[self.write_pos] = frame[1];

            if shifting {
                let delay_a = self.delay;
                let delay_b = Self::wrap(self.delay + half);
                let gain_a = Self::gain(delay_a);
                let gain_b = Self::gain(delay_b);

                frame[0] = Self::tap(&self.line_l, self.write_pos, delay_a) * gain_a
                    + Self::tap(&self.line_l, self.write_pos, delay_b) * gain_b;
                frame[1] = Self::tap(&self.line_r, self.write_pos, delay_a) * gain_a
                    + Self::tap(&self.line_r, self.write_pos, delay_b) * gain_b;

                self.delay = Self::wrap(self.delay + drift);
            }

            self.write_pos = (self.write_pos + 1) & LINE_MASK;
        }
    }

    fn reset(&mut self) {
        self.line_l.fill(0.0);
        self.line_r.fill(0.0);
        self.write_pos = 0;
        self.delay = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, frames: usize, sample_rate: f32) -> Vec<f32> {
        let mut out = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let s = (2.0 * std::f32::consts::PI * freq * i as f32 / sample_rate).sin() * 0.5;
            out.push(s);
            out.push(s);
        }
        out
    }

    fn zero_crossings(samples: &[f32]) -> usize {
        let left: Vec<f32> = samples.chunks_exact(2).map(|f| f[0]).collect();
        left.windows(2)
            .filter(|w| (w[0] < 0.0) != (w[1] < 0.0))
            .count()
    }

    #[test]
    fn test_cents_clamping_and_ratio() {
        let mut ps = PitchShifter::new();

        ps.set_cents(5000.0);
        assert_eq!(ps.cents(), 2400.0);

        ps.set_cents(-5000.0);
        assert_eq!(ps.cents(), -2400.0);

        ps.set_cents(1200.0);
        assert!((ps.ratio() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_shift_is_transparent() {
        let mut ps = PitchShifter::new();
        let input = sine(440.0, 1024, 44100.0);
        let mut samples = input.clone();
        ps.process(&mut samples);
        assert_eq!(samples, input);
    }

    #[test]
    fn test_octave_up_raises_frequency() {
        let mut ps = PitchShifter::new();
        ps.set_cents(1200.0);

        let mut samples = sine(220.0, 44100, 44100.0);
        let before = zero_crossings(&samples[WINDOW * 2..]);
        ps.process(&mut samples);
        let after = zero_crossings(&samples[WINDOW * 2..]);

        // An octave up should roughly double the crossing count
        let ratio = after as f32 / before as f32;
        assert!(ratio > 1.7 && ratio < 2.3, "crossing ratio {}", ratio);
    }

    #[test]
    fn test_length_preserved_and_bounded() {
        let mut ps = PitchShifter::new();
        ps.set_cents(-600.0);

        let mut samples = sine(330.0, 8192, 44100.0);
        let len = samples.len();
        ps.process(&mut samples);

        assert_eq!(samples.len(), len);
        assert!(samples.iter().all(|s| s.is_finite() && s.abs() <= 1.0));
    }

    #[test]
    fn test_crossfade_gains_sum_to_one() {
        for d in [0.0f32, 100.0, 512.0, 1024.0, 1500.0, 2047.0] {
            let other = PitchShifter::wrap(d + (WINDOW / 2) as f32);
            let sum = PitchShifter::gain(d) + PitchShifter::gain(other);
            assert!((sum - 1.0).abs() < 1e-4, "sum {} at {}", sum, d);
        }
    }
}
