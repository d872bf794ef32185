//! Distortion - pre-gain into a soft waveshaper with wet/dry mix
//!
//! The shaper is the tape curve x * (27 + x²) / (27 + 9x²), which stays
//! bounded for any pre-gain.

use super::Effect;

/// Distortion stage
pub struct Distortion {
    /// Pre-gain in dB
    gain_db: f32,
    /// Wet/dry mix (0 - 100)
    wet_dry_mix: f32,

    // Cached linear values (updated on parameter change)
    cached_gain: f32,
    cached_wet: f32,
}

impl Default for Distortion {
    fn default() -> Self {
        Self::new()
    }
}

impl Distortion {
    pub fn new() -> Self {
        let mut distortion = Self {
            gain_db: -6.0,
            wet_dry_mix: 0.0,
            cached_gain: 1.0,
            cached_wet: 0.0,
        };
        distortion.update_cached();
        distortion
    }

    #[inline]
    fn update_cached(&mut self) {
        self.cached_gain = 10.0f32.powf(self.gain_db / 20.0);
        self.cached_wet = self.wet_dry_mix / 100.0;
    }

    /// Set pre-gain in dB (-80 to +20)
    pub fn set_gain_db(&mut self, gain_db: f32) {
        self.gain_db = gain_db.clamp(-80.0, 20.0);
        self.update_cached();
    }

    pub fn gain_db(&self) -> f32 {
        self.gain_db
    }

    /// Set wet/dry mix (0 - 100)
    pub fn set_wet_dry_mix(&mut self, mix: f32) {
        self.wet_dry_mix = mix.clamp(0.0, 100.0);
        self.update_cached();
    }

    pub fn wet_dry_mix(&self) -> f32 {
        self.wet_dry_mix
    }

    #[inline]
    fn shape(x: f32) -> f32 {
        let x = x.clamp(-3.0, 3.0);
        let x2 = x * x;
        x * (27.0 + x2) / (27.0 + 9.0 * x2)
    }
}

impl Effect for Distortion {
    fn process(&mut self, samples: &mut [f32]) {
        // Fully dry: leave the signal untouched
        if self.cached_wet <= 0.0 {
            return;
        }

        let gain = self.cached_gain;
        let wet = self.cached_wet;
        let dry = 1.0 - wet;

        for sample in samples.iter_mut() {
            let shaped = Self::shape(*sample * gain);
            *sample = *sample * dry + shaped * wet;
        }
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_mix_is_passthrough() {
        let mut d = Distortion::new();
        d.set_gain_db(12.0);
        let mut samples = vec![0.9, -0.4, 0.1, 0.0];
        let original = samples.clone();
        d.process(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn test_full_wet_is_bounded() {
        let mut d = Distortion::new();
        d.set_gain_db(20.0);
        d.set_wet_dry_mix(100.0);

        let mut samples = vec![1.0, -1.0, 0.5, -0.5];
        d.process(&mut samples);
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
        // Heavy drive pushes the shaper into saturation
        assert!((samples[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_parameters_clamped() {
        let mut d = Distortion::new();
        d.set_wet_dry_mix(140.0);
        assert_eq!(d.wet_dry_mix(), 100.0);
        d.set_gain_db(-200.0);
        assert_eq!(d.gain_db(), -80.0);
    }
}
