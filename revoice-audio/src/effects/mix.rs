//! Output mix bus - soft clipping before the tap point

/// Final stage of the effects graph
#[derive(Debug, Default, Clone, Copy)]
pub struct MixBus;

impl MixBus {
    pub fn new() -> Self {
        Self
    }

    /// Soft clip in place (interleaved stereo)
    pub fn process(&self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = soft_clip(*sample);
        }
    }
}

/// Soft clip threshold
const SOFT_CLIP_THRESHOLD: f32 = 0.75;
/// Soft clip ceiling
const SOFT_CLIP_CEILING: f32 = 0.89;

/// Transparent below the threshold, asymptotic to the ceiling above it
#[inline(always)]
fn soft_clip(x: f32) -> f32 {
    let abs_x = x.abs();
    if abs_x <= SOFT_CLIP_THRESHOLD {
        return x;
    }

    let sign = x.signum();
    let knee_width = SOFT_CLIP_CEILING - SOFT_CLIP_THRESHOLD;
    let ratio = (abs_x - SOFT_CLIP_THRESHOLD) / knee_width;
    let compressed = SOFT_CLIP_THRESHOLD + knee_width * (1.0 - (-ratio * 3.0).exp());
    sign * compressed.min(SOFT_CLIP_CEILING)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_below_threshold_is_transparent() {
        let bus = MixBus::new();
        let mut samples = vec![0.5, -0.25, 0.7, -0.75];
        let original = samples.clone();
        bus.process(&mut samples);
        assert_eq!(samples, original);
    }

    #[test]
    fn test_peaks_limited_to_ceiling() {
        let bus = MixBus::new();
        let mut samples = vec![4.0, -4.0, 0.9, -0.9];
        bus.process(&mut samples);
        assert!(samples.iter().all(|s| s.abs() <= SOFT_CLIP_CEILING));
        assert!(samples[2] > SOFT_CLIP_THRESHOLD);
    }
}
