//! Freeverb-style reverb
//!
//! Eight parallel lowpass-feedback combs into four series allpasses per
//! channel, with the right channel detuned for stereo spread. Room size and
//! damping are fixed; the only control is the wet/dry mix in percent.

use super::Effect;

/// Comb filter delay times in samples at 44.1kHz
const COMB_TUNINGS: [usize; 8] = [1116, 1188, 1277, 1356, 1422, 1491, 1557, 1617];

/// Allpass filter delay times in samples at 44.1kHz
const ALLPASS_TUNINGS: [usize; 4] = [556, 441, 341, 225];

/// Stereo spread in samples
const STEREO_SPREAD: usize = 23;

/// Medium room
const ROOM_SIZE: f32 = 0.6;
const DAMPING: f32 = 0.5;

/// Lowpass-feedback comb filter
struct CombFilter {
    buffer: Vec<f32>,
    index: usize,
    filter_store: f32,
}

impl CombFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
            filter_store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32, feedback: f32, damping: f32) -> f32 {
        let output = self.buffer[self.index];
        self.filter_store = output * (1.0 - damping) + self.filter_store * damping;
        self.buffer[self.index] = input + self.filter_store * feedback;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.filter_store = 0.0;
        self.index = 0;
    }
}

/// Schroeder allpass filter
struct AllpassFilter {
    buffer: Vec<f32>,
    index: usize,
}

impl AllpassFilter {
    fn new(size: usize) -> Self {
        Self {
            buffer: vec![0.0; size.max(1)],
            index: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let buffered = self.buffer[self.index];
        let output = -input + buffered;
        self.buffer[self.index] = input + buffered * 0.5;
        self.index = (self.index + 1) % self.buffer.len();
        output
    }

    fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.index = 0;
    }
}

/// Stereo reverb with a single wet/dry control
pub struct Reverb {
    comb_l: [CombFilter; 8],
    allpass_l: [AllpassFilter; 4],
    comb_r: [CombFilter; 8],
    allpass_r: [AllpassFilter; 4],

    /// Wet/dry mix (0 - 100)
    wet_dry_mix: f32,

    // Cached linear values (updated on parameter change)
    feedback: f32,
    wet: f32,
    dry: f32,
}

impl Reverb {
    pub fn new(sample_rate: u32) -> Self {
        let scale = sample_rate as f32 / 44100.0;
        let spread = (STEREO_SPREAD as f32 * scale) as usize;

        let comb_l =
            std::array::from_fn(|i| CombFilter::new((COMB_TUNINGS[i] as f32 * scale) as usize));
        let allpass_l = std::array::from_fn(|i| {
            AllpassFilter::new((ALLPASS_TUNINGS[i] as f32 * scale) as usize)
        });
        let comb_r = std::array::from_fn(|i| {
            CombFilter::new((COMB_TUNINGS[i] as f32 * scale) as usize + spread)
        });
        let allpass_r = std::array::from_fn(|i| {
            AllpassFilter::new((ALLPASS_TUNINGS[i] as f32 * scale) as usize + spread)
        });

        Self {
            comb_l,
            allpass_l,
            comb_r,
            allpass_r,
            wet_dry_mix: 0.0,
            feedback: ROOM_SIZE * 0.28 + 0.7,
            wet: 0.0,
            dry: 1.0,
        }
    }

    /// Set wet/dry mix (0 - 100)
    pub fn set_wet_dry_mix(&mut self, mix: f32) {
        self.wet_dry_mix = mix.clamp(0.0, 100.0);
        self.wet = self.wet_dry_mix / 100.0;
        self.dry = 1.0 - self.wet;
    }

    pub fn wet_dry_mix(&self) -> f32 {
        self.wet_dry_mix
    }

    /// Run one frame through the network, returning the fully wet signal
    #[inline]
    fn process_frame(&mut self, left: f32, right: f32) -> (f32, f32) {
        let input = (left + right) * 0.25;
        let feedback = self.feedback;

        let mut out_l = 0.0;
        let mut out_r = 0.0;
        for comb in &mut self.comb_l {
            out_l += comb.process(input, feedback, DAMPING);
        }
        for comb in &mut self.comb_r {
            out_r += comb.process(input, feedback, DAMPING);
        }

        out_l *= 0.125;
        out_r *= 0.125;

        for allpass in &mut self.allpass_l {
            out_l = allpass.process(out_l);
        }
        for allpass in &mut self.allpass_r {
            out_r = allpass.process(out_r);
        }

        (out_l, out_r)
    }
}

impl Effect for Reverb {
    fn process(&mut self, samples: &mut [f32]) {
        let wet = self.wet;
        let dry = self.dry;

        for frame in samples.chunks_exact_mut(2) {
            // The network always runs so tails survive a mix change
            let (rev_l, rev_r) = self.process_frame(frame[0], frame[1]);
            if wet > 0.0 {
                frame[0] = frame[0] * dry + rev_l * wet;
                frame[1] = frame[1] * dry + rev_r * wet;
            }
        }
    }

    fn reset(&mut self) {
        for comb in self.comb_l.iter_mut().chain(self.comb_r.iter_mut()) {
            comb.reset();
        }
        for allpass in self.allpass_l.iter_mut().chain(self.allpass_r.iter_mut()) {
            allpass.reset();
        }
    }
}
