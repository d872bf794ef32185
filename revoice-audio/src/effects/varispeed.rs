//! Varispeed - playback rate change that shifts speed and pitch together
//!
//! Pulls frames from the upstream source at `rate` frames per output frame
//! and linearly interpolates between neighbours. At rate 1.0 the output is
//! the source, sample for sample.

/// Upstream node that yields one stereo frame at a time
pub trait FrameSource {
    /// Next frame; silence once the source is exhausted or not playing
    fn next_frame(&mut self) -> [f32; 2];
}

/// Linear-interpolating resampler stage
pub struct Varispeed {
    rate: f32,
    /// Fractional read position between `prev` and `next`
    phase: f64,
    prev: [f32; 2],
    next: [f32; 2],
    primed: bool,
}

impl Default for Varispeed {
    fn default() -> Self {
        Self::new()
    }
}

impl Varispeed {
    pub const MIN_RATE: f32 = 0.25;
    pub const MAX_RATE: f32 = 4.0;

    pub fn new() -> Self {
        Self {
            rate: 1.0,
            phase: 0.0,
            prev: [0.0; 2],
            next: [0.0; 2],
            primed: false,
        }
    }

    /// Set playback rate (0.25 - 4.0)
    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate.clamp(Self::MIN_RATE, Self::MAX_RATE);
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// Fill `output` (stereo interleaved) from `source`
    pub fn render<S: FrameSource + ?Sized>(&mut self, source: &mut S, output: &mut [f32]) {
        if !self.primed {
            self.prev = source.next_frame();
            self.next = source.next_frame();
            self.primed = true;
        }

        let step = self.rate as f64;
        for frame in output.chunks_exact_mut(2) {
            let t = self.phase as f32;
            frame[0] = self.prev[0] + (self.next[0] - self.prev[0]) * t;
            frame[1] = self.prev[1] + (self.next[1] - self.prev[1]) * t;

            self.phase += step;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
                self.prev = self.next;
                self.next = source.next_frame();
            }
        }
    }

    /// Forget buffered frames so the next render re-primes from the source
    pub fn reset(&mut self) {
        self.phase = 0.0;
        self.prev = [0.0; 2];
        self.next = [0.0; 2];
        self.primed = false;
    }
}
