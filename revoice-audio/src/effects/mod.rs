//! DSP stages of the effects graph

mod distortion;
mod mix;
mod pitch;
mod reverb;
mod varispeed;

pub use distortion::Distortion;
pub use mix::MixBus;
pub use pitch::PitchShifter;
pub use reverb::Reverb;
pub use varispeed::{FrameSource, Varispeed};

/// Trait for in-place audio effects
pub trait Effect: Send {
    /// Process audio samples in place (stereo interleaved)
    fn process(&mut self, samples: &mut [f32]);

    /// Reset effect state
    fn reset(&mut self);
}
