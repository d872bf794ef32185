//! Stream format shared by every stage of the graph

use std::time::Duration;

use crate::error::{AudioError, Result};

/// Sample rate used throughout the chain unless configured otherwise
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// The graph is always stereo (interleaved L/R f32)
pub const CHANNELS: u16 = 2;

/// Maximum frames pulled per offline render call
pub const DEFAULT_MAX_FRAME_COUNT: usize = 4096;

/// Stereo 32-bit float format at a fixed sample rate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub max_frame_count: usize,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::stereo(DEFAULT_SAMPLE_RATE)
    }
}

impl StreamFormat {
    /// Stereo format at the given rate with the default pull size
    pub fn stereo(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: CHANNELS,
            max_frame_count: DEFAULT_MAX_FRAME_COUNT,
        }
    }

    pub fn with_max_frame_count(mut self, frames: usize) -> Self {
        self.max_frame_count = frames;
        self
    }

    /// Reject formats the chain cannot be built with
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(AudioError::GraphSetup("sample rate must be non-zero".into()));
        }
        if self.channels != CHANNELS {
            return Err(AudioError::GraphSetup(format!(
                "expected {} channels, got {}",
                CHANNELS, self.channels
            )));
        }
        if self.max_frame_count == 0 {
            return Err(AudioError::GraphSetup(
                "maximum frame count must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Interleaved sample count for a number of frames
    #[inline]
    pub fn samples_for(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }

    pub fn duration_of(&self, frames: u64) -> Duration {
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    pub fn frames_in(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64).round() as u64
    }
}
