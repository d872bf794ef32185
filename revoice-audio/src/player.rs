//! Player node - the source at the head of the effects graph

use std::sync::Arc;

use tracing::debug;

use crate::audio_file::AudioFile;
use crate::effects::FrameSource;

/// Playback state of the player node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

/// Plays one scheduled file from the start, frame by frame
pub struct PlayerNode {
    /// Audio samples (interleaved stereo) - Arc to avoid copying the decoded file
    samples: Arc<Vec<f32>>,
    /// A file has been scheduled, possibly with zero frames
    scheduled: bool,
    /// Next frame to hand out
    position: u64,
    state: PlaybackState,
}

impl PlayerNode {
    pub fn new() -> Self {
        Self {
            samples: Arc::new(Vec::new()),
            scheduled: false,
            position: 0,
            state: PlaybackState::Stopped,
        }
    }

    /// Schedule a file for playback from its first frame
    pub fn schedule(&mut self, file: &AudioFile) {
        self.samples = file.samples();
        self.scheduled = true;
        self.position = 0;
        self.state = PlaybackState::Stopped;
        debug!(frames = self.frames(), path = %file.path().display(), "file scheduled");
    }

    /// Check if a file is scheduled
    pub fn is_loaded(&self) -> bool {
        self.scheduled
    }

    /// Start playback
    pub fn play(&mut self) {
        if self.is_loaded() {
            self.state = PlaybackState::Playing;
        }
    }

    /// Pause playback
    pub fn pause(&mut self) {
        if self.state == PlaybackState::Playing {
            self.state = PlaybackState::Paused;
        }
    }

    /// Stop playback and reset position
    pub fn stop(&mut self) {
        self.state = PlaybackState::Stopped;
        self.position = 0;
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Scheduled length in frames
    pub fn frames(&self) -> u64 {
        (self.samples.len() / 2) as u64
    }

    /// Frames handed out since the last schedule or stop
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_finished(&self) -> bool {
        self.position >= self.frames()
    }
}

impl Default for PlayerNode {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for PlayerNode {
    fn next_frame(&mut self) -> [f32; 2] {
        if self.state != PlaybackState::Playing {
            return [0.0; 2];
        }

        let idx = (self.position * 2) as usize;
        if idx + 1 >= self.samples.len() {
            // Past the end: keep counting so callers can see the overrun
            self.position += 1;
            return [0.0; 2];
        }

        self.position += 1;
        [self.samples[idx], self.samples[idx + 1]]
    }
}
