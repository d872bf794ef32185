//! Audio engine for revoice - effects graph, capture, and offline rendering
//!
//! This crate provides the streaming audio side of the pipeline:
//! - Graph: Fixed chain player → varispeed → pitch → distortion → reverb → mix
//! - Params: Lock-free parameter block shared with the render thread
//! - Capture: Output tap that writes the mix to a file and completes once
//! - Offline: Pull-based, faster-than-real-time rendering of the same graph
//! - Driver: Real-time callback threads (wall-clock paced or cpal device)

mod audio_file;
mod cancel;
mod capture;
mod driver;
mod effects;
mod engine;
mod error;
mod format;
mod graph;
mod offline;
mod params;
mod player;
mod preset;

pub use audio_file::{AudioFile, AudioFileWriter};
pub use cancel::CancelToken;
pub use capture::{CaptureJob, CaptureSession, CaptureSink, CompletionFn, OneShot};
pub use driver::{ClockedDriver, CpalDriver, OutputDriver, Pacing, RenderCallback};
pub use effects::{Distortion, Effect, MixBus, PitchShifter, Reverb, Varispeed, FrameSource};
pub use engine::{AudioEngine, RecordingConfig};
pub use error::{AudioError, Result};
pub use format::{StreamFormat, CHANNELS, DEFAULT_MAX_FRAME_COUNT, DEFAULT_SAMPLE_RATE};
pub use graph::{EffectsGraph, OutputTap, RenderMode, TapControl};
pub use offline::{render_file, OfflineRenderer};
pub use params::{AtomicF32, RenderParams, RenderState};
pub use player::{PlaybackState, PlayerNode};
pub use preset::{DistortionSettings, EffectPreset, TagCache};
