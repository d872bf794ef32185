//! Effects graph - the fixed signal chain and its output taps
//!
//! player → varispeed → pitch → distortion → reverb → mix → taps
//!
//! The graph is built once by `configure()`. Parameters live in a shared
//! `RenderState`; the chain copies a snapshot at the start of every pull, so
//! `apply_preset` never blocks the render thread.

use std::sync::Arc;

use tracing::{debug, info};

use crate::audio_file::AudioFile;
use crate::effects::{Distortion, Effect, MixBus, PitchShifter, Reverb, Varispeed};
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;
use crate::params::{RenderParams, RenderState};
use crate::player::PlayerNode;
use crate::preset::EffectPreset;

/// What a tap wants after seeing a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapControl {
    Continue,
    Remove,
}

/// Observer of every buffer leaving the mix output
pub trait OutputTap: Send {
    fn on_buffer(&mut self, samples: &[f32]) -> TapControl;
}

impl<F> OutputTap for F
where
    F: FnMut(&[f32]) -> TapControl + Send,
{
    fn on_buffer(&mut self, samples: &[f32]) -> TapControl {
        self(samples)
    }
}

/// Who drives the pulls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// An output driver pulls at device rate and taps observe the mix
    #[default]
    Realtime,
    /// The caller pulls up to `max_frame_count` frames at a time
    Offline { max_frame_count: usize },
}

/// The built stages, in processing order
struct SignalChain {
    player: PlayerNode,
    varispeed: Varispeed,
    pitch: PitchShifter,
    distortion: Distortion,
    reverb: Reverb,
    mix: MixBus,
    /// Parameters currently loaded into the stages
    applied: Option<RenderParams>,
}

impl SignalChain {
    fn new(format: &StreamFormat) -> Self {
        Self {
            player: PlayerNode::new(),
            varispeed: Varispeed::new(),
            pitch: PitchShifter::new(),
            distortion: Distortion::new(),
            reverb: Reverb::new(format.sample_rate),
            mix: MixBus::new(),
            applied: None,
        }
    }

    /// Load a parameter snapshot into the stages if it changed
    fn sync(&mut self, params: RenderParams) {
        if self.applied == Some(params) {
            return;
        }
        self.varispeed.set_rate(params.playback_rate);
        self.pitch.set_cents(params.pitch_cents);
        self.distortion.set_gain_db(params.distortion_gain_db);
        self.distortion.set_wet_dry_mix(params.distortion_mix);
        self.reverb.set_wet_dry_mix(params.reverb_mix);
        self.applied = Some(params);
    }

    fn process(&mut self, output: &mut [f32]) {
        self.varispeed.render(&mut self.player, output);
        self.pitch.process(output);
        self.distortion.process(output);
        self.reverb.process(output);
        self.mix.process(output);
    }

    fn reset(&mut self) {
        self.varispeed.reset();
        self.pitch.reset();
        self.distortion.reset();
        self.reverb.reset();
    }
}

/// Fixed-order effects graph with one stream format throughout
pub struct EffectsGraph {
    format: StreamFormat,
    params: Arc<RenderState>,
    chain: Option<SignalChain>,
    mode: RenderMode,
    tap: Option<Box<dyn OutputTap>>,
}

impl EffectsGraph {
    /// Create an unconfigured graph
    pub fn new(format: StreamFormat) -> Self {
        Self::with_params(format, Arc::new(RenderState::default()))
    }

    /// Create an unconfigured graph bound to an existing parameter block
    pub fn with_params(format: StreamFormat, params: Arc<RenderState>) -> Self {
        Self {
            format,
            params,
            chain: None,
            mode: RenderMode::Realtime,
            tap: None,
        }
    }

    /// Build every stage. Must be called exactly once before rendering.
    pub fn configure(&mut self) -> Result<()> {
        if self.chain.is_some() {
            return Err(AudioError::AlreadyConfigured);
        }
        self.format.validate()?;
        self.chain = Some(SignalChain::new(&self.format));

        info!(
            sample_rate = self.format.sample_rate,
            channels = self.format.channels,
            "effects graph configured"
        );
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.chain.is_some()
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    /// Shared parameter block (for lock-free preset changes)
    pub fn params(&self) -> Arc<RenderState> {
        self.params.clone()
    }

    /// Bind the graph to a preset. Takes effect at the next pull.
    pub fn apply_preset(&self, preset: &EffectPreset) {
        self.params.apply_preset(preset);
    }

    fn chain_mut(&mut self) -> Result<&mut SignalChain> {
        self.chain.as_mut().ok_or(AudioError::NotConfigured)
    }

    pub fn player(&self) -> Result<&PlayerNode> {
        self.chain
            .as_ref()
            .map(|c| &c.player)
            .ok_or(AudioError::NotConfigured)
    }

    pub fn player_mut(&mut self) -> Result<&mut PlayerNode> {
        Ok(&mut self.chain_mut()?.player)
    }

    /// Schedule a file on the player and clear stage state
    pub fn schedule(&mut self, file: &AudioFile) -> Result<()> {
        let chain = self.chain_mut()?;
        chain.player.schedule(file);
        chain.reset();
        Ok(())
    }

    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        if self.mode != mode {
            debug!(?mode, "render mode changed");
        }
        self.mode = mode;
    }

    /// Install a tap on the mix output, replacing any previous one
    pub fn install_tap(&mut self, tap: Box<dyn OutputTap>) {
        self.tap = Some(tap);
    }

    pub fn remove_tap(&mut self) -> Option<Box<dyn OutputTap>> {
        self.tap.take()
    }

    pub fn has_tap(&self) -> bool {
        self.tap.is_some()
    }

    /// Real-time pull: render the next buffer and show it to the tap.
    /// Outputs silence while the graph is in offline mode.
    pub fn render(&mut self, output: &mut [f32]) -> Result<()> {
        if matches!(self.mode, RenderMode::Offline { .. }) {
            output.fill(0.0);
            return Ok(());
        }

        let params = self.params.snapshot();
        let chain = self.chain_mut()?;
        chain.sync(params);
        chain.process(output);

        if let Some(tap) = self.tap.as_mut() {
            if tap.on_buffer(output) == TapControl::Remove {
                self.tap = None;
            }
        }
        Ok(())
    }

    /// Offline pull of `output.len() / 2` frames. Taps are not invoked.
    pub fn render_offline(&mut self, output: &mut [f32]) -> Result<()> {
        let max_frame_count = match self.mode {
            RenderMode::Offline { max_frame_count } => max_frame_count,
            RenderMode::Realtime => {
                return Err(AudioError::Render("graph is not in offline mode".into()))
            }
        };

        let frames = output.len() / self.format.channels as usize;
        if frames > max_frame_count {
            return Err(AudioError::Render(format!(
                "requested {} frames, maximum is {}",
                frames, max_frame_count
            )));
        }

        let params = self.params.snapshot();
        let chain = self.chain_mut()?;
        chain.sync(params);
        chain.process(output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tone(frames: usize) -> AudioFile {
        let samples: Vec<f32> = (0..frames)
            .flat_map(|i| {
                let s = (i as f32 * 0.05).sin() * 0.5;
                [s, s]
            })
            .collect();
        AudioFile::from_samples("tone.wav", samples, 44100)
    }

    fn configured() -> EffectsGraph {
        let mut graph = EffectsGraph::new(StreamFormat::default());
        graph.configure().unwrap();
        graph
    }

    #[test]
    fn test_configure_twice_rejected() {
        let mut graph = configured();
        assert!(matches!(
            graph.configure(),
            Err(AudioError::AlreadyConfigured)
        ));
    }

    #[test]
    fn test_invalid_format_rejected() {
        let mut graph = EffectsGraph::new(StreamFormat::stereo(0));
        assert!(matches!(graph.configure(), Err(AudioError::GraphSetup(_))));
        assert!(!graph.is_configured());
    }

    #[test]
    fn test_render_before_configure() {
        let mut graph = EffectsGraph::new(StreamFormat::default());
        let mut out = vec![0.0; 64];
        assert!(matches!(
            graph.render(&mut out),
            Err(AudioError::NotConfigured)
        ));
    }

    #[test]
    fn test_neutral_preset_passes_source_through() {
        let mut graph = configured();
        let file = tone(256);
        graph.schedule(&file).unwrap();
        graph.player_mut().unwrap().play();

        let mut out = vec![0.0; 512];
        graph.render(&mut out).unwrap();
        assert_eq!(&out[..], &file.samples()[..]);
    }

    #[test]
    fn test_tap_removed_after_remove() {
        let mut graph = configured();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        graph.install_tap(Box::new(move |_: &[f32]| {
            counter.fetch_add(1, Ordering::SeqCst);
            TapControl::Remove
        }));

        let mut out = vec![0.0; 64];
        graph.render(&mut out).unwrap();
        graph.render(&mut out).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!graph.has_tap());
    }

    #[test]
    fn test_offline_pull_limits() {
        let mut graph = configured();
        let mut out = vec![0.0; 64];
        assert!(graph.render_offline(&mut out).is_err());

        graph.set_mode(RenderMode::Offline { max_frame_count: 16 });
        assert!(graph.render_offline(&mut out[..32]).is_ok());
        assert!(matches!(
            graph.render_offline(&mut out),
            Err(AudioError::Render(_))
        ));
    }

    #[test]
    fn test_offline_mode_silences_realtime_pulls() {
        let mut graph = configured();
        graph.schedule(&tone(256)).unwrap();
        graph.player_mut().unwrap().play();
        graph.set_mode(RenderMode::Offline { max_frame_count: 4096 });

        let mut out = vec![1.0; 64];
        graph.render(&mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(graph.player().unwrap().position(), 0);
    }

    #[test]
    fn test_preset_picked_up_at_next_pull() {
        let mut graph = configured();
        graph.schedule(&tone(4096)).unwrap();
        graph.player_mut().unwrap().play();

        let mut out = vec![0.0; 256];
        graph.render(&mut out).unwrap();
        let before = graph.player().unwrap().position();

        graph.apply_preset(&EffectPreset::named("fast").with_rate(2.0));
        graph.render(&mut out).unwrap();
        let advanced = graph.player().unwrap().position() - before;

        // Double rate consumes twice the frames of one buffer
        assert_eq!(advanced, 256);
    }
}
