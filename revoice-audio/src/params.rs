//! Lock-free parameter block shared between the control and render threads
//!
//! Every parameter is an independent atomic scalar. The render thread takes a
//! snapshot at each buffer boundary, so a preset applied mid-buffer takes
//! effect on the next pull.

use std::sync::atomic::{AtomicU32, Ordering};

use tracing::trace;

use crate::preset::EffectPreset;

/// f32 stored as its bit pattern in an `AtomicU32`
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Parameter ranges accepted by the stages
pub mod limits {
    pub const PITCH_CENTS_MIN: f32 = -2400.0;
    pub const PITCH_CENTS_MAX: f32 = 2400.0;
    pub const RATE_MIN: f32 = 0.25;
    pub const RATE_MAX: f32 = 4.0;
    pub const GAIN_DB_MIN: f32 = -80.0;
    pub const GAIN_DB_MAX: f32 = 20.0;
    pub const MIX_MIN: f32 = 0.0;
    pub const MIX_MAX: f32 = 100.0;
}

/// Plain copy of the live parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderParams {
    pub pitch_cents: f32,
    pub playback_rate: f32,
    pub distortion_gain_db: f32,
    pub distortion_mix: f32,
    pub reverb_mix: f32,
}

impl RenderParams {
    /// Clamp a preset into the ranges the stages accept
    pub fn from_preset(preset: &EffectPreset) -> Self {
        use limits::*;

        let rate = if preset.playback_rate.is_finite() {
            preset.playback_rate
        } else {
            1.0
        };

        Self {
            pitch_cents: preset.pitch_cents.clamp(PITCH_CENTS_MIN, PITCH_CENTS_MAX),
            playback_rate: rate.clamp(RATE_MIN, RATE_MAX),
            distortion_gain_db: preset.distortion.gain_db.clamp(GAIN_DB_MIN, GAIN_DB_MAX),
            distortion_mix: preset.distortion.wet_dry_mix.clamp(MIX_MIN, MIX_MAX),
            reverb_mix: preset.reverb_wet_dry_mix.clamp(MIX_MIN, MIX_MAX),
        }
    }
}

impl Default for RenderParams {
    fn default() -> Self {
        Self::from_preset(&EffectPreset::default())
    }
}

/// Live parameters bound to the attached preset
#[derive(Debug)]
pub struct RenderState {
    pitch_cents: AtomicF32,
    playback_rate: AtomicF32,
    distortion_gain_db: AtomicF32,
    distortion_mix: AtomicF32,
    reverb_mix: AtomicF32,
}

impl Default for RenderState {
    fn default() -> Self {
        Self::new(RenderParams::default())
    }
}

impl RenderState {
    pub fn new(params: RenderParams) -> Self {
        Self {
            pitch_cents: AtomicF32::new(params.pitch_cents),
            playback_rate: AtomicF32::new(params.playback_rate),
            distortion_gain_db: AtomicF32::new(params.distortion_gain_db),
            distortion_mix: AtomicF32::new(params.distortion_mix),
            reverb_mix: AtomicF32::new(params.reverb_mix),
        }
    }

    /// Write every parameter of the preset. Safe to call while rendering.
    pub fn apply_preset(&self, preset: &EffectPreset) {
        let params = RenderParams::from_preset(preset);
        self.pitch_cents.store(params.pitch_cents);
        self.playback_rate.store(params.playback_rate);
        self.distortion_gain_db.store(params.distortion_gain_db);
        self.distortion_mix.store(params.distortion_mix);
        self.reverb_mix.store(params.reverb_mix);

        trace!(
            preset = %preset.name,
            pitch = params.pitch_cents,
            rate = params.playback_rate,
            "preset applied"
        );
    }

    pub fn snapshot(&self) -> RenderParams {
        RenderParams {
            pitch_cents: self.pitch_cents.load(),
            playback_rate: self.playback_rate.load(),
            distortion_gain_db: self.distortion_gain_db.load(),
            distortion_mix: self.distortion_mix.load(),
            reverb_mix: self.reverb_mix.load(),
        }
    }
}
