//! Effect presets and the tag cache used by preset thumbnails

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// Distortion stage settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistortionSettings {
    /// Pre-gain in dB applied before the waveshaper
    pub gain_db: f32,
    /// Wet/dry mix (0 - 100)
    pub wet_dry_mix: f32,
}

impl Default for DistortionSettings {
    fn default() -> Self {
        Self {
            gain_db: -6.0,
            wet_dry_mix: 0.0,
        }
    }
}

/// Immutable bundle of graph parameters
#[derive(Debug, Clone, PartialEq)]
pub struct EffectPreset {
    pub name: String,
    /// Pitch shift in cents (100 = one semitone)
    pub pitch_cents: f32,
    /// Varispeed rate (1.0 = original speed, must be > 0)
    pub playback_rate: f32,
    pub distortion: DistortionSettings,
    /// Reverb wet/dry mix (0 - 100)
    pub reverb_wet_dry_mix: f32,
    /// Visual tag shown on the preset thumbnail
    pub tag: Option<String>,
}

impl Default for EffectPreset {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            pitch_cents: 0.0,
            playback_rate: 1.0,
            distortion: DistortionSettings::default(),
            reverb_wet_dry_mix: 0.0,
            tag: None,
        }
    }
}

impl EffectPreset {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_pitch(mut self, cents: f32) -> Self {
        self.pitch_cents = cents;
        self
    }

    pub fn with_rate(mut self, rate: f32) -> Self {
        self.playback_rate = rate;
        self
    }

    pub fn with_distortion(mut self, gain_db: f32, wet_dry_mix: f32) -> Self {
        self.distortion = DistortionSettings {
            gain_db,
            wet_dry_mix,
        };
        self
    }

    pub fn with_reverb(mut self, wet_dry_mix: f32) -> Self {
        self.reverb_wet_dry_mix = wet_dry_mix;
        self
    }

    pub fn with_tag(mut self, tag: &str) -> Self {
        self.tag = Some(tag.to_string());
        self
    }

    /// The fixed preset set offered to the user, in display order
    pub fn builtins() -> Vec<EffectPreset> {
        vec![
            Self::named("man").with_pitch(-100.0).with_rate(0.9).with_tag("👨🏻"),
            Self::named("girl").with_pitch(300.0).with_rate(1.1).with_tag("👧🏻"),
            Self::named("robot")
                .with_pitch(-600.0)
                .with_distortion(-20.0, 40.0)
                .with_tag("🤖"),
            Self::named("room").with_reverb(20.0).with_tag("🏠"),
            Self::named("hamster").with_pitch(900.0).with_tag("🐹"),
        ]
    }

    /// Look up a built-in preset by name (case-insensitive)
    pub fn builtin(name: &str) -> Option<EffectPreset> {
        Self::builtins()
            .into_iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }
}

/// Explicit, injectable cache keyed by preset tag
///
/// Thumbnail renderers own one of these instead of sharing global state.
pub struct TagCache<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for TagCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> TagCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, tag: &str) -> Option<Arc<T>> {
        self.entries.read().get(tag).cloned()
    }

    /// Return the cached value or build it. Failed builds are not cached.
    pub fn get_or_insert_with<F>(&self, tag: &str, build: F) -> Option<Arc<T>>
    where
        F: FnOnce(&str) -> Option<T>,
    {
        if let Some(value) = self.get(tag) {
            return Some(value);
        }

        let value = Arc::new(build(tag)?);
        let mut entries = self.entries.write();
        // Another thread may have raced us; keep the first entry
        Some(entries.entry(tag.to_string()).or_insert(value).clone())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_preset_is_neutral() {
        let preset = EffectPreset::default();
        assert_eq!(preset.pitch_cents, 0.0);
        assert_eq!(preset.playback_rate, 1.0);
        assert_eq!(preset.distortion.gain_db, -6.0);
        assert_eq!(preset.distortion.wet_dry_mix, 0.0);
        assert_eq!(preset.reverb_wet_dry_mix, 0.0);
    }

    #[test]
    fn test_builtins_order_and_lookup() {
        let names: Vec<_> = EffectPreset::builtins().into_iter().map(|p| p.name).collect();
        assert_eq!(names, ["man", "girl", "robot", "room", "hamster"]);

        let robot = EffectPreset::builtin("ROBOT").unwrap();
        assert_eq!(robot.pitch_cents, -600.0);
        assert_eq!(robot.distortion.gain_db, -20.0);
        assert_eq!(robot.distortion.wet_dry_mix, 40.0);

        assert!(EffectPreset::builtin("ghost").is_none());
    }

    #[test]
    fn test_tag_cache_builds_once() {
        let cache: TagCache<String> = TagCache::new();
        let mut builds = 0;

        let first = cache.get_or_insert_with("🐹", |tag| {
            builds += 1;
            Some(format!("thumb:{tag}"))
        });
        let second = cache.get_or_insert_with("🐹", |_| {
            builds += 1;
            Some("other".to_string())
        });

        assert_eq!(builds, 1);
        assert_eq!(first.unwrap().as_str(), "thumb:🐹");
        assert_eq!(second.unwrap().as_str(), "thumb:🐹");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_tag_cache_skips_failed_builds() {
        let cache: TagCache<String> = TagCache::new();
        assert!(cache.get_or_insert_with("🤖", |_| None).is_none());
        assert!(cache.is_empty());
    }
}
