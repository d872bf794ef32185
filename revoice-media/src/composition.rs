//! Composition builder
//!
//! A composition holds at most one track per kind. Every track is inserted
//! at time zero, so a composition track spans `[0, range.duration)` and the
//! composition lasts as long as its longest track.

use std::time::Duration;

use tracing::debug;

use crate::asset::{
    AssetTrackService, DefaultTrackService, MediaAsset, MediaTrack, TimeRange, TrackKind,
    Transform,
};
use crate::error::MediaError;

/// One track of a composition: a range of a source track placed at zero
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionTrack {
    pub kind: TrackKind,
    pub source: MediaTrack,
    /// Range taken from `source`
    pub range: TimeRange,
    pub transform: Transform,
}

impl CompositionTrack {
    pub fn duration(&self) -> Duration {
        self.range.duration
    }
}

/// Ordered collection of at most one track per kind
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composition {
    tracks: Vec<CompositionTrack>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `kind` track holding `range` of `track` at time zero.
    ///
    /// The orientation transform is copied from the source track.
    pub fn apply(
        &mut self,
        track: &MediaTrack,
        kind: TrackKind,
        range: TimeRange,
    ) -> Result<&CompositionTrack, MediaError> {
        if track.kind != kind {
            return Err(MediaError::TrackInsertion(format!(
                "track {} is {}, expected {}",
                track.id, track.kind, kind
            )));
        }
        if self.track(kind).is_some() {
            return Err(MediaError::TrackInsertion(format!(
                "composition already has a {} track",
                kind
            )));
        }
        if range.is_empty() {
            return Err(MediaError::TrackInsertion("empty time range".into()));
        }
        if !track.time_range().contains(&range) {
            return Err(MediaError::TrackInsertion(format!(
                "range {:?}..{:?} exceeds track duration {:?}",
                range.start,
                range.end(),
                track.duration
            )));
        }

        debug!(%kind, source = %track.source.display(), ?range, "track inserted");

        self.tracks.push(CompositionTrack {
            kind,
            source: track.clone(),
            range,
            transform: track.transform,
        });
        let index = self.tracks.len() - 1;
        Ok(&self.tracks[index])
    }

    /// First sound track of `asset` over the asset range
    pub fn audio_only(asset: &MediaAsset) -> Result<Self, MediaError> {
        Self::audio_only_with(asset, &DefaultTrackService)
    }

    pub fn audio_only_with(
        asset: &MediaAsset,
        tracks: &dyn AssetTrackService,
    ) -> Result<Self, MediaError> {
        let mut composition = Self::new();
        composition.insert_first(asset, tracks, TrackKind::Sound)?;
        Ok(composition)
    }

    /// First picture track of `asset` over the asset range
    pub fn video_only(asset: &MediaAsset) -> Result<Self, MediaError> {
        Self::video_only_with(asset, &DefaultTrackService)
    }

    pub fn video_only_with(
        asset: &MediaAsset,
        tracks: &dyn AssetTrackService,
    ) -> Result<Self, MediaError> {
        let mut composition = Self::new();
        composition.insert_first(asset, tracks, TrackKind::Picture)?;
        Ok(composition)
    }

    /// Insert the first `kind` track of `asset`, covering the asset range
    /// clipped to the track's own length
    pub fn insert_first(
        &mut self,
        asset: &MediaAsset,
        tracks: &dyn AssetTrackService,
        kind: TrackKind,
    ) -> Result<&CompositionTrack, MediaError> {
        let track = tracks.first_track(asset, kind)?;
        let range = TimeRange::from_zero(asset.duration.min(track.duration));
        self.apply(&track, kind, range)
    }

    pub fn tracks(&self) -> &[CompositionTrack] {
        &self.tracks
    }

    pub fn track(&self, kind: TrackKind) -> Option<&CompositionTrack> {
        self.tracks.iter().find(|t| t.kind == kind)
    }

    pub fn has_picture(&self) -> bool {
        self.track(TrackKind::Picture).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Longest track duration
    pub fn duration(&self) -> Duration {
        self.tracks
            .iter()
            .map(|t| t.duration())
            .max()
            .unwrap_or(Duration::ZERO)
    }
}
