//! Source assets and their tracks
//!
//! A `MediaAsset` is what a `SourceAssetProvider` hands back for a path: its
//! duration and the picture/sound tracks inside it. Tracks are read-only
//! references; nothing here decodes samples.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::MediaError;

/// Kind of media a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Picture,
    Sound,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Picture => write!(f, "picture"),
            TrackKind::Sound => write!(f, "sound"),
        }
    }
}

/// 2x3 affine orientation transform `[a b; c d; tx ty]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    pub const fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Clockwise rotation about the origin
    pub fn rotation(degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            tx: 0.0,
            ty: 0.0,
        }
    }

    /// Rotation angle in degrees, normalized to `[0, 360)`
    pub fn rotation_degrees(&self) -> f64 {
        let degrees = self.b.atan2(self.a).to_degrees().rem_euclid(360.0);
        // Snap float noise so 90.00000000001 reads as 90
        let rounded = degrees.round();
        if (degrees - rounded).abs() < 1e-6 {
            rounded.rem_euclid(360.0)
        } else {
            degrees
        }
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::identity()
    }
}

/// A span of media time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeRange {
    pub start: Duration,
    pub duration: Duration,
}

impl TimeRange {
    pub fn new(start: Duration, duration: Duration) -> Self {
        Self { start, duration }
    }

    /// `[0, duration)`
    pub fn from_zero(duration: Duration) -> Self {
        Self::new(Duration::ZERO, duration)
    }

    pub fn end(&self) -> Duration {
        self.start + self.duration
    }

    pub fn is_empty(&self) -> bool {
        self.duration.is_zero()
    }

    /// `other` lies entirely inside this range
    pub fn contains(&self, other: &TimeRange) -> bool {
        other.start >= self.start && other.end() <= self.end()
    }
}

/// Read-only reference to one stream of a source file
#[derive(Debug, Clone, PartialEq)]
pub struct MediaTrack {
    pub id: u32,
    pub kind: TrackKind,
    pub duration: Duration,
    pub transform: Transform,
    /// File the samples live in
    pub source: PathBuf,
    /// Stream index inside `source`
    pub stream_index: usize,
}

impl MediaTrack {
    pub fn new(id: u32, kind: TrackKind, duration: Duration, source: impl Into<PathBuf>) -> Self {
        Self {
            id,
            kind,
            duration,
            transform: Transform::identity(),
            source: source.into(),
            stream_index: id as usize,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_stream_index(mut self, stream_index: usize) -> Self {
        self.stream_index = stream_index;
        self
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::from_zero(self.duration)
    }
}

/// A readable media file and its tracks
#[derive(Debug, Clone, PartialEq)]
pub struct MediaAsset {
    pub path: PathBuf,
    pub duration: Duration,
    pub tracks: Vec<MediaTrack>,
}

impl MediaAsset {
    /// Asset whose duration is its longest track
    pub fn new(path: impl Into<PathBuf>, tracks: Vec<MediaTrack>) -> Self {
        let duration = tracks
            .iter()
            .map(|t| t.duration)
            .max()
            .unwrap_or(Duration::ZERO);
        Self {
            path: path.into(),
            duration,
            tracks,
        }
    }

    pub fn time_range(&self) -> TimeRange {
        TimeRange::from_zero(self.duration)
    }

    /// Probe an audio file with symphonia and describe it as a single
    /// sound track asset
    pub fn probe_audio(path: impl AsRef<Path>) -> Result<Self, MediaError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| MediaError::Probe(format!("{}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| MediaError::Probe(format!("{}: {}", path.display(), e)))?;

        let (index, track) = probed
            .format
            .tracks()
            .iter()
            .enumerate()
            .find(|(_, t)| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| MediaError::Probe(format!("{}: no audio track", path.display())))?;

        let params = &track.codec_params;
        let duration = match (params.n_frames, params.sample_rate) {
            (Some(frames), Some(rate)) if rate > 0 => {
                Duration::from_secs_f64(frames as f64 / rate as f64)
            }
            _ => {
                return Err(MediaError::Probe(format!(
                    "{}: unknown duration",
                    path.display()
                )))
            }
        };

        debug!(path = %path.display(), ?duration, "audio asset probed");

        let track = MediaTrack::new(track.id, TrackKind::Sound, duration, path)
            .with_stream_index(index);
        Ok(Self::new(path, vec![track]))
    }
}

/// Opens a path as a `MediaAsset`
pub trait SourceAssetProvider: Send + Sync {
    fn open(&self, path: &Path) -> Result<MediaAsset, MediaError>;
}

/// Audio-only provider backed by symphonia
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioAssetProvider;

impl SourceAssetProvider for AudioAssetProvider {
    fn open(&self, path: &Path) -> Result<MediaAsset, MediaError> {
        MediaAsset::probe_audio(path)
    }
}

/// Looks up tracks of an asset
pub trait AssetTrackService: Send + Sync {
    /// First track of `kind`, in stream order
    fn first_track(&self, asset: &MediaAsset, kind: TrackKind) -> Result<MediaTrack, MediaError> {
        asset
            .tracks
            .iter()
            .find(|t| t.kind == kind)
            .cloned()
            .ok_or(MediaError::TrackTypeNotFound(kind))
    }
}

/// Scans `asset.tracks` in order
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTrackService;

impl AssetTrackService for DefaultTrackService {}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_asset() -> MediaAsset {
        MediaAsset::new(
            "/videos/clip.mov",
            vec![
                MediaTrack::new(0, TrackKind::Picture, Duration::from_secs(5), "/videos/clip.mov")
                    .with_transform(Transform::rotation(90.0)),
                MediaTrack::new(
                    1,
                    TrackKind::Sound,
                    Duration::from_millis(4990),
                    "/videos/clip.mov",
                ),
            ],
        )
    }

    #[test]
    fn test_asset_duration_is_longest_track() {
        assert_eq!(video_asset().duration, Duration::from_secs(5));
        assert_eq!(MediaAsset::new("empty", vec![]).duration, Duration::ZERO);
    }

    #[test]
    fn test_first_track_by_kind() {
        let asset = video_asset();
        let service = DefaultTrackService;

        let picture = service.first_track(&asset, TrackKind::Picture).unwrap();
        assert_eq!(picture.id, 0);
        let sound = service.first_track(&asset, TrackKind::Sound).unwrap();
        assert_eq!(sound.id, 1);
    }

    #[test]
    fn test_first_track_missing_kind() {
        let asset = MediaAsset::new(
            "a.wav",
            vec![MediaTrack::new(0, TrackKind::Sound, Duration::from_secs(1), "a.wav")],
        );
        let result = DefaultTrackService.first_track(&asset, TrackKind::Picture);
        assert!(matches!(
            result,
            Err(MediaError::TrackTypeNotFound(TrackKind::Picture))
        ));
    }

    #[test]
    fn test_rotation_roundtrip() {
        assert_eq!(Transform::rotation(90.0).rotation_degrees(), 90.0);
        assert_eq!(Transform::rotation(-90.0).rotation_degrees(), 270.0);
        assert_eq!(Transform::identity().rotation_degrees(), 0.0);
        assert!(Transform::default().is_identity());
    }

    #[test]
    fn test_time_range_contains() {
        let outer = TimeRange::from_zero(Duration::from_secs(5));
        assert!(outer.contains(&TimeRange::new(Duration::from_secs(1), Duration::from_secs(4))));
        assert!(!outer.contains(&TimeRange::new(Duration::from_secs(1), Duration::from_secs(5))));
        assert!(TimeRange::default().is_empty());
    }

    #[test]
    fn test_probe_audio_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..44100 * 2 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let asset = AudioAssetProvider.open(&path).unwrap();
        assert_eq!(asset.tracks.len(), 1);
        assert_eq!(asset.tracks[0].kind, TrackKind::Sound);
        assert_eq!(asset.duration, Duration::from_secs(1));
        assert_eq!(asset.tracks[0].source, path);
    }

    #[test]
    fn test_probe_missing_file() {
        let result = MediaAsset::probe_audio("/nonexistent/revoice.wav");
        assert!(matches!(result, Err(MediaError::Probe(_))));
    }
}
