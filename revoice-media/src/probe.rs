//! Source asset provider backed by `ffprobe`
//!
//! Streams are listed in ffprobe's `flat` format, one `key=value` line per
//! field. Video streams become picture tracks and audio streams sound
//! tracks; everything else (subtitles, data) is skipped.
//!
//! Orientation comes from the legacy `rotate` tag when present, else from
//! the display matrix side data newer ffmpeg versions store instead.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::debug;

use crate::asset::{MediaAsset, MediaTrack, SourceAssetProvider, TrackKind, Transform};
use crate::error::MediaError;

/// Opens any container ffprobe understands
#[derive(Debug, Clone)]
pub struct FfprobeAssetProvider {
    program: PathBuf,
}

impl Default for FfprobeAssetProvider {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

impl FfprobeAssetProvider {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl SourceAssetProvider for FfprobeAssetProvider {
    fn open(&self, path: &Path) -> Result<MediaAsset, MediaError> {
        if !path.exists() {
            return Err(MediaError::Probe(format!("{}: file not found", path.display())));
        }

        debug!("Probing file: {}", path.display());

        let output = Command::new(&self.program)
            .args(["-v", "error", "-show_entries"])
            .arg("stream=index,codec_type,duration:stream_tags=rotate:stream_side_data=rotation")
            .args(["-of", "flat"])
            .arg(path)
            .output()
            .map_err(|e| MediaError::Probe(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MediaError::Probe(format!(
                "ffprobe exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        parse_streams(path, &String::from_utf8_lossy(&output.stdout))
    }
}

/// Fields of one `streams.stream.N` group
#[derive(Debug, Default)]
struct StreamFields {
    index: Option<usize>,
    codec_type: Option<String>,
    duration: Option<f64>,
    rotate_tag: Option<f64>,
    /// Display matrix rotation, counter-clockwise
    matrix_rotation: Option<f64>,
}

impl StreamFields {
    fn set(&mut self, key: &str, value: &str) {
        match key {
            "index" => self.index = value.parse().ok(),
            "codec_type" => self.codec_type = Some(value.to_string()),
            // "N/A" for streams without a known duration
            "duration" => {
                self.duration = value
                    .parse::<f64>()
                    .ok()
                    .filter(|d| d.is_finite() && *d >= 0.0)
            }
            "tags.rotate" => self.rotate_tag = value.parse().ok(),
            k if k.starts_with("side_data_list.") && k.ends_with(".rotation") => {
                if self.matrix_rotation.is_none() {
                    self.matrix_rotation = value.parse().ok();
                }
            }
            _ => {}
        }
    }

    /// Clockwise display rotation in degrees
    fn rotation(&self) -> Option<f64> {
        self.rotate_tag.or(self.matrix_rotation.map(|r| -r))
    }
}

/// Build an asset from ffprobe's flat stream listing
fn parse_streams(path: &Path, listing: &str) -> Result<MediaAsset, MediaError> {
    let mut streams: BTreeMap<usize, StreamFields> = BTreeMap::new();

    for line in listing.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| MediaError::Probe(format!("bad stream line: {}", line)))?;
        let Some(rest) = key.strip_prefix("streams.stream.") else {
            continue;
        };
        let Some((group, field)) = rest.split_once('.') else {
            continue;
        };
        let group: usize = group
            .parse()
            .map_err(|_| MediaError::Probe(format!("bad stream line: {}", line)))?;

        streams
            .entry(group)
            .or_default()
            .set(field, value.trim().trim_matches('"'));
    }

    let mut tracks = Vec::new();
    for (group, fields) in &streams {
        let kind = match fields.codec_type.as_deref() {
            Some("video") => TrackKind::Picture,
            Some("audio") => TrackKind::Sound,
            _ => continue,
        };
        let index = fields.index.unwrap_or(*group);
        let duration = fields
            .duration
            .map(Duration::from_secs_f64)
            .unwrap_or(Duration::ZERO);
        let transform = fields
            .rotation()
            .map(Transform::rotation)
            .unwrap_or_default();

        tracks.push(
            MediaTrack::new(index as u32, kind, duration, path)
                .with_stream_index(index)
                .with_transform(transform),
        );
    }

    if tracks.is_empty() {
        return Err(MediaError::Probe(format!(
            "{}: no audio or video streams",
            path.display()
        )));
    }

    let asset = MediaAsset::new(path, tracks);
    debug!(
        path = %path.display(),
        tracks = asset.tracks.len(),
        duration = ?asset.duration,
        "asset probed"
    );
    Ok(asset)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"streams.stream.0.index=0
streams.stream.0.codec_type="video"
streams.stream.0.duration="5.000000"
streams.stream.0.tags.rotate="90"
streams.stream.1.index=1
streams.stream.1.codec_type="audio"
streams.stream.1.duration="4.500000"
streams.stream.2.index=2
streams.stream.2.codec_type="data"
streams.stream.2.duration="N/A"
"#;

    #[test]
    fn test_parse_video_listing() {
        let asset = parse_streams(Path::new("/in/clip.mov"), LISTING).unwrap();

        assert_eq!(asset.tracks.len(), 2);
        assert_eq!(asset.duration, Duration::from_secs(5));

        let picture = &asset.tracks[0];
        assert_eq!(picture.kind, TrackKind::Picture);
        assert_eq!(picture.transform.rotation_degrees(), 90.0);

        let sound = &asset.tracks[1];
        assert_eq!(sound.kind, TrackKind::Sound);
        assert_eq!(sound.stream_index, 1);
        assert_eq!(sound.duration, Duration::from_millis(4500));
        assert!(sound.transform.is_identity());
    }

    #[test]
    fn test_rotation_from_display_matrix() {
        let listing = "streams.stream.0.index=0\n\
                       streams.stream.0.codec_type=\"video\"\n\
                       streams.stream.0.duration=\"2.000000\"\n\
                       streams.stream.0.side_data_list.side_data.0.rotation=-90\n";
        let asset = parse_streams(Path::new("phone.mp4"), listing).unwrap();
        assert_eq!(asset.tracks[0].transform.rotation_degrees(), 90.0);
    }

    #[test]
    fn test_unknown_duration_is_zero() {
        let listing = "streams.stream.0.index=0\nstreams.stream.0.codec_type=\"audio\"\n\
                       streams.stream.0.duration=\"N/A\"\n";
        let asset = parse_streams(Path::new("a.mkv"), listing).unwrap();
        assert_eq!(asset.tracks[0].duration, Duration::ZERO);
    }

    #[test]
    fn test_no_usable_streams() {
        let listing = "streams.stream.0.index=0\nstreams.stream.0.codec_type=\"subtitle\"\n";
        let result = parse_streams(Path::new("a.srt"), listing);
        assert!(matches!(result, Err(MediaError::Probe(_))));
        assert!(matches!(
            parse_streams(Path::new("x"), "garbage"),
            Err(MediaError::Probe(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = FfprobeAssetProvider::default().open(Path::new("/nonexistent/clip.mov"));
        assert!(matches!(result, Err(MediaError::Probe(_))));
    }
}
