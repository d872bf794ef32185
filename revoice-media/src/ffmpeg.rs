//! Export sessions that run the `ffmpeg` command-line tool
//!
//! Every composition track becomes one seeked input (`-ss`/`-t`) mapped by
//! its stream index. The picture is always stream-copied, with its
//! orientation carried as rotation metadata. Progress comes from
//! `-progress pipe:1` on stdout.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError};
use revoice_audio::CancelToken;
use tracing::{debug, warn};

use crate::asset::TrackKind;
use crate::composition::Composition;
use crate::error::ExportError;
use crate::export::{
    CodecPreset, ContainerFormat, ExportConfig, ExportSession, ExportSessionService, ExportStatus,
    StatusSender,
};

/// How often the cancel flag is checked while ffmpeg is quiet
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Session service backed by an `ffmpeg` binary
#[derive(Debug, Clone)]
pub struct FfmpegExportService {
    program: PathBuf,
}

impl Default for FfmpegExportService {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegExportService {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl ExportSessionService for FfmpegExportService {
    fn create_session(
        &self,
        composition: &Composition,
        output: &Path,
        config: &ExportConfig,
    ) -> Result<Box<dyn ExportSession>, ExportError> {
        let args = build_args(composition, output, config)?;
        Ok(Box::new(FfmpegSession {
            program: self.program.clone(),
            args,
            duration: composition.duration(),
        }))
    }
}

/// Muxer name passed to `-f`
fn muxer(container: ContainerFormat) -> &'static str {
    match container {
        ContainerFormat::Wav => "wav",
        ContainerFormat::Mov => "mov",
        ContainerFormat::Mp4 => "mp4",
        ContainerFormat::M4a => "ipod",
    }
}

fn sound_codec(codec: CodecPreset, container: ContainerFormat) -> &'static str {
    match (codec, container) {
        (CodecPreset::PcmFloat, _) | (CodecPreset::Passthrough, ContainerFormat::Wav) => {
            "pcm_f32le"
        }
        (CodecPreset::Aac, _) | (CodecPreset::Passthrough, _) => "aac",
    }
}

fn seconds(duration: Duration) -> String {
    format!("{:.6}", duration.as_secs_f64())
}

/// Full ffmpeg argument list for writing `composition` to `output`
fn build_args(
    composition: &Composition,
    output: &Path,
    config: &ExportConfig,
) -> Result<Vec<OsString>, ExportError> {
    if composition.is_empty() {
        return Err(ExportError::SessionCreation("composition has no tracks".into()));
    }
    if composition.has_picture() && !config.container.supports_picture() {
        return Err(ExportError::SessionCreation(format!(
            "{} cannot carry a picture track",
            config.container
        )));
    }

    let mut args: Vec<OsString> = ["-y", "-hide_banner", "-loglevel", "error", "-nostats"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push("-progress".into());
    args.push("pipe:1".into());

    for track in composition.tracks() {
        args.push("-ss".into());
        args.push(seconds(track.range.start).into());
        args.push("-t".into());
        args.push(seconds(track.range.duration).into());
        args.push("-i".into());
        args.push(track.source.source.clone().into_os_string());
    }

    for (input, track) in composition.tracks().iter().enumerate() {
        args.push("-map".into());
        args.push(format!("{}:{}", input, track.source.stream_index).into());
    }

    if let Some(picture) = composition.track(TrackKind::Picture) {
        args.push("-c:v".into());
        args.push("copy".into());
        // Stream copy keeps the source display matrix; the tag covers older muxers
        if !picture.transform.is_identity() {
            args.push("-metadata:s:v:0".into());
            args.push(format!("rotate={}", picture.transform.rotation_degrees().round()).into());
        }
    }

    if composition.track(TrackKind::Sound).is_some() {
        args.push("-c:a".into());
        args.push(sound_codec(config.codec, config.container).into());
    }

    args.push("-f".into());
    args.push(muxer(config.container).into());
    args.push(output.as_os_str().to_os_string());
    Ok(args)
}

/// Fraction done from one `-progress` line, if the line carries it
fn parse_progress(line: &str, total: Duration) -> Option<f32> {
    let (key, value) = line.trim().split_once('=')?;
    match key {
        "progress" if value == "end" => Some(1.0),
        // out_time_ms is also in microseconds
        "out_time_us" | "out_time_ms" => {
            if total.is_zero() {
                return None;
            }
            let micros: u64 = value.parse().ok()?;
            Some((micros as f64 / total.as_micros() as f64).min(1.0) as f32)
        }
        _ => None,
    }
}

struct FfmpegSession {
    program: PathBuf,
    args: Vec<OsString>,
    duration: Duration,
}

impl FfmpegSession {
    fn execute(&self, cancel: &CancelToken, status: &StatusSender) -> Result<ExportStatus, String> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!("Running FFmpeg: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("Failed to spawn FFmpeg: {}", e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Failed to capture FFmpeg stdout".to_string())?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Failed to capture FFmpeg stderr".to_string())?;

        let (line_tx, line_rx) = unbounded::<String>();
        let reader = thread::Builder::new()
            .name("revoice-ffmpeg-progress".into())
            .spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                    if line_tx.send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(|e| e.to_string())?;
        let errors = thread::Builder::new()
            .name("revoice-ffmpeg-stderr".into())
            .spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
            .map_err(|e| e.to_string())?;

        loop {
            if cancel.is_cancelled() {
                if let Err(e) = child.kill() {
                    warn!(error = %e, "failed to kill FFmpeg");
                }
                let _ = child.wait();
                let _ = reader.join();
                let _ = errors.join();
                return Ok(ExportStatus::Cancelled);
            }

            match line_rx.recv_timeout(POLL_INTERVAL) {
                Ok(line) => {
                    if let Some(fraction) = parse_progress(&line, self.duration) {
                        let _ = status.send(ExportStatus::InProgress(fraction));
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let exit = child
            .wait()
            .map_err(|e| format!("FFmpeg process error: {}", e))?;
        let _ = reader.join();
        let stderr = errors.join().unwrap_or_default();

        if exit.success() {
            Ok(ExportStatus::Completed)
        } else {
            Err(format!(
                "FFmpeg exited with code {:?}: {}",
                exit.code(),
                stderr.lines().last().unwrap_or("unknown error")
            ))
        }
    }
}

impl ExportSession for FfmpegSession {
    fn run(self: Box<Self>, cancel: CancelToken, status: StatusSender) {
        let terminal = self
            .execute(&cancel, &status)
            .unwrap_or_else(ExportStatus::Failed);
        let _ = status.send(terminal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{MediaTrack, TimeRange, Transform};
    use crate::export::AssetExporter;
    use std::sync::Arc;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn video_composition() -> Composition {
        let picture = MediaTrack::new(0, TrackKind::Picture, Duration::from_secs(5), "/in/clip.mov")
            .with_transform(Transform::rotation(90.0));
        let sound =
            MediaTrack::new(0, TrackKind::Sound, Duration::from_secs(5), "/work/filtered.wav");

        let mut composition = Composition::new();
        composition
            .apply(&picture, TrackKind::Picture, picture.time_range())
            .unwrap();
        composition
            .apply(&sound, TrackKind::Sound, sound.time_range())
            .unwrap();
        composition
    }

    #[test]
    fn test_picture_and_sound_args() {
        let config = ExportConfig::new("/out/final.mov", ContainerFormat::Mov);
        let output = Path::new("/out/.final.partial.mov");
        let args = strings(&build_args(&video_composition(), output, &config).unwrap());
        let joined = args.join(" ");

        assert!(joined.contains("-ss 0.000000 -t 5.000000 -i /in/clip.mov"));
        assert!(joined.contains("-i /work/filtered.wav"));
        assert!(joined.contains("-map 0:0 -map 1:0"));
        assert!(joined.contains("-c:v copy -metadata:s:v:0 rotate=90"));
        assert!(joined.contains("-c:a aac"));
        assert!(joined.ends_with("-f mov /out/.final.partial.mov"));
    }

    #[test]
    fn test_sound_only_wav_args() {
        let sound = MediaTrack::new(1, TrackKind::Sound, Duration::from_secs(3), "/in/clip.mp4");
        let mut composition = Composition::new();
        composition
            .apply(
                &sound,
                TrackKind::Sound,
                TimeRange::new(Duration::from_millis(500), Duration::from_secs(2)),
            )
            .unwrap();

        let config = ExportConfig::new("/work/audioTrack.wav", ContainerFormat::Wav);
        let args = strings(&build_args(&composition, Path::new("/work/a.wav"), &config).unwrap());

        assert!(args.windows(2).any(|w| w == ["-ss", "0.500000"]));
        assert!(args.windows(2).any(|w| w == ["-map", "0:1"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "pcm_f32le"]));
        assert!(!args.iter().any(|a| a == "-c:v"));
    }

    #[test]
    fn test_picture_in_wav_rejected() {
        let config = ExportConfig::new("/out/final.wav", ContainerFormat::Wav);
        let result = build_args(&video_composition(), Path::new("/out/x.wav"), &config);
        assert!(matches!(result, Err(ExportError::SessionCreation(_))));
    }

    #[test]
    fn test_empty_composition_rejected() {
        let config = ExportConfig::new("/out/final.mov", ContainerFormat::Mov);
        let result = FfmpegExportService::default().create_session(
            &Composition::new(),
            Path::new("/out/x.mov"),
            &config,
        );
        assert!(matches!(result, Err(ExportError::SessionCreation(_))));
    }

    #[test]
    fn test_parse_progress() {
        let total = Duration::from_secs(4);
        assert_eq!(parse_progress("out_time_us=1000000", total), Some(0.25));
        assert_eq!(parse_progress("out_time_ms=2000000", total), Some(0.5));
        assert_eq!(parse_progress("progress=end", total), Some(1.0));
        assert_eq!(parse_progress("progress=continue", total), None);
        assert_eq!(parse_progress("out_time_us=N/A", total), None);
        assert_eq!(parse_progress("frame=12", total), None);
        assert_eq!(parse_progress("out_time_us=100", Duration::ZERO), None);
    }

    #[test]
    fn test_missing_binary_fails_export() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig::new(dir.path().join("final.mov"), ContainerFormat::Mov);
        let service = FfmpegExportService::new("/nonexistent/ffmpeg");

        let result = AssetExporter::new(Arc::new(service)).export(
            &video_composition(),
            &config,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(ExportError::ExportFailed(_))));
        assert!(!config.destination.exists());
    }
}
