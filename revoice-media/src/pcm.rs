//! Native PCM export for sound-only compositions
//!
//! Decodes the sound track's source with the audio crate (symphonia, then
//! rubato when the rate differs), cuts the composition range out of it, and
//! writes 32-bit float stereo WAV through hound.

use std::path::{Path, PathBuf};

use revoice_audio::{AudioFile, AudioFileWriter, CancelToken, StreamFormat};
use tracing::debug;

use crate::asset::{TimeRange, TrackKind};
use crate::composition::Composition;
use crate::error::ExportError;
use crate::export::{
    CodecPreset, ContainerFormat, ExportConfig, ExportSession, ExportSessionService, ExportStatus,
    StatusSender,
};

/// Frames written between progress reports and cancel checks
const CHUNK_FRAMES: usize = 16_384;

/// Session service for WAV output of a single sound track
#[derive(Debug, Clone, Copy)]
pub struct PcmExportService {
    format: StreamFormat,
}

impl Default for PcmExportService {
    fn default() -> Self {
        Self::new(StreamFormat::default())
    }
}

impl PcmExportService {
    pub fn new(format: StreamFormat) -> Self {
        Self { format }
    }
}

impl ExportSessionService for PcmExportService {
    fn create_session(
        &self,
        composition: &Composition,
        output: &Path,
        config: &ExportConfig,
    ) -> Result<Box<dyn ExportSession>, ExportError> {
        if composition.has_picture() {
            return Err(ExportError::SessionCreation(
                "PCM export cannot carry a picture track".into(),
            ));
        }
        if config.container != ContainerFormat::Wav {
            return Err(ExportError::SessionCreation(format!(
                "PCM export writes wav, not {}",
                config.container
            )));
        }
        if config.codec == CodecPreset::Aac {
            return Err(ExportError::SessionCreation(
                "PCM export cannot encode AAC".into(),
            ));
        }
        let track = composition
            .track(TrackKind::Sound)
            .ok_or_else(|| ExportError::SessionCreation("composition has no sound track".into()))?;

        Ok(Box::new(PcmSession {
            source: track.source.source.clone(),
            range: track.range,
            output: output.to_path_buf(),
            format: self.format,
        }))
    }
}

struct PcmSession {
    source: PathBuf,
    range: TimeRange,
    output: PathBuf,
    format: StreamFormat,
}

impl PcmSession {
    fn write(&self, cancel: &CancelToken, status: &StatusSender) -> Result<ExportStatus, String> {
        let file =
            AudioFile::open(&self.source, self.format.sample_rate).map_err(|e| e.to_string())?;

        let start = self.format.frames_in(self.range.start).min(file.length());
        let end = (start + self.format.frames_in(self.range.duration)).min(file.length());
        let channels = self.format.channels as usize;
        let samples = file.samples();
        let slice = &samples[start as usize * channels..end as usize * channels];

        let mut writer =
            AudioFileWriter::create(&self.output, &self.format).map_err(|e| e.to_string())?;
        let total = slice.len().max(1);
        let mut done = 0;

        for chunk in slice.chunks(CHUNK_FRAMES * channels) {
            if cancel.is_cancelled() {
                return Ok(ExportStatus::Cancelled);
            }
            writer.write(chunk).map_err(|e| e.to_string())?;
            done += chunk.len();
            let _ = status.send(ExportStatus::InProgress(done as f32 / total as f32));
        }

        writer.finalize().map_err(|e| e.to_string())?;
        debug!(
            source = %self.source.display(),
            frames = end - start,
            "pcm export written"
        );
        Ok(ExportStatus::Completed)
    }
}

impl ExportSession for PcmSession {
    fn run(self: Box<Self>, cancel: CancelToken, status: StatusSender) {
        let terminal = match self.write(&cancel, &status) {
            Ok(terminal) => terminal,
            Err(reason) => ExportStatus::Failed(reason),
        };
        let _ = status.send(terminal);
    }
}
