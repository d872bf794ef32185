//! Offline renderer - pulls the graph as fast as it will go
//!
//! Used instead of the real-time sink when a deterministic, faster than
//! real-time capture is wanted. The graph is switched to offline mode, which
//! also silences any real-time pulls, and the session is filled in chunks of
//! at most `max_frame_count` frames.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use crate::audio_file::AudioFile;
use crate::cancel::CancelToken;
use crate::capture::{CaptureJob, CaptureSession, Outcome};
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;
use crate::graph::{EffectsGraph, RenderMode};
use crate::preset::EffectPreset;

/// Chunked offline renderer
#[derive(Debug, Clone, Copy)]
pub struct OfflineRenderer {
    max_frame_count: usize,
}

impl Default for OfflineRenderer {
    fn default() -> Self {
        Self::new(crate::format::DEFAULT_MAX_FRAME_COUNT)
    }
}

impl OfflineRenderer {
    pub fn new(max_frame_count: usize) -> Self {
        Self {
            max_frame_count: max_frame_count.max(1),
        }
    }

    pub fn max_frame_count(&self) -> usize {
        self.max_frame_count
    }

    /// Render the rest of `session` from `graph` and deliver its completion.
    ///
    /// A file must already be scheduled on the graph's player, though it
    /// may be empty. Errors are terminal: the loop stops, the partial file
    /// is removed and the completion receives the same error returned here.
    pub fn render(
        &self,
        graph: &mut EffectsGraph,
        session: &mut CaptureSession,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        if session.is_finished() || !graph.player()?.is_loaded() {
            return Err(AudioError::NoActiveSession);
        }

        graph.set_mode(RenderMode::Offline {
            max_frame_count: self.max_frame_count,
        });
        graph.player_mut()?.play();

        debug!(
            remaining = session.remaining_frames(),
            max_frame_count = self.max_frame_count,
            "offline render started"
        );

        let channels = graph.format().channels as usize;
        let mut buffer = vec![0.0f32; self.max_frame_count * channels];

        let outcome = loop {
            if cancel.is_cancelled() {
                break Outcome::Cancelled;
            }

            let remaining = session.remaining_frames();
            if remaining == 0 {
                break Outcome::Complete;
            }

            let frames = remaining.min(self.max_frame_count as u64) as usize;
            let chunk = &mut buffer[..frames * channels];

            if let Err(e) = graph.render_offline(chunk) {
                break Outcome::Failed(e);
            }
            if let Err(e) = session.write(chunk) {
                break Outcome::Failed(e);
            }
        };

        graph.player_mut()?.stop();

        let finish = session.finish(outcome).ok_or(AudioError::NoActiveSession)?;
        finish.run()
    }
}

/// Render `source` through a fresh graph with `preset` into `destination`.
///
/// Same source, preset and format always give the same output samples.
#[instrument(skip(preset, format, cancel), fields(preset = %preset.name))]
pub fn render_file(
    source: &Path,
    destination: &Path,
    preset: &EffectPreset,
    format: StreamFormat,
    cancel: &CancelToken,
) -> Result<PathBuf> {
    let file = AudioFile::open(source, format.sample_rate)?;

    let mut graph = EffectsGraph::new(format);
    graph.configure()?;
    graph.apply_preset(preset);
    graph.schedule(&file)?;

    let job = CaptureJob::for_source(&file, destination);
    let mut session = CaptureSession::open(job, &format, Box::new(|_: Result<PathBuf>| {}))?;

    let renderer = OfflineRenderer::new(format.max_frame_count);
    let path = renderer.render(&mut graph, &mut session, cancel)?;
    info!(path = %path.display(), frames = file.length(), "offline render finished");
    Ok(path)
}
