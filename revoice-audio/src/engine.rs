//! Audio engine - owns the graph and drives it from an output driver
//!
//! The graph core sits behind a `parking_lot::Mutex`. The driver callback
//! only ever `try_lock`s it and writes silence on contention, so control
//! calls (play, stop, offline render) never stall the real-time thread.
//! Preset changes bypass the lock entirely through the shared `RenderState`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio_file::AudioFile;
use crate::cancel::CancelToken;
use crate::capture::{CaptureJob, CaptureSession, CaptureSink, CompletionFn, Outcome};
use crate::driver::{OutputDriver, RenderCallback};
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;
use crate::graph::{EffectsGraph, RenderMode};
use crate::offline::OfflineRenderer;
use crate::params::RenderState;
use crate::player::PlaybackState;
use crate::preset::EffectPreset;

/// Where and how to record the mix while playing
pub struct RecordingConfig {
    pub destination: PathBuf,
    pub completion: CompletionFn,
    pub cancel: CancelToken,
}

impl RecordingConfig {
    pub fn new(destination: impl Into<PathBuf>, completion: CompletionFn) -> Self {
        Self {
            destination: destination.into(),
            completion,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// State shared with the driver callback
struct EngineCore {
    graph: EffectsGraph,
    session: Option<Arc<Mutex<CaptureSession>>>,
}

/// Plays a file through the effects graph, optionally recording the mix
pub struct AudioEngine {
    core: Arc<Mutex<EngineCore>>,
    params: Arc<RenderState>,
    driver: Box<dyn OutputDriver>,
    format: StreamFormat,
}

impl AudioEngine {
    /// Configure a graph in `format` and bind it to `driver`
    pub fn new(format: StreamFormat, driver: Box<dyn OutputDriver>) -> Result<Self> {
        let mut graph = EffectsGraph::new(format);
        graph.configure()?;
        let params = graph.params();

        Ok(Self {
            core: Arc::new(Mutex::new(EngineCore {
                graph,
                session: None,
            })),
            params,
            driver,
            format,
        })
    }

    pub fn format(&self) -> &StreamFormat {
        &self.format
    }

    /// Lock-free; picked up at the next buffer
    pub fn apply_preset(&self, preset: &EffectPreset) {
        self.params.apply_preset(preset);
    }

    /// Play `source` from the start. With `recording`, the mix is captured
    /// to its destination until the source length is reached.
    ///
    /// The destination is opened before anything plays, so an unwritable
    /// path fails here and the completion is never called.
    pub fn play(&mut self, source: &Path, recording: Option<RecordingConfig>) -> Result<()> {
        let file = AudioFile::open(source, self.format.sample_rate)?;

        let capture = match recording {
            Some(rec) => {
                let job = CaptureJob::for_source(&file, rec.destination);
                Some(CaptureSink::new(job, &self.format, rec.completion, rec.cancel)?)
            }
            None => None,
        };

        {
            let mut core = self.core.lock();
            if let Some(previous) = core.session.take() {
                cancel_session(&previous);
            }

            core.graph.set_mode(RenderMode::Realtime);
            core.graph.schedule(&file)?;
            match capture {
                Some((sink, session)) => {
                    core.graph.install_tap(Box::new(sink));
                    core.session = Some(session);
                }
                None => {
                    core.graph.remove_tap();
                }
            }
            core.graph.player_mut()?.play();
        }

        if !self.driver.is_running() {
            self.driver.start(&self.format, self.render_callback())?;
        }

        info!(
            source = %source.display(),
            frames = file.length(),
            recording = self.is_recording(),
            "playback started"
        );
        Ok(())
    }

    fn render_callback(&self) -> RenderCallback {
        let core = self.core.clone();
        Box::new(move |output: &mut [f32]| {
            // On contention output silence rather than blocking
            match core.try_lock() {
                Some(mut core) => {
                    if core.graph.render(output).is_err() {
                        output.fill(0.0);
                    }
                }
                None => output.fill(0.0),
            }
        })
    }

    /// Stop real-time playback and render the rest of the recording offline.
    ///
    /// Blocks until the file is finalized. The recording's completion is
    /// delivered exactly once, here or by the sink if it finished first.
    pub fn render_offline(&mut self, cancel: &CancelToken) -> Result<PathBuf> {
        self.driver.stop();

        let mut core = self.core.lock();
        let session = core.session.take().ok_or(AudioError::NoActiveSession)?;
        core.graph.remove_tap();

        let mut session = session.lock();
        debug!(
            written = session.written_frames(),
            remaining = session.remaining_frames(),
            "switching to offline render"
        );

        let renderer = OfflineRenderer::new(self.format.max_frame_count);
        renderer.render(&mut core.graph, &mut session, cancel)
    }

    /// Stop playback. A recording still in progress completes as cancelled.
    pub fn stop(&mut self) {
        self.driver.stop();

        let mut core = self.core.lock();
        core.graph.remove_tap();
        if let Ok(player) = core.graph.player_mut() {
            player.stop();
        }
        if let Some(session) = core.session.take() {
            cancel_session(&session);
        }
    }

    /// A recording is attached and has not completed
    pub fn is_recording(&self) -> bool {
        let core = self.core.lock();
        core.session
            .as_ref()
            .is_some_and(|s| !s.lock().is_finished())
    }

    pub fn playback_state(&self) -> PlaybackState {
        let core = self.core.lock();
        core.graph
            .player()
            .map(|p| p.state())
            .unwrap_or_default()
    }

    /// Frames consumed from the source so far
    pub fn position(&self) -> u64 {
        let core = self.core.lock();
        core.graph.player().map(|p| p.position()).unwrap_or(0)
    }
}

/// Complete a pending session as cancelled, if nobody has yet
fn cancel_session(session: &Mutex<CaptureSession>) {
    let finish = session.lock().finish(Outcome::Cancelled);
    if let Some(finish) = finish {
        warn!("recording stopped before completion");
        let _ = finish.run();
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
