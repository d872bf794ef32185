//! Export orchestrator
//!
//! One `AssetExporter::start` call is one export job. The job removes any
//! stale file at the destination, asks the session service for a session,
//! and runs it on a worker thread. The session writes to a staging path
//! next to the destination; only a `Completed` status moves it into place.
//!
//! Job state: `Idle → Exporting → {Completed | Cancelled | Failed}`. Terminal
//! states are final.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use revoice_audio::{AtomicF32, CancelToken};
use tracing::{debug, info, warn};

use crate::composition::Composition;
use crate::error::ExportError;

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContainerFormat {
    Wav,
    #[default]
    Mov,
    Mp4,
    M4a,
}

impl ContainerFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ContainerFormat::Wav => "wav",
            ContainerFormat::Mov => "mov",
            ContainerFormat::Mp4 => "mp4",
            ContainerFormat::M4a => "m4a",
        }
    }

    /// Whether the container can carry a picture track
    pub fn supports_picture(&self) -> bool {
        matches!(self, ContainerFormat::Mov | ContainerFormat::Mp4)
    }
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ContainerFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wav" => Ok(ContainerFormat::Wav),
            "mov" => Ok(ContainerFormat::Mov),
            "mp4" => Ok(ContainerFormat::Mp4),
            "m4a" => Ok(ContainerFormat::M4a),
            other => Err(format!("unknown container: {}", other)),
        }
    }
}

/// How track samples are carried into the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodecPreset {
    /// Copy the picture as is; sound takes the container's native codec
    #[default]
    Passthrough,
    /// 32-bit float PCM sound
    PcmFloat,
    /// AAC sound
    Aac,
}

/// Status reported by a running session
#[derive(Debug, Clone, PartialEq)]
pub enum ExportStatus {
    /// Fraction done, `0.0..=1.0`
    InProgress(f32),
    Completed,
    Cancelled,
    Failed(String),
}

impl ExportStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExportStatus::InProgress(_))
    }
}

pub type StatusSender = Sender<ExportStatus>;

/// Destination and encoding of one export job
#[derive(Debug, Clone, PartialEq)]
pub struct ExportConfig {
    pub destination: PathBuf,
    pub container: ContainerFormat,
    pub codec: CodecPreset,
}

impl ExportConfig {
    pub fn new(destination: impl Into<PathBuf>, container: ContainerFormat) -> Self {
        Self {
            destination: destination.into(),
            container,
            codec: CodecPreset::default(),
        }
    }

    pub fn with_codec(mut self, codec: CodecPreset) -> Self {
        self.codec = codec;
        self
    }

    /// Where the session writes before the result is moved into place
    pub fn staging_path(&self) -> PathBuf {
        let stem = self
            .destination
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("export");
        self.destination
            .with_file_name(format!(".{}.partial.{}", stem, self.container.extension()))
    }
}

/// A prepared export that writes one composition to one file
pub trait ExportSession: Send {
    /// Write the output, reporting progress and exactly one terminal status
    /// on `status`. Should stop early and report `Cancelled` once `cancel`
    /// is set.
    fn run(self: Box<Self>, cancel: CancelToken, status: StatusSender);
}

/// Creates export sessions
pub trait ExportSessionService: Send + Sync {
    /// Prepare a session that writes `composition` to `output`
    fn create_session(
        &self,
        composition: &Composition,
        output: &Path,
        config: &ExportConfig,
    ) -> Result<Box<dyn ExportSession>, ExportError>;
}

/// Lifecycle of an export job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportState {
    #[default]
    Idle,
    Exporting,
    Completed,
    Cancelled,
    Failed,
}

impl ExportState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExportState::Completed | ExportState::Cancelled | ExportState::Failed
        )
    }

    /// Move to `next` unless already terminal
    fn advance(&mut self, next: ExportState) {
        if !self.is_terminal() {
            *self = next;
        }
    }
}

/// A running export job
pub struct ExportHandle {
    destination: PathBuf,
    state: Arc<Mutex<ExportState>>,
    progress: Arc<AtomicF32>,
    cancel: CancelToken,
    result: Receiver<Result<PathBuf, ExportError>>,
    worker: Option<JoinHandle<()>>,
}

impl ExportHandle {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Ask the session to stop; the job ends as `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn state(&self) -> ExportState {
        *self.state.lock()
    }

    /// Last reported fraction done
    pub fn progress(&self) -> f32 {
        self.progress.load()
    }

    /// Block until the job reaches a terminal state
    pub fn wait(mut self) -> Result<PathBuf, ExportError> {
        let result = self.result.recv().unwrap_or_else(|_| {
            Err(ExportError::ExportFailed("export worker exited".into()))
        });
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        result
    }
}

impl Drop for ExportHandle {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.cancel.cancel();
            let _ = worker.join();
        }
    }
}

/// Runs export jobs against a session service
#[derive(Clone)]
pub struct AssetExporter {
    service: Arc<dyn ExportSessionService>,
}

impl AssetExporter {
    pub fn new(service: Arc<dyn ExportSessionService>) -> Self {
        Self { service }
    }

    /// Export and block until the job is done
    pub fn export(
        &self,
        composition: &Composition,
        config: &ExportConfig,
        cancel: &CancelToken,
    ) -> Result<PathBuf, ExportError> {
        self.start(composition, config, cancel.clone())?.wait()
    }

    /// Start an export job.
    ///
    /// Cleanup and session creation happen before this returns; a failure
    /// in either means no session ever runs.
    pub fn start(
        &self,
        composition: &Composition,
        config: &ExportConfig,
        cancel: CancelToken,
    ) -> Result<ExportHandle, ExportError> {
        let state = Arc::new(Mutex::new(ExportState::Idle));

        remove_stale(&config.destination)?;
        let staging = config.staging_path();
        remove_stale(&staging)?;

        let session = self.service.create_session(composition, &staging, config)?;
        state.lock().advance(ExportState::Exporting);

        info!(
            destination = %config.destination.display(),
            container = %config.container,
            codec = ?config.codec,
            "export started"
        );

        let progress = Arc::new(AtomicF32::new(0.0));
        let (result_tx, result_rx) = bounded(1);
        let job = Job {
            staging,
            destination: config.destination.clone(),
            state: state.clone(),
            progress: progress.clone(),
        };

        let worker_cancel = cancel.clone();
        let worker = thread::Builder::new()
            .name("revoice-export".into())
            .spawn(move || {
                let result = job.run(session, worker_cancel);
                let _ = result_tx.send(result);
            })
            .map_err(|e| {
                ExportError::ExportFailed(format!("failed to spawn export worker: {}", e))
            })?;

        Ok(ExportHandle {
            destination: config.destination.clone(),
            state,
            progress,
            cancel,
            result: result_rx,
            worker: Some(worker),
        })
    }
}

/// Worker-side state of one job
struct Job {
    staging: PathBuf,
    destination: PathBuf,
    state: Arc<Mutex<ExportState>>,
    progress: Arc<AtomicF32>,
}

impl Job {
    fn run(
        self,
        session: Box<dyn ExportSession>,
        cancel: CancelToken,
    ) -> Result<PathBuf, ExportError> {
        let (status_tx, status_rx) = unbounded();

        let runner = thread::Builder::new()
            .name("revoice-export-session".into())
            .spawn(move || session.run(cancel, status_tx));

        let terminal = match runner {
            Ok(runner) => {
                let terminal = self.drain(&status_rx);
                if runner.join().is_err() {
                    warn!("export session panicked");
                }
                terminal
            }
            Err(e) => Some(ExportStatus::Failed(format!("failed to spawn session: {}", e))),
        };

        let result = self.conclude(terminal);
        let next = match &result {
            Ok(_) => ExportState::Completed,
            Err(ExportError::Cancelled) => ExportState::Cancelled,
            Err(_) => ExportState::Failed,
        };
        self.state.lock().advance(next);
        result
    }

    /// Consume statuses up to the first terminal one
    fn drain(&self, status: &Receiver<ExportStatus>) -> Option<ExportStatus> {
        for update in status.iter() {
            if update.is_terminal() {
                return Some(update);
            }
            if let ExportStatus::InProgress(fraction) = update {
                debug!(progress = fraction, "export progress");
                self.progress.store(fraction.clamp(0.0, 1.0));
            }
        }
        None
    }

    fn conclude(&self, terminal: Option<ExportStatus>) -> Result<PathBuf, ExportError> {
        match terminal {
            Some(ExportStatus::Completed) => {
                fs::rename(&self.staging, &self.destination).map_err(|source| {
                    discard(&self.staging);
                    ExportError::Io {
                        path: self.destination.clone(),
                        source,
                    }
                })?;
                self.progress.store(1.0);
                info!(destination = %self.destination.display(), "export completed");
                Ok(self.destination.clone())
            }
            Some(ExportStatus::Cancelled) => {
                discard(&self.staging);
                warn!(destination = %self.destination.display(), "export cancelled");
                Err(ExportError::Cancelled)
            }
            Some(ExportStatus::Failed(reason)) => {
                discard(&self.staging);
                warn!(destination = %self.destination.display(), %reason, "export failed");
                Err(ExportError::ExportFailed(reason))
            }
            Some(ExportStatus::InProgress(_)) | None => {
                discard(&self.staging);
                warn!("export session ended without a result");
                Err(ExportError::ExportFailed(
                    "session ended without reporting a result".into(),
                ))
            }
        }
    }
}

/// Delete a file left from an earlier run; a missing file is fine
fn remove_stale(path: &Path) -> Result<(), ExportError> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed stale file");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(ExportError::Cleanup {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove staging file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::{MediaTrack, TrackKind};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Writes a marker file and then reports the scripted statuses
    struct ScriptedSession {
        output: PathBuf,
        script: Vec<ExportStatus>,
        wait_for_cancel: bool,
    }

    impl ExportSession for ScriptedSession {
        fn run(self: Box<Self>, cancel: CancelToken, status: StatusSender) {
            fs::write(&self.output, b"partial").unwrap();
            if self.wait_for_cancel {
                let _ = status.send(ExportStatus::InProgress(0.25));
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(1));
                }
                let _ = status.send(ExportStatus::Cancelled);
                return;
            }
            for update in self.script {
                let _ = status.send(update);
            }
        }
    }

    struct ScriptedService {
        script: Vec<ExportStatus>,
        wait_for_cancel: bool,
        created: AtomicUsize,
        /// Destination or staging file already present at session creation
        saw_leftovers: AtomicBool,
    }

    impl ScriptedService {
        fn new(script: Vec<ExportStatus>) -> Arc<Self> {
            Arc::new(Self {
                script,
                wait_for_cancel: false,
                created: AtomicUsize::new(0),
                saw_leftovers: AtomicBool::new(false),
            })
        }
    }

    impl ExportSessionService for ScriptedService {
        fn create_session(
            &self,
            _composition: &Composition,
            output: &Path,
            config: &ExportConfig,
        ) -> Result<Box<dyn ExportSession>, ExportError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            if config.destination.exists() || output.exists() {
                self.saw_leftovers.store(true, Ordering::SeqCst);
            }
            Ok(Box::new(ScriptedSession {
                output: output.to_path_buf(),
                script: self.script.clone(),
                wait_for_cancel: self.wait_for_cancel,
            }))
        }
    }

    fn composition() -> Composition {
        let track = MediaTrack::new(0, TrackKind::Sound, Duration::from_secs(1), "a.wav");
        let mut composition = Composition::new();
        composition
            .apply(&track, TrackKind::Sound, track.time_range())
            .unwrap();
        composition
    }

    #[test]
    fn test_completed_moves_staging_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig::new(dir.path().join("out.wav"), ContainerFormat::Wav);
        let service = ScriptedService::new(vec![
            ExportStatus::InProgress(0.5),
            ExportStatus::Completed,
        ]);

        let exporter = AssetExporter::new(service);
        let path = exporter
            .export(&composition(), &config, &CancelToken::new())
            .unwrap();

        assert_eq!(path, config.destination);
        assert_eq!(fs::read(&path).unwrap(), b"partial");
        assert!(!config.staging_path().exists());
    }

    #[test]
    fn test_failed_status_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig::new(dir.path().join("out.mov"), ContainerFormat::Mov);
        let service = ScriptedService::new(vec![ExportStatus::Failed("encoder error".into())]);

        let handle = AssetExporter::new(service)
            .start(&composition(), &config, CancelToken::new())
            .unwrap();
        let result = handle.wait();

        assert!(matches!(result, Err(ExportError::ExportFailed(ref r)) if r == "encoder error"));
        assert!(!config.destination.exists());
        assert!(!config.staging_path().exists());
    }

    #[test]
    fn test_closed_channel_is_export_failed() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig::new(dir.path().join("out.wav"), ContainerFormat::Wav);
        let service = ScriptedService::new(vec![ExportStatus::InProgress(0.2)]);

        let result =
            AssetExporter::new(service).export(&composition(), &config, &CancelToken::new());
        assert!(matches!(result, Err(ExportError::ExportFailed(_))));
        assert!(!config.staging_path().exists());
    }

    #[test]
    fn test_cancel_reaches_terminal_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig::new(dir.path().join("out.wav"), ContainerFormat::Wav);
        let service = Arc::new(ScriptedService {
            script: Vec::new(),
            wait_for_cancel: true,
            created: AtomicUsize::new(0),
            saw_leftovers: AtomicBool::new(false),
        });

        let handle = AssetExporter::new(service)
            .start(&composition(), &config, CancelToken::new())
            .unwrap();
        assert_eq!(handle.state(), ExportState::Exporting);

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.progress() < 0.25 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(handle.progress(), 0.25);

        handle.cancel();
        let state = handle.state.clone();
        assert!(matches!(handle.wait(), Err(ExportError::Cancelled)));
        assert_eq!(*state.lock(), ExportState::Cancelled);
        assert!(!config.destination.exists());
        assert!(!config.staging_path().exists());
    }

    #[test]
    fn test_stale_destination_removed_before_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig::new(dir.path().join("out.wav"), ContainerFormat::Wav);
        fs::write(&config.destination, b"stale").unwrap();
        fs::write(config.staging_path(), b"stale staging").unwrap();

        let service = ScriptedService::new(vec![ExportStatus::Completed]);
        let path = AssetExporter::new(service.clone())
            .export(&composition(), &config, &CancelToken::new())
            .unwrap();

        assert_eq!(fs::read(path).unwrap(), b"partial");
        assert_eq!(service.created.load(Ordering::SeqCst), 1);
        assert!(!service.saw_leftovers.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cleanup_failure_creates_no_session() {
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory at the destination cannot be removed as a file
        let destination = dir.path().join("out.wav");
        fs::create_dir(&destination).unwrap();
        fs::write(destination.join("keep"), b"x").unwrap();
        let config = ExportConfig::new(&destination, ContainerFormat::Wav);

        let service = ScriptedService::new(vec![ExportStatus::Completed]);
        let exporter = AssetExporter::new(service.clone());
        let result = exporter.start(&composition(), &config, CancelToken::new());

        assert!(matches!(result, Err(ExportError::Cleanup { .. })));
        assert_eq!(service.created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_terminal_state_is_final() {
        let mut state = ExportState::Idle;
        state.advance(ExportState::Exporting);
        state.advance(ExportState::Failed);
        state.advance(ExportState::Completed);
        assert_eq!(state, ExportState::Failed);
    }

    #[test]
    fn test_container_parse_and_staging_path() {
        assert_eq!("MP4".parse::<ContainerFormat>(), Ok(ContainerFormat::Mp4));
        assert!("avi".parse::<ContainerFormat>().is_err());
        assert!(!ContainerFormat::Wav.supports_picture());

        let config = ExportConfig::new("/work/encodedVideo.mov", ContainerFormat::Mov);
        assert_eq!(
            config.staging_path(),
            PathBuf::from("/work/.encodedVideo.partial.mov")
        );
    }
}
