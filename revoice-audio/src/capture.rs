//! Capture sink - writes the mix output to a file and completes exactly once
//!
//! The sink is an output tap. It appends each buffer it sees until the
//! destination holds as many frames as the source, then fires a one-shot
//! latch and hands the writer to a finisher thread. Finalizing the file and
//! running the completion callback never happen on the render thread.
//!
//! The offline renderer shares the same session and latch, so whichever path
//! reaches the end first delivers the completion and the other backs off.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::audio_file::{AudioFile, AudioFileWriter};
use crate::cancel::CancelToken;
use crate::error::{AudioError, Result};
use crate::format::StreamFormat;
use crate::graph::{OutputTap, TapControl};

/// Called once with the destination path or the terminal error
pub type CompletionFn = Box<dyn FnOnce(Result<PathBuf>) + Send>;

/// Latch that lets exactly one caller through
#[derive(Debug, Clone, Default)]
pub struct OneShot(Arc<AtomicBool>);

impl OneShot {
    pub fn new() -> Self {
        Self::default()
    }

    /// True for the first caller only
    pub fn try_fire(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    pub fn is_fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What to capture and where
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    pub source_file: PathBuf,
    pub destination: PathBuf,
    /// Source length in frames; the capture stops here
    pub expected_frames: u64,
}

impl CaptureJob {
    pub fn for_source(source: &AudioFile, destination: impl Into<PathBuf>) -> Self {
        Self {
            source_file: source.path().to_path_buf(),
            destination: destination.into(),
            expected_frames: source.length(),
        }
    }
}

/// How a session ended
#[derive(Debug)]
pub(crate) enum Outcome {
    Complete,
    Cancelled,
    Failed(AudioError),
}

/// An open destination plus its pending completion
pub struct CaptureSession {
    job: CaptureJob,
    writer: Option<AudioFileWriter>,
    written: u64,
    completion: Option<CompletionFn>,
    latch: OneShot,
}

impl CaptureSession {
    /// Open the destination writer. Fails before anything plays.
    pub fn open(job: CaptureJob, format: &StreamFormat, completion: CompletionFn) -> Result<Self> {
        let writer = AudioFileWriter::create(&job.destination, format)?;
        debug!(
            destination = %job.destination.display(),
            expected_frames = job.expected_frames,
            "capture session opened"
        );

        Ok(Self {
            job,
            writer: Some(writer),
            written: 0,
            completion: Some(completion),
            latch: OneShot::new(),
        })
    }

    pub fn job(&self) -> &CaptureJob {
        &self.job
    }

    pub fn destination(&self) -> &Path {
        &self.job.destination
    }

    /// Latch shared by every path that can complete this session
    pub fn latch(&self) -> OneShot {
        self.latch.clone()
    }

    pub fn written_frames(&self) -> u64 {
        self.written
    }

    pub fn remaining_frames(&self) -> u64 {
        self.job.expected_frames.saturating_sub(self.written)
    }

    /// Completion has been claimed by the sink or the offline renderer
    pub fn is_finished(&self) -> bool {
        self.latch.is_fired()
    }

    /// Append interleaved samples, trimmed to the remaining frame count.
    /// Returns the number of frames written.
    pub fn write(&mut self, samples: &[f32]) -> Result<u64> {
        let remaining = self.remaining_frames();
        let writer = self.writer.as_mut().ok_or(AudioError::NoActiveSession)?;

        let frames = ((samples.len() / 2) as u64).min(remaining);
        writer.write(&samples[..frames as usize * 2])?;
        self.written += frames;
        Ok(frames)
    }

    /// Claim completion. `None` if another path already did.
    pub(crate) fn finish(&mut self, outcome: Outcome) -> Option<Finish> {
        if !self.latch.try_fire() {
            return None;
        }
        Some(Finish {
            writer: self.writer.take(),
            destination: self.job.destination.clone(),
            frames: self.written,
            outcome,
            completion: self.completion.take(),
        })
    }
}

/// Everything needed to close out a session away from the render thread
pub(crate) struct Finish {
    writer: Option<AudioFileWriter>,
    destination: PathBuf,
    frames: u64,
    outcome: Outcome,
    completion: Option<CompletionFn>,
}

impl Finish {
    /// Finalize or discard the file, then deliver the completion
    pub(crate) fn run(self) -> Result<PathBuf> {
        let result = match self.outcome {
            Outcome::Complete => match self.writer {
                Some(writer) => writer.finalize(),
                None => Err(AudioError::NoActiveSession),
            },
            Outcome::Cancelled => {
                discard(self.writer, &self.destination);
                Err(AudioError::Cancelled)
            }
            Outcome::Failed(err) => {
                discard(self.writer, &self.destination);
                Err(err)
            }
        };

        match &result {
            Ok(path) => info!(path = %path.display(), frames = self.frames, "capture complete"),
            Err(e) => warn!(error = %e, "capture ended without output"),
        }

        if let Some(completion) = self.completion {
            completion(result.clone());
        }
        result
    }
}

/// Close and delete a partial destination
fn discard(writer: Option<AudioFileWriter>, destination: &Path) {
    if let Some(writer) = writer {
        let _ = writer.finalize();
    }
    if let Err(e) = std::fs::remove_file(destination) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %destination.display(), error = %e, "failed to remove partial capture");
        }
    }
}

/// Output tap that records the mix into a capture session
pub struct CaptureSink {
    session: Arc<Mutex<CaptureSession>>,
    latch: OneShot,
    cancel: CancelToken,
    finisher: Sender<Finish>,
}

impl CaptureSink {
    /// Open the session and start its finisher thread.
    ///
    /// Returns the tap to install on the mix output and a handle to the
    /// session for the offline renderer.
    pub fn new(
        job: CaptureJob,
        format: &StreamFormat,
        completion: CompletionFn,
        cancel: CancelToken,
    ) -> Result<(Self, Arc<Mutex<CaptureSession>>)> {
        let session = CaptureSession::open(job, format, completion)?;
        let latch = session.latch();
        let session = Arc::new(Mutex::new(session));

        let (tx, rx) = bounded::<Finish>(1);
        thread::Builder::new()
            .name("revoice-capture".into())
            .spawn(move || {
                // Exits without work if the sink is dropped before finishing
                if let Ok(finish) = rx.recv() {
                    let _ = finish.run();
                }
            })
            .map_err(|e| AudioError::Render(format!("failed to spawn finisher: {}", e)))?;

        let sink = Self {
            session: session.clone(),
            latch,
            cancel,
            finisher: tx,
        };
        Ok((sink, session))
    }

    fn dispatch(&self, finish: Finish) {
        match self.finisher.try_send(finish) {
            Ok(()) => {}
            Err(TrySendError::Full(finish)) | Err(TrySendError::Disconnected(finish)) => {
                warn!("finisher unavailable, finishing on a new thread");
                thread::spawn(move || {
                    let _ = finish.run();
                });
            }
        }
    }
}

impl OutputTap for CaptureSink {
    fn on_buffer(&mut self, samples: &[f32]) -> TapControl {
        if self.latch.is_fired() {
            return TapControl::Remove;
        }

        // Held by the offline renderer: it owns the session now
        let Some(mut session) = self.session.try_lock() else {
            return TapControl::Continue;
        };

        if self.cancel.is_cancelled() {
            if let Some(finish) = session.finish(Outcome::Cancelled) {
                drop(session);
                self.dispatch(finish);
            }
            return TapControl::Remove;
        }

        if session.remaining_frames() > 0 {
            if let Err(e) = session.write(samples) {
                warn!(error = %e, frames = samples.len() / 2, "dropped capture buffer");
            }
        }

        if session.remaining_frames() == 0 {
            if let Some(finish) = session.finish(Outcome::Complete) {
                drop(session);
                self.dispatch(finish);
            }
            return TapControl::Remove;
        }

        TapControl::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn job(dir: &Path, frames: u64) -> CaptureJob {
        CaptureJob {
            source_file: dir.join("source.wav"),
            destination: dir.join("captured.wav"),
            expected_frames: frames,
        }
    }

    fn counting_completion() -> (CompletionFn, crossbeam_channel::Receiver<Result<PathBuf>>) {
        let (tx, rx) = unbounded();
        let completion: CompletionFn = Box::new(move |result| {
            let _ = tx.send(result);
        });
        (completion, rx)
    }

    #[test]
    fn test_one_shot_fires_once() {
        let latch = OneShot::new();
        let other = latch.clone();
        assert!(latch.try_fire());
        assert!(!other.try_fire());
        assert!(other.is_fired());
    }

    #[test]
    fn test_exact_length_and_single_completion() {
        let dir = tempfile::tempdir().unwrap();
        let (completion, rx) = counting_completion();
        let (mut sink, session) = CaptureSink::new(
            job(dir.path(), 1000),
            &StreamFormat::default(),
            completion,
            CancelToken::new(),
        )
        .unwrap();

        let buffer = vec![0.1f32; 512 * 2];
        let mut controls = Vec::new();
        for _ in 0..4 {
            controls.push(sink.on_buffer(&buffer));
        }

        assert_eq!(controls[0], TapControl::Continue);
        assert_eq!(controls[1], TapControl::Remove);
        assert_eq!(controls[3], TapControl::Remove);
        assert_eq!(session.lock().written_frames(), 1000);

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let path = result.unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 1000);
    }

    #[test]
    fn test_failed_write_drops_buffer_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (completion, rx) = counting_completion();
        let (mut sink, session) = CaptureSink::new(
            job(dir.path(), 600),
            &StreamFormat::default(),
            completion,
            CancelToken::new(),
        )
        .unwrap();

        let buffer = vec![0.2f32; 256 * 2];
        assert_eq!(sink.on_buffer(&buffer), TapControl::Continue);

        // Pull the writer so the next append fails
        let writer = session.lock().writer.take();
        assert_eq!(sink.on_buffer(&buffer), TapControl::Continue);
        assert_eq!(session.lock().written_frames(), 256);
        assert!(!session.lock().is_finished());
        assert!(rx.try_recv().is_err());

        session.lock().writer = writer;
        assert_eq!(sink.on_buffer(&buffer), TapControl::Continue);
        assert_eq!(sink.on_buffer(&buffer), TapControl::Remove);

        let path = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 600);
    }

    #[test]
    fn test_cancel_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let (completion, rx) = counting_completion();
        let cancel = CancelToken::new();
        let (mut sink, _session) = CaptureSink::new(
            job(dir.path(), 10_000),
            &StreamFormat::default(),
            completion,
            cancel.clone(),
        )
        .unwrap();

        let buffer = vec![0.0f32; 256 * 2];
        assert_eq!(sink.on_buffer(&buffer), TapControl::Continue);
        cancel.cancel();
        assert_eq!(sink.on_buffer(&buffer), TapControl::Remove);

        let result = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(AudioError::Cancelled)));
        assert!(!dir.path().join("captured.wav").exists());
    }

    #[test]
    fn test_unwritable_destination_fails_synchronously() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let job = CaptureJob {
            source_file: PathBuf::from("in.wav"),
            destination: PathBuf::from("/nonexistent/dir/out.wav"),
            expected_frames: 10,
        };
        let result = CaptureSink::new(
            job,
            &StreamFormat::default(),
            Box::new(move |_: Result<PathBuf>| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            CancelToken::new(),
        );

        assert!(matches!(result, Err(AudioError::Io { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_finish_claimed_once() {
        let dir = tempfile::tempdir().unwrap();
        let (completion, _rx) = counting_completion();
        let mut session =
            CaptureSession::open(job(dir.path(), 4), &StreamFormat::default(), completion)
                .unwrap();

        assert!(session.finish(Outcome::Complete).is_some());
        assert!(session.finish(Outcome::Complete).is_none());
        assert!(session.is_finished());
        assert!(matches!(
            session.write(&[0.0; 4]),
            Err(AudioError::NoActiveSession)
        ));
    }
}
