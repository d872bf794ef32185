//! Per-job working paths
//!
//! Each pipeline run gets its own directory under the work dir, named by a
//! job id, so concurrent runs never share intermediate files.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::export::ContainerFormat;

static NEXT_JOB: AtomicU64 = AtomicU64::new(0);

/// Intermediate and final file locations of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPaths {
    job_id: String,
    dir: PathBuf,
}

impl JobPaths {
    pub fn new(work_dir: impl AsRef<Path>, job_id: impl Into<String>) -> Self {
        let job_id = job_id.into();
        let dir = work_dir.as_ref().join(format!("revoice-{}", job_id));
        Self { job_id, dir }
    }

    /// Paths under a freshly generated job id
    pub fn for_new_job(work_dir: impl AsRef<Path>) -> Self {
        Self::new(work_dir, next_job_id())
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the job directory
    pub fn create(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        debug!(dir = %self.dir.display(), "job directory ready");
        Ok(())
    }

    /// Sound track extracted from the source
    pub fn audio_track(&self) -> PathBuf {
        self.dir.join("audioTrack.wav")
    }

    /// Sound track after the effects graph
    pub fn filtered_audio(&self) -> PathBuf {
        self.dir.join("filteredAudioFile.wav")
    }

    /// Final picture + filtered sound
    pub fn encoded_video(&self, container: ContainerFormat) -> PathBuf {
        self.dir.join(format!("encodedVideo.{}", container.extension()))
    }

    /// Delete the intermediate audio files, keeping the final output
    pub fn remove_intermediates(&self) {
        for path in [self.audio_track(), self.filtered_audio()] {
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to remove intermediate");
                }
            }
        }
    }

    /// Delete the whole job directory
    pub fn remove(&self) -> std::io::Result<()> {
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// `<pid>-<sequence>-<nanos>` in hex; unique within and across processes
fn next_job_id() -> String {
    let sequence = NEXT_JOB.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() as u64 ^ d.as_secs())
        .unwrap_or(0);
    format!("{:x}-{:x}-{:x}", std::process::id(), sequence, nanos)
}
