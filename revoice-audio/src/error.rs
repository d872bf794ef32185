//! Audio engine errors

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur in the effects graph, capture, or offline rendering
///
/// Cloneable so a terminal render error can be both returned to the caller
/// and delivered to the completion callback.
#[derive(Error, Debug, Clone)]
pub enum AudioError {
    #[error("Graph setup failed: {0}")]
    GraphSetup(String),
    #[error("Effects graph is already configured")]
    AlreadyConfigured,
    #[error("Effects graph is not configured")]
    NotConfigured,
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: Arc<hound::Error>,
    },
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Render error: {0}")]
    Render(String),
    #[error("No active capture session")]
    NoActiveSession,
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Output driver error: {0}")]
    Driver(String),
}

impl AudioError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: hound::Error) -> Self {
        Self::Write {
            path: path.into(),
            source: Arc::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, AudioError>;
