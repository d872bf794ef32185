//! Media, export, and pipeline errors

use std::path::PathBuf;

use revoice_audio::AudioError;
use thiserror::Error;

use crate::asset::TrackKind;

/// Errors from assets and composition building
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No {0} track found")]
    TrackTypeNotFound(TrackKind),
    #[error("Track insertion failed: {0}")]
    TrackInsertion(String),
    #[error("Probe failed: {0}")]
    Probe(String),
}

/// Errors from an export job
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to remove stale file {}: {source}", path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to create export session: {0}")]
    SessionCreation(String),
    #[error("Export cancelled")]
    Cancelled,
    #[error("Export failed: {0}")]
    ExportFailed(String),
    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Any failure of a pipeline run, surfaced unchanged from its stage
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Export(#[from] ExportError),
    #[error(transparent)]
    Audio(#[from] AudioError),
}

impl PipelineError {
    /// Error taxonomy name shown by the presentation shell
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Media(e) => match e {
                MediaError::TrackTypeNotFound(_) => "TrackTypeNotFound",
                MediaError::TrackInsertion(_) => "TrackInsertionError",
                MediaError::Probe(_) => "IOError",
            },
            PipelineError::Export(e) => match e {
                ExportError::Cleanup { .. } => "CleanupError",
                ExportError::SessionCreation(_) => "SessionCreationError",
                ExportError::Cancelled => "CancelledError",
                ExportError::ExportFailed(_) => "ExportFailedError",
                ExportError::Io { .. } => "IOError",
            },
            PipelineError::Audio(e) => match e {
                AudioError::Io { .. } | AudioError::Write { .. } | AudioError::Decode(_) => {
                    "IOError"
                }
                AudioError::Cancelled => "CancelledError",
                AudioError::GraphSetup(_)
                | AudioError::AlreadyConfigured
                | AudioError::NotConfigured
                | AudioError::Render(_)
                | AudioError::NoActiveSession
                | AudioError::Driver(_) => "GraphSetupError",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let err: PipelineError = MediaError::TrackTypeNotFound(TrackKind::Picture).into();
        assert_eq!(err.kind(), "TrackTypeNotFound");

        let err: PipelineError = ExportError::Cleanup {
            path: PathBuf::from("/tmp/x"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }
        .into();
        assert_eq!(err.kind(), "CleanupError");

        let err: PipelineError = AudioError::AlreadyConfigured.into();
        assert_eq!(err.kind(), "GraphSetupError");

        let err: PipelineError = AudioError::Cancelled.into();
        assert_eq!(err.kind(), "CancelledError");
    }

    #[test]
    fn test_display_is_transparent() {
        let err: PipelineError = ExportError::SessionCreation("no sound track".into()).into();
        assert_eq!(
            err.to_string(),
            "Failed to create export session: no sound track"
        );
    }
}
