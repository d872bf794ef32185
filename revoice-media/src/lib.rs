//! Media side of revoice - assets, compositions, and export orchestration
//!
//! This crate stitches the filtered audio back onto the picture:
//! - Asset: Tracks of a source file, and the provider/track-service seams
//! - Composition: At most one track per kind, each inserted at time zero
//! - Export: Session-based exporter with a staging file and a job state machine
//! - Pcm / Ffmpeg: Concrete export session services
//! - Pipeline: The seven-step extract → filter → re-mux flow

mod asset;
mod composition;
mod config;
mod error;
mod export;
mod ffmpeg;
mod paths;
mod pcm;
mod pipeline;
mod probe;

pub use asset::{
    AssetTrackService, AudioAssetProvider, DefaultTrackService, MediaAsset, MediaTrack,
    SourceAssetProvider, TimeRange, TrackKind, Transform,
};
pub use composition::{Composition, CompositionTrack};
pub use config::{CaptureMode, PipelineConfig};
pub use error::{ExportError, MediaError, PipelineError};
pub use export::{
    AssetExporter, CodecPreset, ContainerFormat, ExportConfig, ExportHandle, ExportSession,
    ExportSessionService, ExportState, ExportStatus, StatusSender,
};
pub use ffmpeg::FfmpegExportService;
pub use paths::JobPaths;
pub use pcm::PcmExportService;
pub use pipeline::Pipeline;
pub use probe::FfprobeAssetProvider;
