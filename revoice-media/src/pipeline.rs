//! Pipeline: extract the sound, filter it, put it back under the picture
//!
//! 1. audio-only composition of the source
//! 2. export it to `audioTrack.wav`
//! 3. run it through the effects graph into `filteredAudioFile.wav`
//! 4. open the filtered file as an asset
//! 5. compose the source picture with the filtered sound
//! 6. export to `encodedVideo.<ext>`
//! 7. hand back the final path
//!
//! The first failing stage ends the run; its error is returned unchanged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_channel::bounded;
use revoice_audio::{
    render_file, AudioEngine, AudioError, CancelToken, ClockedDriver, EffectPreset, Pacing,
    RecordingConfig,
};
use tracing::{info, instrument, warn};

use crate::asset::{
    AssetTrackService, DefaultTrackService, MediaAsset, SourceAssetProvider, TrackKind,
};
use crate::composition::Composition;
use crate::config::{CaptureMode, PipelineConfig};
use crate::error::{ExportError, PipelineError};
use crate::export::{
    AssetExporter, CodecPreset, ContainerFormat, ExportConfig, ExportSessionService,
};
use crate::paths::JobPaths;

pub struct Pipeline {
    config: PipelineConfig,
    assets: Arc<dyn SourceAssetProvider>,
    tracks: Arc<dyn AssetTrackService>,
    exporter: AssetExporter,
    keep_intermediates: bool,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        assets: Arc<dyn SourceAssetProvider>,
        exports: Arc<dyn ExportSessionService>,
    ) -> Self {
        Self {
            config,
            assets,
            tracks: Arc::new(DefaultTrackService),
            exporter: AssetExporter::new(exports),
            keep_intermediates: false,
        }
    }

    pub fn with_track_service(mut self, tracks: Arc<dyn AssetTrackService>) -> Self {
        self.tracks = tracks;
        self
    }

    /// Leave the extracted and filtered audio next to the final file
    pub fn keep_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn process(
        &self,
        asset: &MediaAsset,
        preset: &EffectPreset,
    ) -> Result<PathBuf, PipelineError> {
        self.process_with_cancel(asset, preset, &CancelToken::new())
    }

    /// Run all stages in a fresh job directory.
    ///
    /// On failure the job directory is removed. On success only the final
    /// file is kept unless intermediates were asked for.
    #[instrument(skip_all, fields(source = %asset.path.display(), preset = %preset.name))]
    pub fn process_with_cancel(
        &self,
        asset: &MediaAsset,
        preset: &EffectPreset,
        cancel: &CancelToken,
    ) -> Result<PathBuf, PipelineError> {
        let paths = JobPaths::for_new_job(&self.config.work_dir);
        paths.create().map_err(|source| ExportError::Io {
            path: paths.dir().to_path_buf(),
            source,
        })?;

        match self.run_stages(asset, preset, &paths, cancel) {
            Ok(path) => {
                if !self.keep_intermediates {
                    paths.remove_intermediates();
                }
                info!(path = %path.display(), job = paths.job_id(), "pipeline finished");
                Ok(path)
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "pipeline failed");
                if let Err(cleanup) = paths.remove() {
                    warn!(error = %cleanup, "failed to remove job directory");
                }
                Err(e)
            }
        }
    }

    fn run_stages(
        &self,
        asset: &MediaAsset,
        preset: &EffectPreset,
        paths: &JobPaths,
        cancel: &CancelToken,
    ) -> Result<PathBuf, PipelineError> {
        let tracks = self.tracks.as_ref();

        let audio_only = Composition::audio_only_with(asset, tracks)?;

        info!("exporting sound track");
        let extract = ExportConfig::new(paths.audio_track(), ContainerFormat::Wav)
            .with_codec(CodecPreset::PcmFloat);
        let extracted = self.exporter.export(&audio_only, &extract, cancel)?;

        info!(mode = %self.config.capture_mode, "filtering sound track");
        let filtered = self.capture(&extracted, &paths.filtered_audio(), preset, cancel)?;

        let filtered_asset = self.assets.open(&filtered)?;

        let mut composition = Composition::video_only_with(asset, tracks)?;
        composition.insert_first(&filtered_asset, tracks, TrackKind::Sound)?;

        info!(container = %self.config.container, "exporting final video");
        let container = self.config.container;
        let encode = ExportConfig::new(paths.encoded_video(container), container)
            .with_codec(CodecPreset::Passthrough);
        let encoded = self.exporter.export(&composition, &encode, cancel)?;

        Ok(encoded)
    }

    /// Filter `source` into `destination` with the configured capture mode
    fn capture(
        &self,
        source: &Path,
        destination: &Path,
        preset: &EffectPreset,
        cancel: &CancelToken,
    ) -> Result<PathBuf, AudioError> {
        let format = self.config.stream_format();

        match self.config.capture_mode {
            CaptureMode::Offline => render_file(source, destination, preset, format, cancel),
            CaptureMode::Realtime => {
                let driver = ClockedDriver::new(self.config.tap_buffer_frames, Pacing::RealTime);
                let mut engine = AudioEngine::new(format, Box::new(driver))?;
                engine.apply_preset(preset);

                let (done_tx, done_rx) = bounded(1);
                let recording = RecordingConfig::new(
                    destination,
                    Box::new(move |result: revoice_audio::Result<PathBuf>| {
                        let _ = done_tx.send(result);
                    }),
                )
                .with_cancel(cancel.clone());

                engine.play(source, Some(recording))?;
                let result = done_rx.recv().unwrap_or_else(|_| {
                    Err(AudioError::Render("recording ended without completion".into()))
                });
                engine.stop();
                result
            }
        }
    }
}
