//! revoice - apply a voice effect to a video's sound track
//!
//! Probes the input with ffprobe, filters its sound through the effects
//! graph, and re-muxes the result with ffmpeg.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use revoice_audio::{AudioEngine, AudioFile, CpalDriver, EffectPreset, TagCache};
use revoice_media::{
    CaptureMode, ContainerFormat, FfmpegExportService, FfprobeAssetProvider, Pipeline,
    PipelineConfig, SourceAssetProvider,
};

#[derive(Parser)]
#[command(name = "revoice")]
#[command(about = "Apply a voice effect to a video's sound track", long_about = None)]
struct Cli {
    /// Video (or, with --preview, audio) file to process
    #[arg(required_unless_present = "list_presets")]
    input: Option<PathBuf>,

    /// Effect preset name (see --list-presets)
    #[arg(short, long, default_value = "hamster")]
    preset: String,

    /// Copy the final file here instead of leaving it in the work dir
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Capture mode: realtime or offline
    #[arg(short, long)]
    mode: Option<CaptureMode>,

    /// Final container: mov, mp4, m4a or wav
    #[arg(long)]
    container: Option<ContainerFormat>,

    /// Root directory for job working files
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective settings back to the config file
    #[arg(long)]
    save_config: bool,

    /// Play the input through the preset on the default output device
    #[arg(long)]
    preview: bool,

    /// List the built-in presets and exit
    #[arg(long)]
    list_presets: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.list_presets {
        list_presets();
        return Ok(());
    }

    let input = cli
        .input
        .clone()
        .ok_or_else(|| anyhow!("no input file given"))?;
    let preset = EffectPreset::builtin(&cli.preset)
        .ok_or_else(|| anyhow!("unknown preset '{}', try --list-presets", cli.preset))?;

    let config = load_config(&cli)?;

    if cli.preview {
        return preview(&input, &preset, &config);
    }

    let assets = FfprobeAssetProvider::default();
    let asset = assets
        .open(&input)
        .with_context(|| format!("failed to open {}", input.display()))?;

    info!(
        input = %input.display(),
        preset = %preset.name,
        mode = %config.capture_mode,
        container = %config.container,
        "revoice starting"
    );

    let pipeline = Pipeline::new(
        config,
        Arc::new(assets),
        Arc::new(FfmpegExportService::default()),
    );

    let encoded = match pipeline.process(&asset, &preset) {
        Ok(path) => path,
        Err(e) => {
            error!(kind = e.kind(), "pipeline failed");
            bail!("{}: {}", e.kind(), e);
        }
    };

    let final_path = match &cli.output {
        Some(output) => deliver(&encoded, output)?,
        None => encoded,
    };

    println!("{}", final_path.display());
    Ok(())
}

fn list_presets() {
    let badges = TagCache::<String>::new();
    for preset in EffectPreset::builtins() {
        let badge = preset
            .tag
            .as_deref()
            .and_then(|tag| badges.get_or_insert_with(tag, |tag| Some(format!("[{}]", tag))))
            .map(|b| b.as_str().to_owned())
            .unwrap_or_else(|| "[ ]".to_string());
        println!(
            "{} {:<8} pitch {:+.0} cents, rate {:.2}, distortion {:.0} dB / {:.0}%, reverb {:.0}%",
            badge,
            preset.name,
            preset.pitch_cents,
            preset.playback_rate,
            preset.distortion.gain_db,
            preset.distortion.wet_dry_mix,
            preset.reverb_wet_dry_mix,
        );
    }
}

/// Config file values, then command-line overrides
fn load_config(cli: &Cli) -> anyhow::Result<PipelineConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(PipelineConfig::config_path);

    let mut config = PipelineConfig::load_from(&path).unwrap_or_default();
    if let Some(mode) = cli.mode {
        config.capture_mode = mode;
    }
    if let Some(container) = cli.container {
        config.container = container;
    }
    if let Some(work_dir) = &cli.work_dir {
        config.work_dir = work_dir.clone();
    }

    if cli.save_config {
        config
            .save_to(&path)
            .with_context(|| format!("failed to save config to {}", path.display()))?;
        info!(path = %path.display(), "config saved");
    }

    Ok(config)
}

/// Move the job output to `output`, falling back to a copy across devices
fn deliver(encoded: &Path, output: &Path) -> anyhow::Result<PathBuf> {
    if fs::rename(encoded, output).is_err() {
        fs::copy(encoded, output)
            .with_context(|| format!("failed to write {}", output.display()))?;
        let _ = fs::remove_file(encoded);
    }
    Ok(output.to_path_buf())
}

/// Play `input` through the preset until it ends
fn preview(input: &Path, preset: &EffectPreset, config: &PipelineConfig) -> anyhow::Result<()> {
    let format = config.stream_format();
    let frames = AudioFile::open(input, format.sample_rate)?.length();

    let mut engine = AudioEngine::new(format, Box::new(CpalDriver::new()))?;
    engine.apply_preset(preset);
    engine.play(input, None)?;

    info!(input = %input.display(), preset = %preset.name, "previewing");
    while engine.position() < frames {
        thread::sleep(Duration::from_millis(100));
    }
    engine.stop();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_parse() {
        let cli = Cli::parse_from([
            "revoice",
            "clip.mov",
            "--preset",
            "robot",
            "--mode",
            "realtime",
            "--container",
            "mp4",
        ]);
        assert_eq!(cli.mode, Some(CaptureMode::Realtime));
        assert_eq!(cli.container, Some(ContainerFormat::Mp4));
        assert_eq!(cli.input, Some(PathBuf::from("clip.mov")));
    }

    #[test]
    fn test_list_presets_needs_no_input() {
        let cli = Cli::parse_from(["revoice", "--list-presets"]);
        assert!(cli.list_presets);
        assert!(Cli::try_parse_from(["revoice"]).is_err());
    }

    #[test]
    fn test_config_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.txt");
        fs::write(&path, "capture_mode=realtime\ncontainer=m4a\nsample_rate=48000").unwrap();

        let cli = Cli::parse_from([
            "revoice",
            "clip.mov",
            "--config",
            path.to_str().unwrap(),
            "--container",
            "mov",
        ]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.capture_mode, CaptureMode::Realtime);
        assert_eq!(config.container, ContainerFormat::Mov);
        assert_eq!(config.sample_rate, 48000);
    }
}
