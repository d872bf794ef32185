//! Pipeline configuration persistence
//!
//! Stored as `key=value` lines under the user config directory. A missing
//! or unreadable file, and any bad value, falls back to the defaults.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use revoice_audio::{StreamFormat, DEFAULT_MAX_FRAME_COUNT, DEFAULT_SAMPLE_RATE};
use tracing::warn;

use crate::export::ContainerFormat;

/// How the filtered audio is captured
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Play through a real-time driver and record the mix
    Realtime,
    /// Pull the graph as fast as possible
    #[default]
    Offline,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureMode::Realtime => f.write_str("realtime"),
            CaptureMode::Offline => f.write_str("offline"),
        }
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "realtime" => Ok(CaptureMode::Realtime),
            "offline" => Ok(CaptureMode::Offline),
            other => Err(format!("unknown capture mode: {}", other)),
        }
    }
}

/// Pipeline settings
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Root directory for per-job working files
    pub work_dir: PathBuf,
    pub sample_rate: u32,
    /// Largest offline pull
    pub max_frame_count: usize,
    /// Buffer size of the real-time driver
    pub tap_buffer_frames: usize,
    pub capture_mode: CaptureMode,
    /// Container of the final file
    pub container: ContainerFormat,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_frame_count: DEFAULT_MAX_FRAME_COUNT,
            tap_buffer_frames: 4096,
            capture_mode: CaptureMode::default(),
            container: ContainerFormat::default(),
        }
    }
}

impl PipelineConfig {
    /// Load config from a specific path
    pub fn load_from(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse(&content))
    }

    /// Save config to a specific path
    pub fn save_to(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.serialize())
    }

    /// Get the default config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("revoice")
            .join("config.txt")
    }

    /// Graph format for this configuration
    pub fn stream_format(&self) -> StreamFormat {
        StreamFormat::stereo(self.sample_rate).with_max_frame_count(self.max_frame_count)
    }

    /// Parse config from simple key=value format
    fn parse(content: &str) -> Self {
        let mut config = Self::default();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            match key {
                "work_dir" => {
                    if !value.is_empty() {
                        config.work_dir = PathBuf::from(value);
                    }
                }
                "sample_rate" => set_parsed(&mut config.sample_rate, key, value, |v| *v > 0),
                "max_frame_count" => {
                    set_parsed(&mut config.max_frame_count, key, value, |v| *v > 0)
                }
                "tap_buffer_frames" => {
                    set_parsed(&mut config.tap_buffer_frames, key, value, |v| *v > 0)
                }
                "capture_mode" => set_parsed(&mut config.capture_mode, key, value, |_| true),
                "container" => set_parsed(&mut config.container, key, value, |_| true),
                _ => {} // Ignore unknown keys
            }
        }

        config
    }

    /// Serialize config to simple key=value format
    fn serialize(&self) -> String {
        let lines = [
            "# revoice configuration".to_string(),
            format!("work_dir={}", self.work_dir.display()),
            format!("sample_rate={}", self.sample_rate),
            format!("max_frame_count={}", self.max_frame_count),
            format!("tap_buffer_frames={}", self.tap_buffer_frames),
            format!("capture_mode={}", self.capture_mode),
            format!("container={}", self.container),
        ];
        lines.join("\n")
    }
}

/// Overwrite `slot` with `value` if it parses and passes `valid`
fn set_parsed<T: FromStr>(slot: &mut T, key: &str, value: &str, valid: impl Fn(&T) -> bool) {
    match value.parse::<T>() {
        Ok(parsed) if valid(&parsed) => *slot = parsed,
        _ => warn!(key, value, "ignoring invalid config value"),
    }
}
