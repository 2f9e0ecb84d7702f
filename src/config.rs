//! Recorder configuration
//!
//! Loaded from a TOML file with `[recording]`, `[video]` and `[audio]`
//! sections. Every field has a default, so an empty file is valid.

use crate::container::format::CONTAINER_EXTENSION;
use crate::encoder::{AudioParams, TrackParams, VideoParams};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub recording: RecordingConfig,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory that receives the container files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// File name prefix, followed by the session start time
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Force-fail tracks that have not stopped this long after `stop()`
    #[serde(default)]
    pub stop_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub params: VideoParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(flatten)]
    pub params: AudioParams,
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("avrecorder")
}

fn default_file_prefix() -> String {
    "recording".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            file_prefix: default_file_prefix(),
            stop_timeout_ms: None,
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            params: VideoParams::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            params: AudioParams::default(),
        }
    }
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    pub fn validate(&self) -> Result<()> {
        if !self.video.enabled && !self.audio.enabled {
            bail!("At least one of video or audio must be enabled");
        }
        if self.recording.file_prefix.is_empty()
            || self.recording.file_prefix.contains(['/', '\\'])
        {
            bail!("Invalid file prefix: {:?}", self.recording.file_prefix);
        }
        if self.recording.stop_timeout_ms == Some(0) {
            bail!("stop_timeout_ms must be positive");
        }
        if self.video.enabled {
            self.video.params.validate().context("Invalid [video] section")?;
        }
        if self.audio.enabled {
            self.audio.params.validate().context("Invalid [audio] section")?;
        }
        Ok(())
    }

    /// Parameters of every enabled track, video first
    pub fn track_params(&self) -> Vec<(String, TrackParams)> {
        let mut tracks = Vec::new();
        if self.video.enabled {
            tracks.push(("video".to_string(), TrackParams::Video(self.video.params.clone())));
        }
        if self.audio.enabled {
            tracks.push(("audio".to_string(), TrackParams::Audio(self.audio.params.clone())));
        }
        tracks
    }

    /// `<output_dir>/<prefix>-YYYY-MM-DD-HH-MM-SS.avmx`
    pub fn output_path(&self, started_at: DateTime<Utc>) -> PathBuf {
        self.recording.output_dir.join(format!(
            "{}-{}.{}",
            self.recording.file_prefix,
            started_at.format("%Y-%m-%d-%H-%M-%S"),
            CONTAINER_EXTENSION
        ))
    }
}
