// Global configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::{BuildOptions, ClassificationRules, Codec, DiscoverySettings, MachineSettings, MonitorSettings};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub fallback: FallbackConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_output_codec")]
    pub output_codec: Codec,

    /// Quality level; the codec's default when unset
    #[serde(default)]
    pub quality: Option<u32>,

    /// Carry HDR through when the input has it
    #[serde(default = "default_true_config")]
    pub preserve_hdr: bool,

    /// Write outputs here instead of next to the inputs
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    /// Appended to the input stem. Supports: {codec}
    #[serde(default = "default_filename_suffix")]
    pub filename_suffix: String,

    /// Default overwrite setting (whether to overwrite existing output files)
    #[serde(default)]
    pub overwrite: bool,

    /// Only convert inputs with this probed codec in batch mode
    #[serde(default = "default_input_codec")]
    pub input_codec: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,

    /// Kill the engine after this many seconds without output
    #[serde(default = "default_silence_threshold_secs")]
    pub silence_threshold_secs: u64,

    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// Diagnostic lines kept for classification and reports
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,

    /// Smaller outputs after a clean exit are treated as failures
    #[serde(default = "default_min_output_bytes")]
    pub min_output_bytes: u64,

    /// Extra arguments (shell syntax) inserted before the output path
    #[serde(default)]
    pub extra_args: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FallbackConfig {
    /// Never try GPU encoders
    #[serde(default)]
    pub disable_hardware: bool,

    /// Retry the next candidate on failures no pattern recognizes
    #[serde(default)]
    pub unrecognized_is_recoverable: bool,

    #[serde(default)]
    pub extra_fatal_patterns: Vec<String>,

    #[serde(default)]
    pub extra_recoverable_patterns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Append debug logs to this file
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_output_codec() -> Codec {
    Codec::Hevc
}

fn default_true_config() -> bool {
    true
}

fn default_filename_suffix() -> String {
    "_{codec}".to_string()
}

fn default_input_codec() -> Option<String> {
    Some("av1".to_string())
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_silence_threshold_secs() -> u64 {
    30
}

fn default_watchdog_interval_ms() -> u64 {
    250
}

fn default_tail_lines() -> usize {
    20
}

fn default_min_output_bytes() -> u64 {
    1024
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_codec: default_output_codec(),
            quality: None,
            preserve_hdr: true,
            output_dir: None,
            filename_suffix: default_filename_suffix(),
            overwrite: false,
            input_codec: default_input_codec(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            silence_threshold_secs: default_silence_threshold_secs(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            tail_lines: default_tail_lines(),
            min_output_bytes: default_min_output_bytes(),
            extra_args: String::new(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = if cfg!(target_os = "macos") {
            dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".config")
                .join("ffswitch")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("ffswitch")
        };

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from disk, falling back to defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(config_path, contents)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Check if config file exists
    pub fn exists() -> bool {
        Self::config_path().map(|p| p.exists()).unwrap_or(false)
    }

    pub fn classification_rules(&self) -> ClassificationRules {
        ClassificationRules::default()
            .extend(
                &self.fallback.extra_fatal_patterns,
                &self.fallback.extra_recoverable_patterns,
            )
            .with_unrecognized_recoverable(self.fallback.unrecognized_is_recoverable)
    }

    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            program: self.engine.ffmpeg_path.clone(),
            silence_threshold: Duration::from_secs(self.engine.silence_threshold_secs.max(1)),
            poll_interval: Duration::from_millis(self.engine.watchdog_interval_ms.max(10)),
            tail_lines: self.engine.tail_lines,
            rules: self.classification_rules(),
        }
    }

    pub fn machine_settings(&self) -> Result<MachineSettings> {
        Ok(MachineSettings {
            build: BuildOptions::default().with_extra_args(&self.engine.extra_args)?,
            min_output_bytes: self.engine.min_output_bytes,
        })
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            output_codec: self.defaults.output_codec,
            quality: self.defaults.quality,
            preserve_hdr: self.defaults.preserve_hdr,
            output_dir: self.defaults.output_dir.clone(),
            filename_suffix: self.defaults.filename_suffix.clone(),
            // "" or "any" turns the filter off
            input_codec: self
                .defaults
                .input_codec
                .clone()
                .filter(|c| !c.trim().is_empty() && !c.eq_ignore_ascii_case("any")),
        }
    }
}
