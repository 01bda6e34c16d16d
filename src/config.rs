use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::analyzer::pitch::{PitchAlgorithm, PitchUnit};

/// Source directory used when neither the CLI nor the config file names one.
pub const DEFAULT_SOURCE_DIR: &str = "wav";
/// Output table used when neither the CLI nor the config file names one.
pub const DEFAULT_OUTPUT_PATH: &str = "all_pitches.csv";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Directory of audio files to analyze.
    pub source_dir: Option<PathBuf>,
    /// Where the result table is written.
    pub output_path: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (all cores).
    pub workers: usize,
    /// Descend into subdirectories of the source directory.
    pub recursive: bool,
    /// Order the persisted table by file name instead of completion order.
    pub sort_by_file: bool,
    /// Frame and estimator settings.
    pub pitch: PitchConfig,
}

/// Framing and pitch estimator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PitchConfig {
    /// Samples per analysis frame.
    pub window_size: usize,
    /// Samples between consecutive frame starts.
    pub hop_size: usize,
    pub algorithm: PitchAlgorithm,
    /// Dissimilarity below which the first dip is accepted (0, 1].
    pub tolerance: f32,
    pub unit: PitchUnit,
    /// Lowest fundamental searched, in Hz.
    pub min_frequency: f32,
    /// Highest fundamental searched, in Hz.
    pub max_frequency: f32,
    /// Frames quieter than this (dB full scale) are reported unvoiced.
    pub silence_db: f32,
}

impl Default for PitchConfig {
    fn default() -> Self {
        Self {
            window_size: 4096,
            hop_size: 512,
            algorithm: PitchAlgorithm::Yin,
            tolerance: 0.8,
            unit: PitchUnit::Hz,
            min_frequency: 50.0,
            max_frequency: 1000.0,
            silence_db: -50.0,
        }
    }
}

impl PitchConfig {
    /// Reject settings the frame source or estimators cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size < 2 {
            return Err(ConfigError::Invalid(format!(
                "window_size must be at least 2 (got {})",
                self.window_size
            )));
        }
        if self.hop_size == 0 || self.hop_size > self.window_size {
            return Err(ConfigError::Invalid(format!(
                "hop_size must be in 1..={} (got {})",
                self.window_size, self.hop_size
            )));
        }
        if !(self.tolerance > 0.0 && self.tolerance <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be in (0, 1] (got {})",
                self.tolerance
            )));
        }
        if !(self.min_frequency > 0.0 && self.min_frequency < self.max_frequency) {
            return Err(ConfigError::Invalid(format!(
                "frequency range must satisfy 0 < min < max (got {}..{})",
                self.min_frequency, self.max_frequency
            )));
        }
        if !self.silence_db.is_finite() {
            return Err(ConfigError::Invalid("silence_db must be finite".into()));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load config from `~/.config/pitchbatch/config.toml`.
    /// Returns default config if file doesn't exist.
    /// Logs a warning if the file exists but can't be parsed.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => match Self::load_from(&path) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("{}. Using defaults.", e);
                    Self::default()
                }
            },
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path. Unlike [`AppConfig::load`], failures are errors.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<AppConfig>(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Resolve worker count: 0 → auto-detect (all cores, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.source_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOURCE_DIR))
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_PATH))
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}
