use std::fmt;
use std::path::PathBuf;

use crate::engine::DEFAULT_SLOT_GRANULARITY_MINUTES;
use crate::limits::{MAX_SLOT_GRANULARITY_MINUTES, MIN_SLOT_GRANULARITY_MINUTES};

/// Settings of the maintenance binary, read from `SALON_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    pub journal_file: String,
    pub slot_granularity_minutes: i64,
    /// Compact once this many events were appended since the last compaction.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            journal_file: "salon.wal".into(),
            slot_granularity_minutes: DEFAULT_SLOT_GRANULARITY_MINUTES,
            compact_threshold: 1000,
            metrics_port: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from any variable source; unset variables take their defaults.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let journal_file = var("SALON_JOURNAL_FILE").unwrap_or(defaults.journal_file);
        if journal_file.trim().is_empty() || journal_file.contains(['/', '\\']) {
            return Err(ConfigError::InvalidJournalFile(journal_file));
        }

        let slot_granularity_minutes = match var("SALON_SLOT_GRANULARITY_MINUTES") {
            Some(raw) => {
                let minutes: i64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("SALON_SLOT_GRANULARITY_MINUTES", raw.clone()))?;
                if !(MIN_SLOT_GRANULARITY_MINUTES..=MAX_SLOT_GRANULARITY_MINUTES).contains(&minutes) {
                    return Err(ConfigError::GranularityOutOfRange(minutes));
                }
                minutes
            }
            None => defaults.slot_granularity_minutes,
        };

        let compact_threshold = match var("SALON_COMPACT_THRESHOLD") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid("SALON_COMPACT_THRESHOLD", raw.clone()))?,
            None => defaults.compact_threshold,
        };

        let metrics_port = match var("SALON_METRICS_PORT") {
            Some(raw) => Some(
                raw.trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid("SALON_METRICS_PORT", raw.clone()))?,
            ),
            None => None,
        };

        Ok(Self {
            data_dir: var("SALON_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            journal_file,
            slot_granularity_minutes,
            compact_threshold,
            metrics_port,
        })
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join(&self.journal_file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Variable set to something that does not parse.
    Invalid(&'static str, String),
    GranularityOutOfRange(i64),
    InvalidJournalFile(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid(key, value) => write!(f, "{key} has an invalid value: {value:?}"),
            ConfigError::GranularityOutOfRange(minutes) => write!(
                f,
                "SALON_SLOT_GRANULARITY_MINUTES must be within {MIN_SLOT_GRANULARITY_MINUTES}..={MAX_SLOT_GRANULARITY_MINUTES}, got {minutes}"
            ),
            ConfigError::InvalidJournalFile(name) => {
                write!(f, "SALON_JOURNAL_FILE must be a plain file name, got {name:?}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}
