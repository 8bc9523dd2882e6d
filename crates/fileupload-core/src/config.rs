//! Upload configuration and the preference lookup it is read from.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

/// Default aggregate ceiling for one request body (10,000,000 bytes).
pub const DEFAULT_MAX_TOTAL_SIZE: u64 = 10_000_000;

/// Default in-memory threshold per item (100,000 bytes).
pub const DEFAULT_MEMORY_THRESHOLD: u64 = 100_000;

/// Preference key for the aggregate ceiling.
pub const UPLOAD_MAXSIZE_PARAMETER: &str = "upload_maxsize";

/// Preference key for the per-item memory threshold.
pub const UPLOAD_SIZETHRESHOLD_PARAMETER: &str = "upload_sizethreshold";

/// Preference key for the spool directory.
pub const UPLOAD_TEMPDIR_PARAMETER: &str = "upload_tempdir";

/// Source of named configuration values.
///
/// Implemented by whatever holds the application's preferences. Only the
/// raw string lookup is required; the typed helpers parse on top of it.
pub trait PreferenceSource {
    /// Look up a raw preference value.
    fn preference(&self, name: &str) -> Option<String>;

    /// Look up a numeric preference, falling back to `default` when the value
    /// is missing or not a non-negative integer.
    fn preference_u64(&self, name: &str, default: u64) -> u64 {
        match self.preference(name) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(value) => value,
                Err(_) => {
                    warn!(preference = name, value = %raw, "ignoring non-numeric preference");
                    default
                }
            },
            None => default,
        }
    }

    /// Look up a path preference. Blank values count as absent.
    fn preference_path(&self, name: &str) -> Option<PathBuf> {
        self.preference(name)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from)
    }
}

impl PreferenceSource for HashMap<String, String> {
    fn preference(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// A JSON object of preferences. Numbers and strings are accepted.
impl PreferenceSource for serde_json::Value {
    fn preference(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Preference source with nothing configured; every lookup uses the default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreferences;

impl PreferenceSource for NoPreferences {
    fn preference(&self, _name: &str) -> Option<String> {
        None
    }
}

/// Configuration for one upload parse.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Maximum total request body size in bytes.
    max_total_size: u64,
    /// Items larger than this are spooled to a temporary file.
    memory_threshold: u64,
    /// Directory for spooled items; the platform temp directory when absent.
    spool_directory: Option<PathBuf>,
    /// Where spooling goes when the spool directory is unusable; the
    /// platform temp directory when absent.
    fallback_directory: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_total_size: DEFAULT_MAX_TOTAL_SIZE,
            memory_threshold: DEFAULT_MEMORY_THRESHOLD,
            spool_directory: None,
            fallback_directory: None,
        }
    }
}

impl UploadConfig {
    /// Create a new configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the configuration from a preference source, using the defaults
    /// for anything missing or unparsable.
    #[must_use]
    pub fn from_preferences(prefs: &(impl PreferenceSource + ?Sized)) -> Self {
        Self {
            max_total_size: prefs.preference_u64(UPLOAD_MAXSIZE_PARAMETER, DEFAULT_MAX_TOTAL_SIZE),
            memory_threshold: prefs
                .preference_u64(UPLOAD_SIZETHRESHOLD_PARAMETER, DEFAULT_MEMORY_THRESHOLD),
            spool_directory: prefs.preference_path(UPLOAD_TEMPDIR_PARAMETER),
            fallback_directory: None,
        }
    }

    /// Set the aggregate ceiling.
    #[must_use]
    pub fn max_total_size(mut self, size: u64) -> Self {
        self.max_total_size = size;
        self
    }

    /// Set the in-memory threshold.
    #[must_use]
    pub fn memory_threshold(mut self, size: u64) -> Self {
        self.memory_threshold = size;
        self
    }

    /// Set the spool directory.
    #[must_use]
    pub fn spool_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_directory = Some(dir.into());
        self
    }

    /// Set the directory used when the spool directory is unusable.
    #[must_use]
    pub fn fallback_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.fallback_directory = Some(dir.into());
        self
    }

    /// Get the aggregate ceiling.
    #[must_use]
    pub fn get_max_total_size(&self) -> u64 {
        self.max_total_size
    }

    /// Get the in-memory threshold.
    #[must_use]
    pub fn get_memory_threshold(&self) -> u64 {
        self.memory_threshold
    }

    /// Get the configured spool directory, if any.
    #[must_use]
    pub fn get_spool_directory(&self) -> Option<&Path> {
        self.spool_directory.as_deref()
    }

    /// Get the fallback spool directory, or the platform temp directory.
    #[must_use]
    pub fn get_fallback_directory(&self) -> PathBuf {
        self.fallback_directory
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
