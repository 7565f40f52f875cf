//! Tunables for the folder cache and synchronizer.
//!
//! Everything has a sensible default; a JSON file only needs to name the
//! values it overrides.

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum number of bytes a block should store before we split it.
pub const MAX_BLOCK_SIZE: usize = 96 * 1024;

/// Estimated size of one cached header. There is little variability in what
/// a header holds, so a constant is good enough.
pub const HEADER_EST_SIZE_IN_BYTES: usize = 200;

/// How recent a full sync must be for cached data to be shown without
/// talking to the server first.
pub const RECENT_ENOUGH_SECS: i64 = 6 * 60 * 60;

/// How many messages a freshly opened slice gets in the first go.
pub const INITIAL_FILL_SIZE: usize = 12;

/// Upper bound on how many headers a single range query will produce.
pub const TOO_MANY_MESSAGES: usize = 2000;

/// Resident block bytes above which the cache considers itself under
/// memory pressure.
pub const MAX_RESIDENT_BYTES: usize = 4 * 1024 * 1024;

/// Folder cache tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Block split threshold in estimated bytes.
    pub max_block_size: usize,
    /// Estimated bytes per header.
    pub header_est_size: usize,
    /// Freshness threshold for full-sync data, in seconds.
    pub recent_enough_secs: i64,
    /// Headers delivered when a slice opens from cache.
    pub initial_fill_size: usize,
    /// Default limit for range queries.
    pub too_many_messages: usize,
    /// Memory-pressure threshold for resident blocks.
    pub max_resident_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_block_size: MAX_BLOCK_SIZE,
            header_est_size: HEADER_EST_SIZE_IN_BYTES,
            recent_enough_secs: RECENT_ENOUGH_SECS,
            initial_fill_size: INITIAL_FILL_SIZE,
            too_many_messages: TOO_MANY_MESSAGES,
            max_resident_bytes: MAX_RESIDENT_BYTES,
        }
    }
}

impl CacheConfig {
    /// Freshness threshold as a duration.
    #[must_use]
    pub fn recent_enough(&self) -> TimeDelta {
        TimeDelta::seconds(self.recent_enough_secs)
    }
}

/// Synchronizer tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Header fields fetched for messages the cache has never seen.
    pub header_fields: Vec<String>,
    /// Leave drafts out of every search.
    pub exclude_drafts: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            header_fields: ["FROM", "TO", "CC", "BCC", "SUBJECT", "REPLY-TO"]
                .into_iter()
                .map(String::from)
                .collect(),
            exclude_drafts: true,
        }
    }
}

/// Complete configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Folder cache settings.
    pub cache: CacheConfig,
    /// Synchronizer settings.
    pub sync: SyncConfig,
}

impl Config {
    /// Default location: `<config dir>/mailslice/config.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mailslice").join("config.json"))
    }

    /// Loads configuration from a JSON file, using defaults if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty JSON, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Rejects values the cache cannot work with.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first bad value.
    pub fn validate(&self) -> Result<()> {
        let cache = &self.cache;
        if cache.header_est_size == 0 {
            return Err(Error::Config("header_est_size must be positive".into()));
        }
        if cache.max_block_size < cache.header_est_size * 2 {
            return Err(Error::Config(
                "max_block_size must hold at least two headers".into(),
            ));
        }
        if cache.recent_enough_secs < 0 {
            return Err(Error::Config("recent_enough_secs must not be negative".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_block_math() {
        let cache = CacheConfig::default();
        assert_eq!(cache.max_block_size / cache.header_est_size, 491);
        assert_eq!(cache.recent_enough(), TimeDelta::hours(6));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"cache": {"initial_fill_size": 30}}"#).unwrap();
        assert_eq!(config.cache.initial_fill_size, 30);
        assert_eq!(config.cache.max_block_size, MAX_BLOCK_SIZE);
        assert!(config.sync.exclude_drafts);
    }

    #[test]
    fn missing_file_is_default() {
        let path = std::env::temp_dir().join("mailslice-definitely-missing.json");
        assert_eq!(Config::load(&path).unwrap(), Config::default());
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir()
            .join(format!("mailslice-config-{}", std::process::id()))
            .join("config.json");
        let mut config = Config::default();
        config.cache.max_resident_bytes = 1024 * 1024;
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn validate_rejects_tiny_blocks() {
        let mut config = Config::default();
        config.cache.max_block_size = 100;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
