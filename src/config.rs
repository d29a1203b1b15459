//! Runtime configuration.
//!
//! Everything the rest of the crate treats as "a reasonable constant" lives
//! here as a field with a default matching that constant, so an embedder can
//! override individual values without forking the crate. Persisted as TOML
//! under the application config root, the way the teacher persists
//! `AppSettings`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app_dirs;

/// Default filename used to store the runtime configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Audio block cache capacity, in 16-bit samples (2^23, ~8.4M samples/channel).
pub const DEFAULT_AUDIO_CACHE_CAPACITY_SAMPLES: usize = 1 << 23;
/// Texture slots kept per resolution class.
pub const DEFAULT_TEXTURE_POOL_SIZE: usize = 128;
/// Peakfiles older than this (by mtime) are considered expired and swept.
pub const DEFAULT_PEAKFILE_EXPIRY_DAYS: u32 = 90;
/// Frame-read chunk multiplier for peakfile generation: each read batches
/// `256 * N` frames before summarising them into peak pairs.
pub const DEFAULT_GENERATION_BATCH_SIZE: usize = 8;
/// Largest block range a single frame is allowed to request.
pub const DEFAULT_MAX_BLOCK_RANGE: usize = 512;

/// Errors that can occur while loading or saving [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config directory could be resolved.
    #[error("No config directory available")]
    NoConfigDir,
    /// Failed to create the config directory.
    #[error("Failed to create config directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to read the config file.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse the config file as TOML.
    #[error("Failed to parse config file {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Failed to serialize the config to TOML.
    #[error("Failed to serialize config: {0}")]
    SerializeToml(#[from] toml::ser::Error),
    /// Failed to write the config file.
    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Policy for deciding whether an on-disk peakfile is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessPolicy {
    /// A peakfile is current iff its mtime is at least as new as the audio
    /// file's mtime. Matches the reference implementation's behaviour.
    Mtime,
    /// A peakfile is current iff a blake3 digest over the first and last
    /// megabyte of the audio file plus its length matches a digest stored
    /// in the peakfile header.
    ContentHash,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        FreshnessPolicy::Mtime
    }
}

/// Every tunable the rendering pipeline needs, with defaults matching the
/// constants named throughout the component design.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Audio block cache capacity, in 16-bit samples.
    pub audio_cache_capacity_samples: usize,
    /// Texture slots kept per resolution class. The host is expected to
    /// allocate this many GPU texture handles and pass them to
    /// [`crate::runtime::Runtime::new`]; a mismatch is logged, not enforced.
    pub texture_pool_size: usize,
    /// Peakfile expiry age, in days.
    pub peakfile_expiry_days: u32,
    /// Frame-read chunk multiplier for peakfile generation (passed to
    /// [`crate::peakfile::generator::generate`] as `batch_chunks`).
    pub generation_batch_size: usize,
    /// Largest block range a single frame may request, passed to
    /// [`crate::block_range::compute`].
    pub max_block_range: usize,
    /// Peakfile freshness policy.
    pub freshness_policy: FreshnessPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            audio_cache_capacity_samples: DEFAULT_AUDIO_CACHE_CAPACITY_SAMPLES,
            texture_pool_size: DEFAULT_TEXTURE_POOL_SIZE,
            peakfile_expiry_days: DEFAULT_PEAKFILE_EXPIRY_DAYS,
            generation_batch_size: DEFAULT_GENERATION_BATCH_SIZE,
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            freshness_policy: FreshnessPolicy::default(),
        }
    }
}

/// Resolve the configuration file path, ensuring the parent directory exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(map_app_dir_error)?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Load configuration from disk, returning defaults if no file exists yet.
pub fn load_or_default() -> Result<RuntimeConfig, ConfigError> {
    let path = config_path()?;
    load_from_path(&path)
}

/// Load configuration from a specific path, returning defaults if missing.
pub fn load_from_path(path: &Path) -> Result<RuntimeConfig, ConfigError> {
    if !path.exists() {
        return Ok(RuntimeConfig::default());
    }
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

/// Persist configuration to disk, overwriting any previous contents.
pub fn save(config: &RuntimeConfig) -> Result<(), ConfigError> {
    let path = config_path()?;
    save_to_path(config, &path)
}

/// Save configuration to a specific path, creating parent directories and
/// writing atomically via a same-directory temp file plus rename.
pub fn save_to_path(config: &RuntimeConfig, path: &Path) -> Result<(), ConfigError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|source| ConfigError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;
    let data = toml::to_string_pretty(config)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    std::io::Write::write_all(&mut temp, data.as_bytes()).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    temp.persist(path)
        .map_err(|err| ConfigError::Write {
            path: path.to_path_buf(),
            source: err.error,
        })?;
    Ok(())
}

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir(_) => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => ConfigError::CreateDir { path, source },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_match_documented_constants() {
        let config = RuntimeConfig::default();
        assert_eq!(config.audio_cache_capacity_samples, 1 << 23);
        assert_eq!(config.texture_pool_size, 128);
        assert_eq!(config.peakfile_expiry_days, 90);
        assert_eq!(config.freshness_policy, FreshnessPolicy::Mtime);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = load_from_path(&path).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn round_trips_through_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = RuntimeConfig::default();
        config.texture_pool_size = 64;
        config.freshness_policy = FreshnessPolicy::ContentHash;
        save_to_path(&config, &path).unwrap();
        let loaded = load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
