//! Peakfile cache manager (C3).
//!
//! Maps an audio file's identity to its peakfile path under
//! `$XDG_CACHE_HOME/peak` (via [`crate::app_dirs::peak_cache_dir`]), checks
//! freshness, and sweeps entries older than the configured expiry age. The
//! expiry sweep runs after every successful generation, matching the
//! reference implementation's idle-sweep-on-generate behaviour.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::app_dirs::{self, AppDirError};
use crate::config::FreshnessPolicy;

/// Errors raised while resolving or sweeping the peakfile cache directory.
#[derive(Debug, Error)]
pub enum PeakfileCacheError {
    /// The cache directory itself could not be resolved or created.
    #[error("Failed to resolve peakfile cache directory: {0}")]
    Dir(#[from] AppDirError),
    /// Failed to read file metadata while checking freshness or sweeping.
    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to remove an expired peakfile.
    #[error("Failed to remove expired peakfile {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to enumerate the cache directory during a sweep.
    #[error("Failed to read peakfile cache directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The audio path could not be turned into a file URI.
    #[error("Cannot form a file URI from {0}")]
    BadPath(PathBuf),
}

/// Resolve the on-disk peakfile path for `audio_path`: hex MD5 of the
/// absolute file URI, with a `.peak` extension, under the peak cache
/// directory.
pub fn peakfile_path_for(audio_path: &Path) -> Result<PathBuf, PeakfileCacheError> {
    let dir = app_dirs::peak_cache_dir()?;
    let digest = md5_hex_of_uri(audio_path)?;
    Ok(dir.join(format!("{digest}.peak")))
}

fn md5_hex_of_uri(audio_path: &Path) -> Result<String, PeakfileCacheError> {
    let absolute = if audio_path.is_absolute() {
        audio_path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|_| PeakfileCacheError::BadPath(audio_path.to_path_buf()))?
            .join(audio_path)
    };
    let uri = url::Url::from_file_path(&absolute)
        .map_err(|_| PeakfileCacheError::BadPath(audio_path.to_path_buf()))?;
    let digest = md5::compute(uri.as_str().as_bytes());
    Ok(format!("{digest:x}"))
}

/// Whether the peakfile at `peakfile_path` is current for `audio_path`
/// under the given policy. A missing peakfile is never current.
pub fn is_current(
    peakfile_path: &Path,
    audio_path: &Path,
    policy: FreshnessPolicy,
) -> Result<bool, PeakfileCacheError> {
    if !peakfile_path.exists() {
        return Ok(false);
    }
    match policy {
        FreshnessPolicy::Mtime => is_current_by_mtime(peakfile_path, audio_path),
        FreshnessPolicy::ContentHash => is_current_by_content_hash(peakfile_path, audio_path),
    }
}

fn is_current_by_mtime(peakfile_path: &Path, audio_path: &Path) -> Result<bool, PeakfileCacheError> {
    let peak_mtime = mtime_of(peakfile_path)?;
    let audio_mtime = mtime_of(audio_path)?;
    Ok(peak_mtime >= audio_mtime)
}

/// blake3 digest over the first and last megabyte of `path` plus its
/// length, used by [`FreshnessPolicy::ContentHash`]. Stored as a trailing
/// line in a sidecar file next to the peakfile (`<peakfile>.hash`) since the
/// peakfile payload format itself carries no metadata fields.
fn is_current_by_content_hash(
    peakfile_path: &Path,
    audio_path: &Path,
) -> Result<bool, PeakfileCacheError> {
    let hash_path = content_hash_sidecar_path(peakfile_path);
    let Ok(stored) = std::fs::read_to_string(&hash_path) else {
        return Ok(false);
    };
    let current = content_hash_of(audio_path)?;
    Ok(stored.trim() == current)
}

/// Record the content-hash sidecar for a freshly generated peakfile.
pub fn write_content_hash_sidecar(
    peakfile_path: &Path,
    audio_path: &Path,
) -> Result<(), PeakfileCacheError> {
    let hash = content_hash_of(audio_path)?;
    let hash_path = content_hash_sidecar_path(peakfile_path);
    std::fs::write(&hash_path, hash).map_err(|source| PeakfileCacheError::Stat {
        path: hash_path,
        source,
    })
}

fn content_hash_sidecar_path(peakfile_path: &Path) -> PathBuf {
    let mut path = peakfile_path.to_path_buf();
    path.set_extension("peak.hash");
    path
}

fn content_hash_of(path: &Path) -> Result<String, PeakfileCacheError> {
    const CHUNK: u64 = 1024 * 1024;
    let data = std::fs::read(path).map_err(|source| PeakfileCacheError::Stat {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = blake3::Hasher::new();
    let len = data.len() as u64;
    hasher.update(&len.to_le_bytes());
    hasher.update(&data[..(CHUNK.min(len) as usize)]);
    if len > CHUNK {
        let tail_start = (len - CHUNK.min(len)) as usize;
        hasher.update(&data[tail_start..]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

fn mtime_of(path: &Path) -> Result<SystemTime, PeakfileCacheError> {
    std::fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|source| PeakfileCacheError::Stat {
            path: path.to_path_buf(),
            source,
        })
}

/// Remove peakfiles (and their content-hash sidecars) whose mtime is older
/// than `expiry_days`. Runs synchronously; callers trigger it after a
/// successful generation.
pub fn prune_expired(expiry_days: u32) -> Result<usize, PeakfileCacheError> {
    let dir = app_dirs::peak_cache_dir()?;
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(expiry_days as u64 * 86_400))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = std::fs::read_dir(&dir).map_err(|source| PeakfileCacheError::ReadDir {
        path: dir.clone(),
        source,
    })?;

    let mut removed = 0;
    for entry in entries.filter_map(|entry| entry.ok()) {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("peak") {
            continue;
        }
        let modified = match entry.metadata().and_then(|meta| meta.modified()) {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        if modified < cutoff {
            std::fs::remove_file(&path).map_err(|source| PeakfileCacheError::Remove {
                path: path.clone(),
                source,
            })?;
            let sidecar = content_hash_sidecar_path(&path);
            let _ = std::fs::remove_file(sidecar);
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_dirs::CacheBaseGuard;
    use tempfile::tempdir;

    #[test]
    fn same_path_maps_to_same_peakfile() {
        let base = tempdir().unwrap();
        let _guard = CacheBaseGuard::set(base.path().to_path_buf());
        let audio = base.path().join("song.wav");
        std::fs::write(&audio, b"rawbytes").unwrap();

        let a = peakfile_path_for(&audio).unwrap();
        let b = peakfile_path_for(&audio).unwrap();
        assert_eq!(a, b);
        assert!(a.extension().and_then(|ext| ext.to_str()) == Some("peak"));
    }

    #[test]
    fn missing_peakfile_is_never_current() {
        let base = tempdir().unwrap();
        let audio = base.path().join("song.wav");
        std::fs::write(&audio, b"rawbytes").unwrap();
        let peak = base.path().join("nonexistent.peak");
        assert!(!is_current(&peak, &audio, FreshnessPolicy::Mtime).unwrap());
    }

    #[test]
    fn stale_mtime_is_not_current() {
        let base = tempdir().unwrap();
        let audio = base.path().join("song.wav");
        let peak = base.path().join("song.peak");
        std::fs::write(&peak, b"old").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(&audio, b"new").unwrap();
        assert!(!is_current(&peak, &audio, FreshnessPolicy::Mtime).unwrap());
    }

    #[test]
    fn prune_removes_entries_older_than_expiry() {
        let base = tempdir().unwrap();
        let _guard = CacheBaseGuard::set(base.path().to_path_buf());
        let dir = app_dirs::peak_cache_dir().unwrap();
        let stale = dir.join("stale.peak");
        std::fs::write(&stale, b"x").unwrap();
        let old_time = SystemTime::now() - Duration::from_secs(200 * 86_400);
        filetime_set(&stale, old_time);

        let removed = prune_expired(90).unwrap();
        assert_eq!(removed, 1);
        assert!(!stale.exists());
    }

    fn filetime_set(path: &Path, time: SystemTime) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(time).unwrap();
    }
}
