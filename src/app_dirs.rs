//! Application directory helpers.
//!
//! Two distinct roots are resolved here, matching the spec's distinction
//! between peakfile storage and everything else: the **peakfile cache**
//! lives under `$XDG_CACHE_HOME/peak` (falling back to `~/.cache/peak`) so it
//! is interoperable with the reference implementation's cache directory, and
//! survives independently of the application's own config/log files, which
//! live under the OS config root in a `peakwave` folder. A
//! `PEAKWAVE_CACHE_HOME` / `PEAKWAVE_CONFIG_HOME` override supports tests and
//! portable setups.

use std::{
    path::PathBuf,
    sync::{LazyLock, Mutex},
};

#[cfg(test)]
use std::cell::RefCell;

use directories::BaseDirs;
use thiserror::Error;

/// Name of the application directory under the OS config root.
pub const APP_DIR_NAME: &str = "peakwave";
/// Name of the peakfile cache directory under the resolved cache root.
pub const PEAK_CACHE_DIR_NAME: &str = "peak";

static CACHE_BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));
static CONFIG_BASE_OVERRIDE: LazyLock<Mutex<Option<PathBuf>>> = LazyLock::new(|| Mutex::new(None));
#[cfg(test)]
static TEST_CACHE_BASE: LazyLock<PathBuf> = LazyLock::new(|| {
    let dir = tempfile::tempdir().expect("create test cache dir");
    let path = dir.path().to_path_buf();
    std::mem::forget(dir);
    path
});

#[cfg(test)]
thread_local! {
    static TEST_CACHE_OVERRIDE: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}

/// Ensure tests do not touch the real user cache directory.
#[cfg(test)]
pub fn ensure_test_cache_base() {
    let test_base = LazyLock::force(&TEST_CACHE_BASE).clone();
    let mut guard = CACHE_BASE_OVERRIDE
        .lock()
        .expect("cache base override mutex poisoned");
    if guard.is_none() {
        *guard = Some(test_base);
    }
}

/// Errors that can occur while resolving or preparing application directories.
#[derive(Debug, Error)]
pub enum AppDirError {
    /// No suitable base directory could be resolved for the requested root.
    #[error("No suitable base directory available for {0}")]
    NoBaseDir(&'static str),
    /// Failed to create a required directory.
    #[error("Failed to create directory at {path}: {source}")]
    CreateDir {
        /// Path that failed to be created.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

/// Return the peakfile cache root (`$XDG_CACHE_HOME/peak`), creating it if needed.
pub fn peak_cache_dir() -> Result<PathBuf, AppDirError> {
    #[cfg(test)]
    ensure_test_cache_base();
    let base = cache_base_dir().ok_or(AppDirError::NoBaseDir("peakfile cache"))?;
    let path = base.join(PEAK_CACHE_DIR_NAME);
    create_dir(path)
}

/// Return the application config/log root, creating it if needed.
pub fn app_root_dir() -> Result<PathBuf, AppDirError> {
    let base = config_base_dir().ok_or(AppDirError::NoBaseDir("application config"))?;
    create_dir(base.join(APP_DIR_NAME))
}

/// Return the logs directory inside the application root, creating it if needed.
pub fn logs_dir() -> Result<PathBuf, AppDirError> {
    create_dir(app_root_dir()?.join("logs"))
}

fn create_dir(path: PathBuf) -> Result<PathBuf, AppDirError> {
    std::fs::create_dir_all(&path).map_err(|source| AppDirError::CreateDir {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

fn cache_base_dir() -> Option<PathBuf> {
    #[cfg(test)]
    if let Some(path) = TEST_CACHE_OVERRIDE.with(|override_path| override_path.borrow().clone()) {
        return Some(path);
    }
    if let Some(path) = CACHE_BASE_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
    {
        return Some(path);
    }
    if let Ok(path) = std::env::var("PEAKWAVE_CACHE_HOME") {
        return Some(PathBuf::from(path));
    }
    if let Ok(path) = std::env::var("XDG_CACHE_HOME") {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.cache_dir().to_path_buf())
}

fn config_base_dir() -> Option<PathBuf> {
    if let Some(path) = CONFIG_BASE_OVERRIDE
        .lock()
        .ok()
        .and_then(|guard| guard.clone())
    {
        return Some(path);
    }
    if let Ok(path) = std::env::var("PEAKWAVE_CONFIG_HOME") {
        return Some(PathBuf::from(path));
    }
    BaseDirs::new().map(|dirs| dirs.config_dir().to_path_buf())
}

/// Guard that sets a temporary cache base path for tests and restores the prior value.
#[cfg(test)]
pub struct CacheBaseGuard {
    previous: Option<PathBuf>,
}

#[cfg(test)]
impl CacheBaseGuard {
    /// Override the resolved cache base for the current thread's test.
    pub fn set(path: PathBuf) -> Self {
        let previous = TEST_CACHE_OVERRIDE.with(|override_path| {
            let mut slot = override_path.borrow_mut();
            let prev = slot.clone();
            *slot = Some(path);
            prev
        });
        Self { previous }
    }
}

#[cfg(test)]
impl Drop for CacheBaseGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        TEST_CACHE_OVERRIDE.with(|override_path| {
            *override_path.borrow_mut() = previous;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn peak_cache_dir_uses_override() {
        let base = tempdir().unwrap();
        let _guard = CacheBaseGuard::set(base.path().to_path_buf());
        let dir = peak_cache_dir().unwrap();
        assert_eq!(dir, base.path().join(PEAK_CACHE_DIR_NAME));
        assert!(dir.is_dir());
    }

    #[test]
    fn app_root_dir_ends_with_app_name() {
        let root = app_root_dir().unwrap();
        assert!(root.ends_with(APP_DIR_NAME));
    }
}
