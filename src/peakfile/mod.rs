//! Peakfile codec, cache manager, and generator (C2, C3).

pub mod cache;
pub mod codec;
pub mod generator;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::FreshnessPolicy;
use crate::decoder::DecodeError;

pub use cache::PeakfileCacheError;
pub use codec::{CodecError, PeakfileBody};
pub use generator::GenerateError;

/// Errors surfaced to a waveform's peaks promise.
#[derive(Debug, Error)]
pub enum PeakfileError {
    /// Filesystem error during peakfile generation or cache resolution.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The decoder refused the audio file.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Peakfile payload was shorter than the audio length implies.
    #[error("Peakfile corrupt: expected at least {expected} entries, found {found}")]
    Corrupt { expected: u64, found: u64 },
    /// Failed to read or write the peakfile's binary body.
    #[error("Peakfile codec error: {0}")]
    Codec(#[from] CodecError),
    /// Cache directory resolution failure.
    #[error("Peakfile cache error: {0}")]
    Cache(#[from] PeakfileCacheError),
}

impl From<GenerateError> for PeakfileError {
    fn from(err: GenerateError) -> Self {
        match err {
            GenerateError::Io(source) => PeakfileError::Io(source),
            GenerateError::Decode(source) => PeakfileError::Decode(source),
            GenerateError::Cache(source) => PeakfileError::Cache(source),
        }
    }
}

/// Ensure a current peakfile exists for `audio_path`, generating it if
/// missing or stale, and return its parsed body. Triggers an idle sweep of
/// expired entries after any successful generation.
pub fn ensure_and_load(
    audio_path: &Path,
    right_channel_path: Option<&Path>,
    expected_frames: u64,
    freshness_policy: FreshnessPolicy,
    expiry_days: u32,
    batch_chunks: u64,
) -> Result<PeakfileBody, PeakfileError> {
    let path = cache::peakfile_path_for(audio_path)?;
    let current = cache::is_current(&path, audio_path, freshness_policy)?;

    let path = if current {
        path
    } else {
        let generated = generator::generate(audio_path, right_channel_path, freshness_policy, batch_chunks)?;
        let _ = cache::prune_expired(expiry_days);
        generated
    };

    let bytes = std::fs::read(&path)?;
    let body = codec::decode(&bytes)?;

    let expected_entries = codec::entry_count(expected_frames);
    if (body.entry_count() as u64) < expected_entries {
        return Err(PeakfileError::Corrupt {
            expected: expected_entries,
            found: body.entry_count() as u64,
        });
    }
    Ok(body)
}

/// Resolve the on-disk path a peakfile for `audio_path` would live at,
/// without generating or loading it.
pub fn path_for(audio_path: &Path) -> Result<PathBuf, PeakfileCacheError> {
    cache::peakfile_path_for(audio_path)
}
