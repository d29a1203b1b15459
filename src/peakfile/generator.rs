//! Peakfile generator (C2/C3).
//!
//! Opens the audio file, reads frames in batches of `256 * N` (N=8),
//! computes per-chunk per-channel min/max, writes pairs to a temporary file
//! alongside the target, then atomically renames. For split-stereo inputs —
//! a mono file whose "right" channel lives in a separate sibling file — both
//! sides are decoded independently and interleaved into one output.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::FreshnessPolicy;
use crate::decoder::{self, Decoder, DecodeError};

use super::cache::{self, PeakfileCacheError};
use super::codec::{self, PeakfileBody};

/// Default frames-per-chunk batch multiplier (N in `256 * N`), used by
/// callers with no configured batch size of their own.
pub const DEFAULT_BATCH_CHUNKS: u64 = 8;

/// Errors raised while generating a peakfile.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Failure to open, read, write, or rename the peakfile or audio file.
    #[error("I/O error generating peakfile: {0}")]
    Io(#[from] std::io::Error),
    /// The decoder rejected the audio file outright.
    #[error("Decoder rejected audio file: {0}")]
    Decode(#[from] DecodeError),
    /// The peakfile cache directory could not be resolved.
    #[error("Peakfile cache error: {0}")]
    Cache(#[from] PeakfileCacheError),
}

/// Generate (or regenerate) the peakfile for `audio_path`, writing it to the
/// cache-resolved path and returning that path. `right_channel_path`, when
/// set, names a sibling file supplying the second channel for split-stereo
/// sources. `batch_chunks` is the frame-read chunk multiplier (N in
/// `256 * N`), normally sourced from [`crate::config::RuntimeConfig::generation_batch_size`].
pub fn generate(
    audio_path: &Path,
    right_channel_path: Option<&Path>,
    freshness_policy: FreshnessPolicy,
    batch_chunks: u64,
) -> Result<PathBuf, GenerateError> {
    let target_path = cache::peakfile_path_for(audio_path)?;
    let body = if let Some(right_path) = right_channel_path {
        build_split_stereo_body(audio_path, right_path, batch_chunks)?
    } else {
        build_body(audio_path, batch_chunks)?
    };

    write_atomic(&target_path, &body)?;

    if freshness_policy == FreshnessPolicy::ContentHash {
        cache::write_content_hash_sidecar(&target_path, audio_path)?;
    }

    Ok(target_path)
}

fn build_body(audio_path: &Path, batch_chunks: u64) -> Result<PeakfileBody, GenerateError> {
    let mut dec = decoder::open(audio_path)?;
    let channels = dec.channels().min(2).max(1);
    let pairs = summarise(dec.as_mut(), channels, batch_chunks)?;
    Ok(PeakfileBody { channels, pairs })
}

fn build_split_stereo_body(
    left_path: &Path,
    right_path: &Path,
    batch_chunks: u64,
) -> Result<PeakfileBody, GenerateError> {
    let mut left_dec = decoder::open(left_path)?;
    let mut right_dec = decoder::open(right_path)?;
    let left_pairs = summarise(left_dec.as_mut(), 1, batch_chunks)?;
    let right_pairs = summarise(right_dec.as_mut(), 1, batch_chunks)?;

    let entries = left_pairs.len().min(right_pairs.len()) / 2;
    let mut pairs = Vec::with_capacity(entries * 4);
    for i in 0..entries {
        pairs.push(left_pairs[i * 2]);
        pairs.push(left_pairs[i * 2 + 1]);
        pairs.push(right_pairs[i * 2]);
        pairs.push(right_pairs[i * 2 + 1]);
    }
    Ok(PeakfileBody { channels: 2, pairs })
}

/// Read `decoder` to completion in `256 * batch_chunks`-frame chunks,
/// producing one `(max, min)` pair per channel per chunk.
fn summarise(decoder: &mut dyn Decoder, channels: u16, batch_chunks: u64) -> Result<Vec<i16>, DecodeError> {
    let channels = channels as usize;
    let read_buf_frames = (codec::PEAK_RATIO * batch_chunks.max(1)) as usize;
    let mut buf = vec![0i16; read_buf_frames * channels];
    let mut pairs = Vec::new();
    let mut frame = 0u64;

    loop {
        let frames_read = decoder.read_frames(frame, &mut buf)?;
        if frames_read == 0 {
            break;
        }
        summarise_chunk(&buf[..frames_read * channels], channels, &mut pairs);
        frame += frames_read as u64;
        if frames_read < read_buf_frames {
            break;
        }
    }
    Ok(pairs)
}

fn summarise_chunk(chunk: &[i16], channels: usize, pairs: &mut Vec<i16>) {
    let frames = chunk.len() / channels;
    for batch_start in (0..frames).step_by(codec::PEAK_RATIO as usize) {
        let batch_end = (batch_start + codec::PEAK_RATIO as usize).min(frames);
        for ch in 0..channels {
            let mut max = i16::MIN;
            let mut min = i16::MAX;
            for f in batch_start..batch_end {
                let sample = chunk[f * channels + ch];
                max = max.max(sample);
                min = min.min(sample);
            }
            pairs.push(max);
            pairs.push(min);
        }
    }
}

fn write_atomic(target_path: &Path, body: &PeakfileBody) -> Result<(), std::io::Error> {
    let parent = target_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    codec::write(&mut temp, body).map_err(|err| match err {
        super::codec::CodecError::Io(io) => io,
        other => std::io::Error::other(other.to_string()),
    })?;
    temp.persist(target_path)
        .map_err(|err| err.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_dirs::CacheBaseGuard;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use tempfile::tempdir;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &sample in samples {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn generation_is_idempotent() {
        let base = tempdir().unwrap();
        let _guard = CacheBaseGuard::set(base.path().join("cache"));
        let audio_path = base.path().join("song.wav");
        let samples: Vec<i16> = (0..10_000).map(|i| ((i * 37) % 2000 - 1000) as i16).collect();
        write_wav(&audio_path, 1, &samples);

        let first_path = generate(&audio_path, None, FreshnessPolicy::Mtime, DEFAULT_BATCH_CHUNKS).unwrap();
        let first_bytes = std::fs::read(&first_path).unwrap();
        let second_path = generate(&audio_path, None, FreshnessPolicy::Mtime, DEFAULT_BATCH_CHUNKS).unwrap();
        let second_bytes = std::fs::read(&second_path).unwrap();

        assert_eq!(first_path, second_path);
        assert_eq!(first_bytes, second_bytes);
    }

    #[test]
    fn generated_payload_matches_expected_entry_count() {
        let base = tempdir().unwrap();
        let _guard = CacheBaseGuard::set(base.path().join("cache"));
        let audio_path = base.path().join("song.wav");
        let samples = vec![0i16; 441_000];
        write_wav(&audio_path, 1, &samples);

        let path = generate(&audio_path, None, FreshnessPolicy::Mtime, DEFAULT_BATCH_CHUNKS).unwrap();
        let body = codec::decode(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(body.entry_count() as u64, codec::entry_count(441_000));
    }

    #[test]
    fn split_stereo_interleaves_both_sides() {
        let base = tempdir().unwrap();
        let _guard = CacheBaseGuard::set(base.path().join("cache"));
        let left_path = base.path().join("song.wav");
        let right_path = base.path().join("song.R.wav");
        write_wav(&left_path, 1, &[100, -100, 50, -50]);
        write_wav(&right_path, 1, &[10, -10, 5, -5]);

        let path = generate(&left_path, Some(&right_path), FreshnessPolicy::Mtime, DEFAULT_BATCH_CHUNKS).unwrap();
        let body = codec::decode(&std::fs::read(path).unwrap()).unwrap();
        assert_eq!(body.channels, 2);
        assert_eq!(body.pairs[0], 100);
        assert_eq!(body.pairs[2], 10);
    }
}
