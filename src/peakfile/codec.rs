//! Peakfile on-disk codec (C2).
//!
//! A peakfile is a small RIFF-style container: four magic bytes, a version,
//! the channel count, then the payload — one `(max, min)` pair of
//! little-endian `i16` per 256 audio frames, interleaved channel-major
//! within each pair (`[max_L, min_L, max_R, min_R]` for stereo). No
//! variable-length metadata is stored.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Number of audio frames summarised by one peak pair.
pub const PEAK_RATIO: u64 = 256;

const MAGIC: &[u8; 4] = b"PEAK";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 2;

/// Errors produced while reading or writing a peakfile's binary body.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Header magic bytes did not match.
    #[error("Not a peakfile (bad magic bytes)")]
    BadMagic,
    /// Header declared an unsupported version.
    #[error("Unsupported peakfile version {0}")]
    UnsupportedVersion(u16),
    /// Payload length is not a whole number of channel-pairs.
    #[error("Peakfile payload length {len} is not a multiple of {expected}")]
    Truncated { len: usize, expected: usize },
    /// Underlying I/O failure.
    #[error("I/O error reading/writing peakfile: {0}")]
    Io(#[from] io::Error),
}

/// Decoded peakfile contents: channel count plus the flat pair buffer.
/// `pairs[i * channels * 2 + c * 2]` is the max for channel `c` at entry
/// `i`; `+ 1` is the min.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeakfileBody {
    pub channels: u16,
    pub pairs: Vec<i16>,
}

impl PeakfileBody {
    /// Number of 256-frame entries encoded.
    pub fn entry_count(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.pairs.len() / (self.channels as usize * 2)
        }
    }
}

/// Serialize a peakfile body to its binary representation.
pub fn encode(body: &PeakfileBody) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + body.pairs.len() * 2);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&body.channels.to_le_bytes());
    for sample in &body.pairs {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Write an encoded peakfile body to `writer`.
pub fn write(writer: &mut impl Write, body: &PeakfileBody) -> Result<(), CodecError> {
    writer.write_all(&encode(body))?;
    Ok(())
}

/// Parse a peakfile body from its binary representation.
pub fn decode(bytes: &[u8]) -> Result<PeakfileBody, CodecError> {
    if bytes.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            len: bytes.len(),
            expected: HEADER_LEN,
        });
    }
    if &bytes[0..4] != MAGIC {
        return Err(CodecError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let channels = u16::from_le_bytes([bytes[6], bytes[7]]);
    let payload = &bytes[HEADER_LEN..];
    if payload.len() % 2 != 0 {
        return Err(CodecError::Truncated {
            len: payload.len(),
            expected: 2,
        });
    }
    let pairs = payload
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    Ok(PeakfileBody { channels, pairs })
}

/// Read and parse a peakfile body from `reader`.
pub fn read(reader: &mut impl Read) -> Result<PeakfileBody, CodecError> {
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes)?;
    decode(&bytes)
}

/// Compute the exact on-disk payload size in bytes for an audio file with
/// `n_frames` frames and `channels` channels (header excluded).
pub fn payload_size_bytes(n_frames: u64, channels: u16) -> u64 {
    entry_count(n_frames) * channels as u64 * 2 * 2
}

/// Number of 256-frame entries for an audio file with `n_frames` frames.
pub fn entry_count(n_frames: u64) -> u64 {
    n_frames.div_ceil(PEAK_RATIO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_stereo_body() {
        let body = PeakfileBody {
            channels: 2,
            pairs: vec![100, -50, 80, -90, 5, -5, 0, 0],
        };
        let bytes = encode(&body);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, body);
        assert_eq!(decoded.entry_count(), 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0u8; 16];
        assert!(matches!(decode(&bytes), Err(CodecError::BadMagic)));
    }

    #[test]
    fn ten_second_mono_file_matches_expected_payload_size() {
        // 10s @ 44100 Hz mono: 441000 frames.
        let n_frames = 441_000;
        assert_eq!(entry_count(n_frames), 1723);
        assert_eq!(payload_size_bytes(n_frames, 1), 1723 * 2 * 2);
    }
}
