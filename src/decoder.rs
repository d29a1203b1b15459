//! Decoder facade (C1).
//!
//! Out of scope: resampling, format conversion beyond 16-bit PCM, anything
//! resembling playback. A [`Decoder`] is a pull interface — open once, then
//! read interleaved 16-bit frames at an absolute frame offset. Two
//! implementations are provided: [`HoundDecoder`] for WAV (exact sample
//! seek) and [`SymphoniaDecoder`] as a fallback for everything else
//! Symphonia can probe. [`open`] tries the former first and falls back to
//! the latter, mirroring the hound-then-rodio cascade the rest of the
//! codebase uses for format detection.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder as SymphoniaCodec, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use thiserror::Error;

/// Errors a decoder can surface. All are fatal for the waveform that
/// triggered them except where noted.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The audio file does not exist or could not be opened.
    #[error("Failed to open audio file {path}: {source}")]
    FileMissing {
        path: PathBuf,
        source: std::io::Error,
    },
    /// No decoder recognised the file's contents.
    #[error("No decoder could open {path}")]
    Unsupported { path: PathBuf },
    /// The underlying codec rejected the stream.
    #[error("Decoder rejected {path}: {reason}")]
    Codec { path: PathBuf, reason: String },
    /// A read past the end of the stream or a malformed frame.
    #[error("Failed to read samples from {path}: {reason}")]
    Read { path: PathBuf, reason: String },
}

/// Pull interface over a decoded audio file: open once, then read
/// interleaved 16-bit frames at arbitrary frame offsets.
pub trait Decoder: Send {
    /// Channel count, down-mixed/truncated to at most 2 by the caller.
    fn channels(&self) -> u16;
    /// Total number of frames in the stream, if known up front.
    fn n_frames(&self) -> Option<u64>;
    /// Sample rate in Hz.
    fn sample_rate(&self) -> u32;
    /// Read up to `out.len() / channels()` frames starting at `start_frame`,
    /// writing interleaved 16-bit samples into `out`. Returns the number of
    /// frames actually written (fewer than requested at end of stream).
    fn read_frames(&mut self, start_frame: u64, out: &mut [i16]) -> Result<usize, DecodeError>;
}

/// Open `path`, trying the exact WAV path first and falling back to
/// Symphonia for any other container.
pub fn open(path: &Path) -> Result<Box<dyn Decoder>, DecodeError> {
    match HoundDecoder::open(path) {
        Ok(decoder) => return Ok(Box::new(decoder)),
        Err(DecodeError::FileMissing { .. }) => {
            return Err(DecodeError::FileMissing {
                path: path.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }
        Err(_) => {}
    }
    SymphoniaDecoder::open(path).map(|decoder| Box::new(decoder) as Box<dyn Decoder>)
}

/// WAV decoder backed by `hound`. Supports exact frame seeking since WAV
/// frames are fixed-size records.
pub struct HoundDecoder {
    reader: hound::WavReader<std::io::BufReader<File>>,
    channels: u16,
    sample_rate: u32,
    n_frames: u64,
    sample_format: hound::SampleFormat,
    bits_per_sample: u16,
}

impl HoundDecoder {
    /// Open `path` as a WAV file.
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::FileMissing {
            path: path.to_path_buf(),
            source,
        })?;
        let reader =
            hound::WavReader::new(std::io::BufReader::new(file)).map_err(|err| DecodeError::Codec {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        let spec = reader.spec();
        Ok(Self {
            n_frames: reader.duration() as u64,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            sample_format: spec.sample_format,
            bits_per_sample: spec.bits_per_sample,
            reader,
        })
    }
}

impl Decoder for HoundDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn n_frames(&self) -> Option<u64> {
        Some(self.n_frames)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, start_frame: u64, out: &mut [i16]) -> Result<usize, DecodeError> {
        let channels = self.channels.max(1) as u64;
        self.reader
            .seek(start_frame as u32)
            .map_err(|err| DecodeError::Read {
                path: PathBuf::new(),
                reason: err.to_string(),
            })?;

        let max_frames = (out.len() as u64 / channels).min(self.n_frames.saturating_sub(start_frame));
        let wanted_samples = (max_frames * channels) as usize;
        let mut written = 0usize;

        match self.sample_format {
            hound::SampleFormat::Int => {
                for sample in self.reader.samples::<i32>().take(wanted_samples) {
                    let sample = sample.map_err(|err| DecodeError::Read {
                        path: PathBuf::new(),
                        reason: err.to_string(),
                    })?;
                    out[written] = scale_int_to_i16(sample, self.bits_per_sample);
                    written += 1;
                }
            }
            hound::SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(wanted_samples) {
                    let sample = sample.map_err(|err| DecodeError::Read {
                        path: PathBuf::new(),
                        reason: err.to_string(),
                    })?;
                    out[written] = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    written += 1;
                }
            }
        }

        Ok(written / channels as usize)
    }
}

fn scale_int_to_i16(sample: i32, bits_per_sample: u16) -> i16 {
    if bits_per_sample <= 16 {
        sample as i16
    } else {
        let shift = bits_per_sample - 16;
        (sample >> shift) as i16
    }
}

/// Fallback decoder for any Symphonia-supported container (FLAC, MP3, OGG,
/// AIFF, ...). Seeking is approximate to Symphonia's packet granularity;
/// the caller re-reads forward from the returned frame position.
pub struct SymphoniaDecoder {
    reader: Box<dyn FormatReader>,
    codec: Box<dyn SymphoniaCodec>,
    channels: u16,
    sample_rate: u32,
    n_frames: Option<u64>,
    pending: Vec<i16>,
    pending_start_frame: u64,
}

impl SymphoniaDecoder {
    /// Probe and open `path` with Symphonia.
    pub fn open(path: &Path) -> Result<Self, DecodeError> {
        let file = File::open(path).map_err(|source| DecodeError::FileMissing {
            path: path.to_path_buf(),
            source,
        })?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &Default::default())
            .map_err(|err| DecodeError::Codec {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        let reader = probed.format;
        let track = reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::Unsupported {
                path: path.to_path_buf(),
            })?;

        let codec = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|err| DecodeError::Codec {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;

        let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let n_frames = track.codec_params.n_frames;

        Ok(Self {
            reader,
            codec,
            channels,
            sample_rate,
            n_frames,
            pending: Vec::new(),
            pending_start_frame: 0,
        })
    }

    fn seek_to_frame(&mut self, frame: u64) -> Result<(), DecodeError> {
        let time = Time::new(frame / self.sample_rate.max(1) as u64, 0.0);
        self.reader
            .seek(SeekMode::Coarse, SeekTo::Time { time, track_id: None })
            .map_err(|err| DecodeError::Read {
                path: PathBuf::new(),
                reason: err.to_string(),
            })?;
        self.pending.clear();
        self.pending_start_frame = frame;
        Ok(())
    }

    fn fill_pending(&mut self) -> Result<bool, DecodeError> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(err))
                    if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(false);
                }
                Err(err) => {
                    return Err(DecodeError::Read {
                        path: PathBuf::new(),
                        reason: err.to_string(),
                    });
                }
            };

            let decoded = match self.codec.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(_)) => continue,
                Err(err) => {
                    return Err(DecodeError::Read {
                        path: PathBuf::new(),
                        reason: err.to_string(),
                    });
                }
            };
            push_interleaved_i16(&decoded, &mut self.pending);
            return Ok(true);
        }
    }
}

fn push_interleaved_i16(decoded: &AudioBufferRef<'_>, out: &mut Vec<i16>) {
    macro_rules! push_channels {
        ($buf:expr, $convert:expr) => {{
            let channels = $buf.spec().channels.count();
            let frames = $buf.frames();
            for frame in 0..frames {
                for chan in 0..channels {
                    out.push($convert($buf.chan(chan)[frame]));
                }
            }
        }};
    }

    match decoded {
        AudioBufferRef::F32(buf) => push_channels!(buf, |s: f32| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
        AudioBufferRef::S16(buf) => push_channels!(buf, |s: i16| s),
        AudioBufferRef::S32(buf) => push_channels!(buf, |s: i32| (s >> 16) as i16),
        AudioBufferRef::U8(buf) => push_channels!(buf, |s: u8| ((s as i16 - 128) * 256)),
        AudioBufferRef::U16(buf) => push_channels!(buf, |s: u16| (s as i32 - 32768) as i16),
        AudioBufferRef::S24(buf) => push_channels!(buf, |s: symphonia::core::sample::i24| ((s.0 >> 8) as i16)),
        AudioBufferRef::U24(buf) => push_channels!(buf, |s: symphonia::core::sample::u24| ((s.0 as i32 - 8_388_608) >> 8) as i16),
        AudioBufferRef::S8(buf) => push_channels!(buf, |s: i8| (s as i16) * 256),
        _ => {}
    }
}

impl Decoder for SymphoniaDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn n_frames(&self) -> Option<u64> {
        self.n_frames
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, start_frame: u64, out: &mut [i16]) -> Result<usize, DecodeError> {
        let channels = self.channels.max(1) as usize;
        if self.pending.is_empty() || start_frame < self.pending_start_frame {
            self.seek_to_frame(start_frame)?;
        }

        let mut written = 0usize;
        let wanted_frames = out.len() / channels;
        while written < wanted_frames {
            if self.pending.is_empty() && !self.fill_pending()? {
                break;
            }
            let take_samples = self.pending.len().min((wanted_frames - written) * channels);
            out[written * channels..written * channels + take_samples]
                .copy_from_slice(&self.pending[..take_samples]);
            self.pending.drain(..take_samples);
            written += take_samples / channels;
            self.pending_start_frame += (take_samples / channels) as u64;
        }
        Ok(written)
    }
}

/// Decode an in-memory WAV byte buffer, used by tests that don't want to
/// touch the filesystem.
pub fn hound_decoder_from_bytes(bytes: Vec<u8>) -> Result<HoundMemoryDecoder, DecodeError> {
    let reader = hound::WavReader::new(Cursor::new(bytes)).map_err(|err| DecodeError::Codec {
        path: PathBuf::new(),
        reason: err.to_string(),
    })?;
    let spec = reader.spec();
    Ok(HoundMemoryDecoder {
        n_frames: reader.duration() as u64,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        sample_format: spec.sample_format,
        bits_per_sample: spec.bits_per_sample,
        reader,
    })
}

/// In-memory counterpart to [`HoundDecoder`] for unit tests.
pub struct HoundMemoryDecoder {
    reader: hound::WavReader<Cursor<Vec<u8>>>,
    channels: u16,
    sample_rate: u32,
    n_frames: u64,
    sample_format: hound::SampleFormat,
    bits_per_sample: u16,
}

impl Decoder for HoundMemoryDecoder {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn n_frames(&self) -> Option<u64> {
        Some(self.n_frames)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read_frames(&mut self, start_frame: u64, out: &mut [i16]) -> Result<usize, DecodeError> {
        let channels = self.channels.max(1) as u64;
        self.reader
            .seek(start_frame as u32)
            .map_err(|err| DecodeError::Read {
                path: PathBuf::new(),
                reason: err.to_string(),
            })?;
        let max_frames = (out.len() as u64 / channels).min(self.n_frames.saturating_sub(start_frame));
        let wanted_samples = (max_frames * channels) as usize;
        let mut written = 0usize;
        match self.sample_format {
            hound::SampleFormat::Int => {
                for sample in self.reader.samples::<i32>().take(wanted_samples) {
                    let sample = sample.map_err(|err| DecodeError::Read {
                        path: PathBuf::new(),
                        reason: err.to_string(),
                    })?;
                    out[written] = scale_int_to_i16(sample, self.bits_per_sample);
                    written += 1;
                }
            }
            hound::SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(wanted_samples) {
                    let sample = sample.map_err(|err| DecodeError::Read {
                        path: PathBuf::new(),
                        reason: err.to_string(),
                    })?;
                    out[written] = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                    written += 1;
                }
            }
        }
        Ok(written / channels as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_bytes_i16(channels: u16, samples: &[i16]) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn reads_interleaved_frames_from_offset() {
        let bytes = wav_bytes_i16(2, &[0, 1, 10, 11, 20, 21, 30, 31]);
        let mut decoder = hound_decoder_from_bytes(bytes).unwrap();
        assert_eq!(decoder.channels(), 2);
        assert_eq!(decoder.n_frames(), Some(4));

        let mut out = [0i16; 4];
        let frames = decoder.read_frames(1, &mut out).unwrap();
        assert_eq!(frames, 2);
        assert_eq!(out, [10, 11, 20, 21]);
    }

    #[test]
    fn read_past_end_returns_fewer_frames() {
        let bytes = wav_bytes_i16(1, &[1, 2, 3]);
        let mut decoder = hound_decoder_from_bytes(bytes).unwrap();
        let mut out = [0i16; 8];
        let frames = decoder.read_frames(2, &mut out).unwrap();
        assert_eq!(frames, 1);
        assert_eq!(out[0], 3);
    }

    #[test]
    fn rejects_missing_file() {
        let err = HoundDecoder::open(Path::new("/nonexistent/path/does-not-exist.wav"));
        assert!(matches!(err, Err(DecodeError::FileMissing { .. })));
    }
}
