//! Multi-resolution waveform rendering core: decode, cache, and select
//! between five resolution tiers of an audio file's peak data, backed by a
//! fixed-size GPU texture pool, so a host application can draw a waveform
//! at interactive frame rates from a whole file down to individual samples.

/// Application directory helpers (cache/config/log roots).
pub mod app_dirs;
/// Waveform actor: one independent view of a waveform, its draw loop, and
/// prefetch-on-transition behaviour.
pub mod actor;
/// Audio block cache, the LRU layer between the decoder and hi-res peaks.
pub mod audio_cache;
/// Block-range calculator: which mode-sized texture blocks a draw call covers.
pub mod block_range;
/// Runtime configuration, persisted as TOML.
pub mod config;
/// Render context interface the host implements and the core consumes.
pub mod context;
/// Decoder facade over hound (WAV) and symphonia (everything else).
pub mod decoder;
/// Hi-res peak builder: downsamples a cached audio block into a peak buffer.
pub mod hires;
/// Logging setup helpers (tracing-subscriber + tracing-appender).
pub mod logging;
/// Render-mode selector: maps pixels-per-sample to one of five resolution regimes.
pub mod mode;
/// Peakfile codec, cache manager, and generator.
pub mod peakfile;
/// Per-mode renderer capability set consumed by the actor's draw loop.
pub mod render;
/// Explicit runtime value wiring the audio cache, texture cache, and worker.
pub mod runtime;
/// GPU texture cache: a fixed-size, stealable pool of texture slots.
pub mod texture_cache;
/// Minimal animatable-property plumbing used by the actor to interpolate
/// region, rectangle, and opacity.
pub mod transition;
/// Waveform data model: `Waveform`, `Peakbuf`, and cache identifiers.
pub mod waveform;
/// Background worker thread and job queue.
pub mod worker;
