//! Runtime wiring (design note: explicit `Runtime`, not a singleton).
//!
//! Replaces the `wf` global singleton the reference implementation keeps
//! for its peak cache, audio cache, worker, and load-peak function pointer
//! (§9 "Global mutable state") with one value constructed at startup and
//! threaded through every public entry point. Tests construct their own
//! `Runtime` rather than reaching for process-global state.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use crate::audio_cache::AudioCache;
use crate::config::RuntimeConfig;
use crate::decoder::DecodeError;
use crate::hires;
use crate::peakfile::{self, PeakfileBody, PeakfileError};
use crate::texture_cache::{StealListener, TextureCache, TextureId};
use crate::waveform::{Peakbuf, PeakSignal, Waveform};
use crate::worker::{JobKey, JobKind, WorkerHandle};

/// Completion messages the worker posts back to the main thread. Both the
/// peakfile-generation family and the hi-res-peak family share one worker
/// (§4.4), so both message shapes live in one enum consumed by
/// [`Runtime::poll`].
pub enum WorkerMessage {
    PeakfileReady {
        waveform: Weak<Waveform>,
        audio_path: PathBuf,
        result: Result<PeakfileBody, PeakfileError>,
    },
    HiresReady {
        waveform: Weak<Waveform>,
        block_index: u64,
        result: Result<Peakbuf, DecodeError>,
    },
}

/// Every long-lived resource the core needs, constructed once by the host
/// application and passed into actors and render calls.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub audio_cache: AudioCache,
    pub texture_cache: TextureCache,
    pub worker: WorkerHandle<WorkerMessage>,
}

impl Runtime {
    /// `textures` must hold exactly `config.texture_pool_size` handles — the
    /// host allocates them (they're real GPU texture ids) and is expected to
    /// size the allocation from that field. A mismatch is logged rather than
    /// rejected, since it's recoverable: the pool simply ends up smaller or
    /// larger than configured.
    pub fn new(
        config: RuntimeConfig,
        textures: Vec<TextureId>,
        steal_listener: impl StealListener + 'static,
    ) -> Self {
        if textures.len() != config.texture_pool_size {
            tracing::warn!(
                supplied = textures.len(),
                configured = config.texture_pool_size,
                "texture pool size passed to Runtime::new does not match config.texture_pool_size"
            );
        }
        Self {
            audio_cache: AudioCache::new(config.audio_cache_capacity_samples as u64),
            texture_cache: TextureCache::new(textures, steal_listener),
            worker: WorkerHandle::spawn(),
            config,
        }
    }

    /// Drain completion messages and install their results onto the
    /// originating waveform; no-op for waveforms already dropped. This is
    /// the main-thread "post-step" the concurrency model describes (§5).
    pub fn poll(&self) {
        for message in self.worker.drain() {
            apply_worker_message(message);
        }
    }

    /// Request a low-resolution peakfile load for `waveform` if one isn't
    /// already resident. No-op if a load is already in flight or loaded; the
    /// worker itself also deduplicates against any pending job with the same
    /// key, so repeated calls from the actor's draw loop while the first
    /// request is still in flight never queue a second one (§5 ordering
    /// guarantee).
    pub fn request_peakfile(&self, waveform: &Arc<Waveform>) {
        if waveform.peak().is_some() {
            return;
        }
        let audio_path = waveform.path.clone();
        let n_frames = waveform.n_frames;
        let freshness_policy = self.config.freshness_policy;
        let expiry_days = self.config.peakfile_expiry_days;
        let batch_chunks = self.config.generation_batch_size as u64;
        let path_for_message = audio_path.clone();
        let key = JobKey { waveform: waveform.id(), kind: JobKind::Peakfile, block_index: None };

        self.worker.enqueue(waveform, key, move |weak| {
            let result = peakfile::ensure_and_load(
                &audio_path,
                None,
                n_frames,
                freshness_policy,
                expiry_days,
                batch_chunks,
            );
            Some(WorkerMessage::PeakfileReady {
                waveform: weak,
                audio_path: path_for_message,
                result,
            })
        });
    }

    /// Request a hi-res peak build for `block_index` of `waveform` if one
    /// satisfying `min_tier` isn't already resident. Deduplicated against
    /// pending jobs the same way as [`Runtime::request_peakfile`].
    pub fn request_hires_block(&self, waveform: &Arc<Waveform>, block_index: u64, min_tier: u32) {
        let resolution = hires::tier_to_resolution(min_tier);
        if let Some(existing) = waveform.hires_peak(block_index) {
            if existing.resolution <= resolution {
                return;
            }
        }
        let Some(block) = self.audio_cache.get(waveform.id(), block_index) else {
            return;
        };
        let key = JobKey {
            waveform: waveform.id(),
            kind: JobKind::HiresBlock,
            block_index: Some(block_index),
        };

        self.worker.enqueue(waveform, key, move |weak| {
            let peakbuf = hires::build_peakbuf(&block, min_tier);
            Some(WorkerMessage::HiresReady {
                waveform: weak,
                block_index,
                result: Ok(peakbuf),
            })
        });
    }

    /// Free every resource `waveform` holds across the audio cache and
    /// texture cache (exit condition, §6 "destruction of the last actor").
    pub fn release_waveform(&self, waveform: &Waveform) {
        self.audio_cache.evict_waveform(waveform.id());
        self.texture_cache.invalidate_waveform(waveform.id());
        waveform.clear_peaks();
    }
}

/// Install one worker completion message onto its originating waveform;
/// a no-op if the waveform has already been dropped. Split out of
/// [`Runtime::poll`] so the per-message logic can be exercised directly
/// in tests without driving the worker thread.
fn apply_worker_message(message: WorkerMessage) {
    match message {
        WorkerMessage::PeakfileReady { waveform, result, audio_path } => {
            let Some(waveform) = waveform.upgrade() else { return };
            match result {
                Ok(body) => {
                    waveform.set_peak(Arc::new(body));
                    waveform.set_offline(false);
                    waveform.set_renderable(true);
                    waveform.post_peak_signal(PeakSignal::PeakfileReady);
                    tracing::debug!(path = %audio_path.display(), "peakfile ready");
                }
                Err(error) => {
                    // A missing audio file is a transient/environmental
                    // condition (§4.10): mark offline but leave renderable
                    // alone so a previously loaded peakfile keeps drawing.
                    // Any other failure (corrupt data, codec/decode/io
                    // errors) means the peaks themselves can't be trusted,
                    // so the actor stops drawing (§7).
                    if matches!(error, PeakfileError::Decode(DecodeError::FileMissing { .. })) {
                        waveform.set_offline(true);
                    } else {
                        waveform.set_renderable(false);
                    }
                    tracing::warn!(path = %audio_path.display(), %error, "peakfile generation failed");
                    waveform.post_peak_signal(PeakSignal::PeakfileError(error.to_string()));
                }
            }
        }
        WorkerMessage::HiresReady { waveform, block_index, result } => {
            let Some(waveform) = waveform.upgrade() else { return };
            match result {
                Ok(peakbuf) => {
                    waveform.insert_hires_peak(block_index, Arc::new(peakbuf));
                    waveform.post_peak_signal(PeakSignal::HiresReady { block_index });
                }
                Err(error) => {
                    tracing::warn!(block_index, %error, "hi-res peak build failed");
                    waveform.post_peak_signal(PeakSignal::HiresError {
                        block_index,
                        reason: error.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_cache::AudioBlock;
    use crate::config::RuntimeConfig;
    use std::time::Duration;

    fn textures(n: u32) -> Vec<TextureId> {
        (0..n).map(TextureId).collect()
    }

    #[test]
    fn request_hires_block_without_cached_audio_is_a_no_op() {
        let runtime = Runtime::new(RuntimeConfig::default(), textures(4), |_| {});
        let waveform = Waveform::new("a.wav".into(), 65_536, 1, 44_100);
        runtime.request_hires_block(&waveform, 0, 4);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(runtime.worker.stats().queue_depth, 0);
        assert!(waveform.hires_peak(0).is_none());
    }

    #[test]
    fn request_hires_block_builds_from_cached_audio() {
        let runtime = Runtime::new(RuntimeConfig::default(), textures(4), |_| {});
        let waveform = Waveform::new("a.wav".into(), 65_536, 1, 44_100);
        runtime.audio_cache.insert(
            waveform.id(),
            AudioBlock {
                block_index: 0,
                left: vec![0i16; 65_536],
                right: None,
            },
        );
        runtime.request_hires_block(&waveform, 0, 4);
        std::thread::sleep(Duration::from_millis(100));
        runtime.poll();
        assert!(waveform.hires_peak(0).is_some());
    }

    #[test]
    fn release_waveform_clears_audio_and_texture_state() {
        let runtime = Runtime::new(RuntimeConfig::default(), textures(4), |_| {});
        let waveform = Waveform::new("a.wav".into(), 65_536, 1, 44_100);
        runtime.audio_cache.insert(
            waveform.id(),
            AudioBlock {
                block_index: 0,
                left: vec![0i16; 10],
                right: None,
            },
        );
        runtime.release_waveform(&waveform);
        assert!(!runtime.audio_cache.contains(waveform.id(), 0));
    }

    #[test]
    fn poll_posts_peak_signal_and_bumps_generation_on_success() {
        let runtime = Runtime::new(RuntimeConfig::default(), textures(4), |_| {});
        let waveform = Waveform::new("a.wav".into(), 65_536, 1, 44_100);
        runtime.audio_cache.insert(
            waveform.id(),
            AudioBlock {
                block_index: 0,
                left: vec![0i16; 65_536],
                right: None,
            },
        );
        let before = waveform.peaks_promise().generation;
        runtime.request_hires_block(&waveform, 0, 4);
        std::thread::sleep(Duration::from_millis(100));
        runtime.poll();

        let promise = waveform.peaks_promise();
        assert!(promise.generation > before);
        assert!(matches!(promise.last_signal, Some(PeakSignal::HiresReady { block_index: 0 })));
    }

    #[test]
    fn file_missing_error_sets_offline_but_not_unrenderable() {
        let waveform = Waveform::new("a.wav".into(), 65_536, 1, 44_100);
        assert!(waveform.is_renderable());

        let weak = Arc::downgrade(&waveform);
        apply_worker_message(WorkerMessage::PeakfileReady {
            waveform: weak,
            audio_path: "a.wav".into(),
            result: Err(PeakfileError::Decode(DecodeError::FileMissing {
                path: "a.wav".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })),
        });

        assert!(waveform.is_offline());
        assert!(waveform.is_renderable());
        assert!(matches!(waveform.peaks_promise().last_signal, Some(PeakSignal::PeakfileError(_))));
    }

    #[test]
    fn corrupt_peakfile_error_sets_unrenderable() {
        let waveform = Waveform::new("a.wav".into(), 65_536, 1, 44_100);

        let weak = Arc::downgrade(&waveform);
        apply_worker_message(WorkerMessage::PeakfileReady {
            waveform: weak,
            audio_path: "a.wav".into(),
            result: Err(PeakfileError::Corrupt { expected: 10, found: 1 }),
        });

        assert!(!waveform.is_renderable());
        assert!(!waveform.is_offline());
    }

    #[test]
    fn texture_pool_matching_config_size_is_honoured() {
        let mut config = RuntimeConfig::default();
        config.texture_pool_size = 4;
        let runtime = Runtime::new(config, textures(4), |_| {});
        assert_eq!(runtime.texture_cache.capacity(), 4);
    }
}
