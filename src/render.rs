//! Per-mode renderers (C10).
//!
//! Function-pointer dispatch on the reference implementation is replaced
//! with a capability set per mode — `{new, load_block, render_block, free}`
//! — stored as a tagged variant indexed by [`Mode`] rather than boxed trait
//! objects (§9 "model as a capability set... not as boxed trait objects, so
//! the selector's fall-through loop stays branch-predictable").

use std::sync::Arc;

use crate::mode::Mode;
use crate::runtime::Runtime;
use crate::texture_cache::{TextureId, TextureKey};
use crate::waveform::Waveform;

/// Whether a block's data is already resident for a mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    Ready,
    Loading,
}

/// Minimum hi-res tier a mode needs to render a block (§4.3 glossary
/// mapping, tier 8 = 1:1, tier 4 = 16:1). Low-resolution modes (MED/LOW/
/// V_LOW) draw from the single peakfile-derived array instead and have no
/// tier of their own.
fn hires_tier_for(mode: Mode) -> Option<u32> {
    match mode {
        Mode::VHi => Some(8),
        Mode::Hi => Some(4),
        Mode::Med | Mode::Low | Mode::VLow => None,
    }
}

/// Called once when an actor first draws a waveform at `mode`.
pub fn new(waveform: &Arc<Waveform>, mode: Mode) {
    waveform.ensure_render_data(mode);
}

/// Ensure `block_index` has the data this mode needs loaded, requesting it
/// from the runtime if not. Returns the current status without blocking.
pub fn load_block(waveform: &Arc<Waveform>, mode: Mode, block_index: u64, runtime: &Runtime) -> BlockStatus {
    match hires_tier_for(mode) {
        None => {
            if waveform.peak().is_some() {
                BlockStatus::Ready
            } else {
                runtime.request_peakfile(waveform);
                BlockStatus::Loading
            }
        }
        Some(tier) => {
            let resolution = crate::hires::tier_to_resolution(tier);
            let satisfied = waveform
                .hires_peak(block_index)
                .is_some_and(|peakbuf| peakbuf.resolution <= resolution);
            if satisfied {
                BlockStatus::Ready
            } else {
                runtime.request_hires_block(waveform, block_index, tier);
                BlockStatus::Loading
            }
        }
    }
}

/// A no-op preparation step for the modes that need none today. Kept as an
/// explicit capability so future per-mode setup (batched uploads, palette
/// selection) has a slot without changing the actor's draw loop.
pub fn pre_render(_waveform: &Arc<Waveform>, _mode: Mode) {}

/// Produce the texture to draw `block_index` at `mode`, or `None` if its
/// data isn't loaded yet (the actor falls through to a coarser mode).
pub fn render_block(
    waveform: &Arc<Waveform>,
    mode: Mode,
    block_index: u64,
    runtime: &Runtime,
) -> Option<TextureId> {
    let ready = match hires_tier_for(mode) {
        None => waveform.peak().is_some(),
        Some(tier) => {
            let resolution = crate::hires::tier_to_resolution(tier);
            waveform
                .hires_peak(block_index)
                .is_some_and(|peakbuf| peakbuf.resolution <= resolution)
        }
    };
    if !ready {
        return None;
    }

    let key = TextureKey {
        waveform: waveform.id(),
        block_index,
        resolution_class: mode,
    };
    let (texture, _was_miss) = runtime.texture_cache.lookup_or_assign(key);
    waveform.mark_block_loaded(mode, block_index);
    Some(texture)
}

/// Called when an actor stops using `mode` (waveform switch, scene
/// teardown). Frees the mode's render data and texture bindings.
pub fn free(waveform: &Waveform, mode: Mode, runtime: &Runtime) {
    let block_count = waveform.block_count();
    for block_index in 0..block_count {
        runtime.texture_cache.invalidate(TextureKey {
            waveform: waveform.id(),
            block_index,
            resolution_class: mode,
        });
    }
    waveform.free_render_data(mode);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::texture_cache::TextureId;

    fn test_runtime() -> Runtime {
        Runtime::new(RuntimeConfig::default(), (0..8).map(TextureId).collect(), |_| {})
    }

    #[test]
    fn load_block_for_low_res_mode_requests_peakfile_once_peak_missing() {
        let runtime = test_runtime();
        let waveform = Waveform::new("missing.wav".into(), 65_536, 1, 44_100);
        let status = load_block(&waveform, Mode::Med, 0, &runtime);
        assert_eq!(status, BlockStatus::Loading);
    }

    #[test]
    fn render_block_falls_through_when_data_not_ready() {
        let runtime = test_runtime();
        let waveform = Waveform::new("missing.wav".into(), 65_536, 1, 44_100);
        assert!(render_block(&waveform, Mode::Hi, 0, &runtime).is_none());
    }

    #[test]
    fn render_block_succeeds_once_low_res_peak_is_installed() {
        let runtime = test_runtime();
        let waveform = Waveform::new("a.wav".into(), 65_536, 1, 44_100);
        waveform.set_peak(std::sync::Arc::new(crate::peakfile::PeakfileBody {
            channels: 1,
            pairs: vec![0; 4],
        }));
        assert!(render_block(&waveform, Mode::Med, 0, &runtime).is_some());
        assert!(waveform.is_block_loaded(Mode::Med, 0));
    }

    #[test]
    fn free_clears_render_data_and_texture_bindings() {
        let runtime = test_runtime();
        let waveform = Waveform::new("a.wav".into(), 65_536, 1, 44_100);
        waveform.set_peak(std::sync::Arc::new(crate::peakfile::PeakfileBody {
            channels: 1,
            pairs: vec![0; 4],
        }));
        new(&waveform, Mode::Med);
        render_block(&waveform, Mode::Med, 0, &runtime);
        free(&waveform, Mode::Med, &runtime);
        assert!(!waveform.render_data(Mode::Med));
    }
}
