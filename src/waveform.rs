//! Data model (§3): [`Waveform`], [`Peakbuf`], and the identifiers the rest
//! of the crate uses to key its caches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::mode::Mode;
use crate::peakfile::PeakfileBody;

/// Fixed frame width of one audio block (`WF_PEAK_BLOCK_SIZE`).
pub const BLOCK_SIZE_FRAMES: u64 = 65_536;

static NEXT_WAVEFORM_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identity for a [`Waveform`], used as the waveform component of
/// every composite cache key (audio cache, texture cache) instead of a raw
/// pointer, so cache keys stay `Send`/`Copy`/hashable without unsafe
/// aliasing assumptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaveformId(u64);

impl WaveformId {
    fn next() -> Self {
        Self(NEXT_WAVEFORM_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// One hi-res peak block (§3, Peakbuf). Resolution is audio frames per
/// max/min pair; must be a power of two no greater than 256.
#[derive(Debug, Clone)]
pub struct Peakbuf {
    pub block_index: u64,
    pub resolution: u32,
    /// Per-channel interleaved (max, min) pairs, `(BLOCK_SIZE_FRAMES / resolution) * 2` shorts long.
    pub channels: Vec<Vec<i16>>,
    pub peak_level: i16,
}

impl Peakbuf {
    /// `true` iff `resolution` and buffer sizes satisfy the invariant in §3.
    pub fn is_valid(&self) -> bool {
        let pow2 = self.resolution.is_power_of_two() && self.resolution <= 256;
        let expected_len = (BLOCK_SIZE_FRAMES / self.resolution as u64 * 2) as usize;
        pow2 && self.channels.iter().all(|ch| ch.len() == expected_len)
    }
}

/// One event posted to a waveform's peaks promise: either data became ready
/// or a load attempt failed. Mirrors the `peakdata-ready()`/`hires-ready(block)`
/// signals and the error-attached-to-the-peaks-promise behaviour a host
/// application observes by polling [`Waveform::peaks_promise`] (§6, §7).
#[derive(Debug, Clone)]
pub enum PeakSignal {
    /// The low-resolution peakfile finished loading.
    PeakfileReady,
    /// A hi-res block finished building.
    HiresReady { block_index: u64 },
    /// Peakfile load or generation failed.
    PeakfileError(String),
    /// A hi-res block build failed.
    HiresError { block_index: u64, reason: String },
}

/// A waveform's peaks promise: a monotonic generation counter bumped on
/// every ready/error event, plus the most recent signal. A host polls this
/// (rather than registering a callback) to learn when to redraw or surface
/// an error, matching the rest of the crate's poll-based main-thread model.
#[derive(Debug, Clone, Default)]
pub struct PeaksPromise {
    pub generation: u64,
    pub last_signal: Option<PeakSignal>,
}

/// Per-mode opaque render data: texture slot indices keyed by block index,
/// allocated lazily and freed with the waveform. Modelled as a sparse map
/// rather than the GL-specific handle the reference implementation stores,
/// since texture slot ownership itself lives in the texture cache (C7).
#[derive(Debug, Default)]
pub struct ModeRenderData {
    pub loaded_blocks: std::collections::HashSet<u64>,
}

/// One distinct audio file in use (§3).
pub struct Waveform {
    id: WaveformId,
    pub path: std::path::PathBuf,
    pub n_frames: u64,
    pub n_channels: u16,
    pub sample_rate: u32,
    pub offline: Mutex<bool>,
    pub renderable: Mutex<bool>,
    /// Low-resolution (256:1) peak array, once loaded.
    peak: Mutex<Option<Arc<PeakfileBody>>>,
    /// Sparse hi-res peak blocks, indexed by block index.
    hires_peaks: Mutex<std::collections::HashMap<u64, Arc<Peakbuf>>>,
    /// One render-data handle per mode, allocated on first use in that mode.
    render_data: Mutex<[Option<ModeRenderData>; Mode::COUNT]>,
    peaks_promise: Mutex<PeaksPromise>,
}

impl Waveform {
    /// Create a waveform for `path` whose frame/channel/rate metadata is
    /// already known (typically from an opened [`crate::decoder::Decoder`]).
    pub fn new(path: std::path::PathBuf, n_frames: u64, n_channels: u16, sample_rate: u32) -> Arc<Self> {
        Arc::new(Self {
            id: WaveformId::next(),
            path,
            n_frames,
            n_channels: n_channels.clamp(1, 2),
            sample_rate,
            offline: Mutex::new(false),
            renderable: Mutex::new(n_frames > 0),
            peak: Mutex::new(None),
            hires_peaks: Mutex::new(std::collections::HashMap::new()),
            render_data: Mutex::new(Default::default()),
            peaks_promise: Mutex::new(PeaksPromise::default()),
        })
    }

    pub fn id(&self) -> WaveformId {
        self.id
    }

    pub fn is_offline(&self) -> bool {
        *self.offline.lock().expect("waveform offline lock")
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().expect("waveform offline lock") = offline;
    }

    pub fn is_renderable(&self) -> bool {
        *self.renderable.lock().expect("waveform renderable lock")
    }

    pub fn set_renderable(&self, renderable: bool) {
        *self.renderable.lock().expect("waveform renderable lock") = renderable;
    }

    /// Current state of the peaks promise: generation counter plus the most
    /// recent ready/error signal, for a host to poll.
    pub fn peaks_promise(&self) -> PeaksPromise {
        self.peaks_promise.lock().expect("waveform peaks promise lock").clone()
    }

    /// Post a signal to the peaks promise, bumping its generation counter so
    /// a polling host can tell a new event arrived even if `last_signal`
    /// happens to repeat the previous one.
    pub fn post_peak_signal(&self, signal: PeakSignal) {
        let mut promise = self.peaks_promise.lock().expect("waveform peaks promise lock");
        promise.generation += 1;
        promise.last_signal = Some(signal);
    }

    /// Number of 65536-frame blocks spanning this waveform's full length.
    pub fn block_count(&self) -> u64 {
        self.n_frames.div_ceil(BLOCK_SIZE_FRAMES).max(1)
    }

    pub fn peak(&self) -> Option<Arc<PeakfileBody>> {
        self.peak.lock().expect("waveform peak lock").clone()
    }

    pub fn set_peak(&self, body: Arc<PeakfileBody>) {
        *self.peak.lock().expect("waveform peak lock") = Some(body);
    }

    pub fn hires_peak(&self, block_index: u64) -> Option<Arc<Peakbuf>> {
        self.hires_peaks
            .lock()
            .expect("waveform hires lock")
            .get(&block_index)
            .cloned()
    }

    /// Insert a peakbuf, keeping the existing one if it is already at least
    /// as fine-grained (lower `resolution` = higher detail).
    pub fn insert_hires_peak(&self, block_index: u64, peakbuf: Arc<Peakbuf>) {
        let mut peaks = self.hires_peaks.lock().expect("waveform hires lock");
        match peaks.get(&block_index) {
            Some(existing) if existing.resolution <= peakbuf.resolution => {}
            _ => {
                peaks.insert(block_index, peakbuf);
            }
        }
    }

    pub fn hires_peak_count(&self) -> usize {
        self.hires_peaks.lock().expect("waveform hires lock").len()
    }

    /// Clear every hi-res peak and low-res peak (used when dropping the
    /// waveform's last actor reference, §3 lifecycle).
    pub fn clear_peaks(&self) {
        self.hires_peaks.lock().expect("waveform hires lock").clear();
        *self.peak.lock().expect("waveform peak lock") = None;
    }

    pub fn render_data(&self, mode: Mode) -> bool {
        self.render_data.lock().expect("waveform render_data lock")[mode.index()].is_some()
    }

    pub fn ensure_render_data(&self, mode: Mode) {
        let mut slots = self.render_data.lock().expect("waveform render_data lock");
        slots[mode.index()].get_or_insert_with(ModeRenderData::default);
    }

    pub fn mark_block_loaded(&self, mode: Mode, block_index: u64) {
        let mut slots = self.render_data.lock().expect("waveform render_data lock");
        if let Some(data) = slots[mode.index()].as_mut() {
            data.loaded_blocks.insert(block_index);
        }
    }

    pub fn is_block_loaded(&self, mode: Mode, block_index: u64) -> bool {
        self.render_data.lock().expect("waveform render_data lock")[mode.index()]
            .as_ref()
            .map(|data| data.loaded_blocks.contains(&block_index))
            .unwrap_or(false)
    }

    /// Free this mode's render data (§4.8 `free(waveform)`).
    pub fn free_render_data(&self, mode: Mode) {
        self.render_data.lock().expect("waveform render_data lock")[mode.index()] = None;
    }
}

impl std::fmt::Debug for Waveform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waveform")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("n_frames", &self.n_frames)
            .field("n_channels", &self.n_channels)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_waveforms_get_distinct_ids() {
        let a = Waveform::new("a.wav".into(), 1000, 1, 44_100);
        let b = Waveform::new("b.wav".into(), 1000, 1, 44_100);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn block_count_rounds_up() {
        let wf = Waveform::new("a.wav".into(), BLOCK_SIZE_FRAMES + 1, 1, 44_100);
        assert_eq!(wf.block_count(), 2);
    }

    #[test]
    fn peaks_promise_starts_empty_and_bumps_on_signal() {
        let wf = Waveform::new("a.wav".into(), 1_000, 1, 44_100);
        let initial = wf.peaks_promise();
        assert_eq!(initial.generation, 0);
        assert!(initial.last_signal.is_none());

        wf.post_peak_signal(PeakSignal::PeakfileReady);
        let after = wf.peaks_promise();
        assert_eq!(after.generation, 1);
        assert!(matches!(after.last_signal, Some(PeakSignal::PeakfileReady)));

        wf.post_peak_signal(PeakSignal::HiresError { block_index: 3, reason: "boom".into() });
        let latest = wf.peaks_promise();
        assert_eq!(latest.generation, 2);
        assert!(matches!(latest.last_signal, Some(PeakSignal::HiresError { block_index: 3, .. })));
    }

    #[test]
    fn finer_resolution_hires_peak_wins() {
        let wf = Waveform::new("a.wav".into(), BLOCK_SIZE_FRAMES, 1, 44_100);
        let coarse = Arc::new(Peakbuf {
            block_index: 0,
            resolution: 16,
            channels: vec![vec![0; (BLOCK_SIZE_FRAMES / 16 * 2) as usize]],
            peak_level: 0,
        });
        let fine = Arc::new(Peakbuf {
            block_index: 0,
            resolution: 1,
            channels: vec![vec![0; (BLOCK_SIZE_FRAMES) as usize * 2]],
            peak_level: 0,
        });
        wf.insert_hires_peak(0, coarse);
        wf.insert_hires_peak(0, fine.clone());
        assert_eq!(wf.hires_peak(0).unwrap().resolution, 1);

        // A coarser request after the fine one is already present must not
        // downgrade it.
        let coarse_again = Arc::new(Peakbuf {
            block_index: 0,
            resolution: 16,
            channels: vec![vec![0; (BLOCK_SIZE_FRAMES / 16 * 2) as usize]],
            peak_level: 0,
        });
        wf.insert_hires_peak(0, coarse_again);
        assert_eq!(wf.hires_peak(0).unwrap().resolution, 1);
    }
}
