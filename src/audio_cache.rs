//! Audio block cache (C4).
//!
//! An LRU map of `(waveform, block-index) -> AudioBlock`, bounded by total
//! shorts allocated across all blocks rather than by entry count — the same
//! `HashMap` + `VecDeque` shape the rest of the codebase uses for its
//! caches, but with stamps driven by an explicit monotonic counter (§3
//! "LRU stamp derived from a global monotonically-increasing counter")
//! instead of touch-order alone, so eviction picks the true least-recently
//! stamped entry even when many keys are touched without reinsertion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::waveform::{BLOCK_SIZE_FRAMES, WaveformId};

/// Hard cap on total shorts allocated across all cached blocks (2^23).
pub const MAX_CACHE_SHORTS: u64 = 1 << 23;

static NEXT_STAMP: AtomicU64 = AtomicU64::new(1);

fn next_stamp() -> u64 {
    NEXT_STAMP.fetch_add(1, Ordering::Relaxed)
}

/// One loaded audio block (`WfBuf16`): up to two equal-length 16-bit
/// channel buffers covering at most [`BLOCK_SIZE_FRAMES`] frames.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    pub block_index: u64,
    pub left: Vec<i16>,
    pub right: Option<Vec<i16>>,
}

impl AudioBlock {
    pub fn frame_count(&self) -> usize {
        self.left.len()
    }

    /// Total shorts this block occupies in the cache's capacity accounting.
    pub fn shorts(&self) -> u64 {
        (self.left.len() + self.right.as_ref().map_or(0, |r| r.len())) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    waveform: WaveformId,
    block_index: u64,
}

struct Entry {
    block: std::sync::Arc<AudioBlock>,
    stamp: u64,
}

struct Inner {
    map: HashMap<CacheKey, Entry>,
    total_shorts: u64,
    capacity_shorts: u64,
}

impl Inner {
    fn new(capacity_shorts: u64) -> Self {
        Self {
            map: HashMap::new(),
            total_shorts: 0,
            capacity_shorts,
        }
    }

    fn evict_until_fits(&mut self, incoming_shorts: u64) {
        while self.total_shorts + incoming_shorts > self.capacity_shorts {
            let Some((&key, _)) = self
                .map
                .iter()
                .min_by_key(|(_, entry)| entry.stamp)
            else {
                // Nothing left to evict; the insertion proceeds over cap and
                // is logged by the caller (§4.2 "insertion still proceeds").
                break;
            };
            if let Some(entry) = self.map.remove(&key) {
                self.total_shorts -= entry.block.shorts();
            } else {
                break;
            }
        }
    }
}

/// Global LRU cache of loaded audio blocks, shared across every waveform.
pub struct AudioCache {
    inner: Mutex<Inner>,
}

impl AudioCache {
    pub fn new(capacity_shorts: u64) -> Self {
        Self {
            inner: Mutex::new(Inner::new(capacity_shorts)),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(MAX_CACHE_SHORTS)
    }

    /// Look up a block, bumping its stamp on a hit.
    pub fn get(&self, waveform: WaveformId, block_index: u64) -> Option<std::sync::Arc<AudioBlock>> {
        let mut inner = self.inner.lock().expect("audio cache lock");
        let key = CacheKey { waveform, block_index };
        let stamp = next_stamp();
        if let Some(entry) = inner.map.get_mut(&key) {
            entry.stamp = stamp;
            Some(entry.block.clone())
        } else {
            None
        }
    }

    /// Insert a freshly loaded block, evicting least-recently-stamped
    /// entries until it fits within the shorts cap.
    pub fn insert(&self, waveform: WaveformId, block: AudioBlock) {
        let mut inner = self.inner.lock().expect("audio cache lock");
        let shorts = block.shorts();
        inner.evict_until_fits(shorts);
        let key = CacheKey {
            waveform,
            block_index: block.block_index,
        };
        let stamp = next_stamp();
        if let Some(old) = inner.map.insert(
            key,
            Entry {
                block: std::sync::Arc::new(block),
                stamp,
            },
        ) {
            inner.total_shorts -= old.block.shorts();
        }
        inner.total_shorts += shorts;
    }

    /// Drop every block belonging to `waveform` (waveform destruction, §3).
    pub fn evict_waveform(&self, waveform: WaveformId) {
        let mut inner = self.inner.lock().expect("audio cache lock");
        let freed: u64 = inner
            .map
            .iter()
            .filter(|(key, _)| key.waveform == waveform)
            .map(|(_, entry)| entry.block.shorts())
            .sum();
        inner.map.retain(|key, _| key.waveform != waveform);
        inner.total_shorts -= freed;
    }

    pub fn total_shorts(&self) -> u64 {
        self.inner.lock().expect("audio cache lock").total_shorts
    }

    pub fn contains(&self, waveform: WaveformId, block_index: u64) -> bool {
        let inner = self.inner.lock().expect("audio cache lock");
        inner.map.contains_key(&CacheKey { waveform, block_index })
    }
}

fn block_for_test(index: u64, frames: usize) -> AudioBlock {
    AudioBlock {
        block_index: index,
        left: vec![0i16; frames],
        right: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf(n: u64) -> WaveformId {
        // WaveformId has no public constructor outside `Waveform::new`; use
        // a real waveform so tests exercise the real identity type.
        let waveform = crate::waveform::Waveform::new(format!("wf{n}.wav").into(), 1, 1, 44_100);
        waveform.id()
    }

    #[test]
    fn lru_eviction_keeps_most_recently_touched() {
        // Cap = 8 blocks * 65536 shorts.
        let cache = AudioCache::new(8 * BLOCK_SIZE_FRAMES);
        let waveform = wf(1);

        for i in 0..16u64 {
            cache.insert(waveform, block_for_test(i, BLOCK_SIZE_FRAMES as usize));
            // Touch block 0 again between each load, as the scenario specifies.
            cache.get(waveform, 0);
        }

        // Block 0 is re-touched every round, so it occupies one of the 8
        // slots for the whole run; the other 7 slots roll over one-in
        // one-out as blocks 1..15 arrive, leaving the most recent 7 plus
        // block 0 resident.
        for expected in [0u64, 9, 10, 11, 12, 13, 14, 15] {
            assert!(cache.contains(waveform, expected), "expected block {expected} present");
        }
        for evicted in 1..=8u64 {
            assert!(!cache.contains(waveform, evicted), "expected block {evicted} evicted");
        }
        assert!(cache.total_shorts() <= 8 * BLOCK_SIZE_FRAMES);
    }

    #[test]
    fn total_shorts_never_exceeds_cap_after_many_inserts() {
        let cap = 4 * BLOCK_SIZE_FRAMES;
        let cache = AudioCache::new(cap);
        let waveform = wf(2);
        for i in 0..50u64 {
            cache.insert(waveform, block_for_test(i, BLOCK_SIZE_FRAMES as usize));
            assert!(cache.total_shorts() <= cap);
        }
    }

    #[test]
    fn evict_waveform_removes_only_its_own_blocks() {
        let cache = AudioCache::new(100 * BLOCK_SIZE_FRAMES);
        let a = wf(3);
        let b = wf(4);
        cache.insert(a, block_for_test(0, 100));
        cache.insert(b, block_for_test(0, 100));

        cache.evict_waveform(a);
        assert!(!cache.contains(a, 0));
        assert!(cache.contains(b, 0));
    }
}
