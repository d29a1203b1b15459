//! GPU texture cache (C7).
//!
//! A fixed-size pool of texture slots keyed by `(waveform, block,
//! resolution-class)`. On a miss the slot with the smallest timestamp is
//! reassigned; if it currently holds another binding, a steal callback
//! fires first so the previous owner can drop its reference. Slot storage
//! uses the same `HashMap` + timestamp-scan shape as [`crate::audio_cache`]
//! rather than a linked list, kept dense per resolution class as the design
//! notes suggest (§9 "use a dense array per resolution class").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::mode::Mode;
use crate::waveform::WaveformId;

/// Opaque GL texture identifier. The crate never allocates or binds GL
/// objects itself (out of scope, §1); callers supply and interpret this id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// Composite cache key: waveform identity, block index, and the mode a
/// block was rendered at doubles as the resolution-class component (§4.5,
/// §9 "store resolution class in the key").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub waveform: WaveformId,
    pub block_index: u64,
    pub resolution_class: Mode,
}

static NEXT_TIMESTAMP: AtomicU64 = AtomicU64::new(1);

fn next_timestamp() -> u64 {
    NEXT_TIMESTAMP.fetch_add(1, Ordering::Relaxed)
}

struct Slot {
    texture: TextureId,
    binding: Option<TextureKey>,
    timestamp: u64,
}

struct Inner {
    slots: Vec<Slot>,
    index: std::collections::HashMap<TextureKey, usize>,
}

/// Callback invoked when a slot's prior binding is stolen by a new key.
pub trait StealListener: Send {
    fn on_steal(&self, stolen: TextureKey);
}

impl<F: Fn(TextureKey) + Send> StealListener for F {
    fn on_steal(&self, stolen: TextureKey) {
        self(stolen)
    }
}

/// Fixed-size LRU pool of GPU texture slots.
pub struct TextureCache {
    inner: Mutex<Inner>,
    steal_listener: Box<dyn StealListener>,
}

impl TextureCache {
    /// Create a pool with one slot per `textures[i]`, backed by
    /// already-allocated GL texture ids (allocated once at GL-context-create
    /// time per §4.5).
    pub fn new(textures: Vec<TextureId>, steal_listener: impl StealListener + 'static) -> Self {
        let slots = textures
            .into_iter()
            .map(|texture| Slot {
                texture,
                binding: None,
                timestamp: 0,
            })
            .collect();
        Self {
            inner: Mutex::new(Inner {
                slots,
                index: std::collections::HashMap::new(),
            }),
            steal_listener: Box::new(steal_listener),
        }
    }

    /// Look up `key`, bumping the slot's timestamp on a hit.
    pub fn lookup(&self, key: TextureKey) -> Option<TextureId> {
        let mut inner = self.inner.lock().expect("texture cache lock");
        let slot_index = *inner.index.get(&key)?;
        let timestamp = next_timestamp();
        let slot = &mut inner.slots[slot_index];
        slot.timestamp = timestamp;
        Some(slot.texture)
    }

    /// Assign `key` to the least-recently-used slot, stealing and notifying
    /// the previous owner if the slot was bound. Returns the texture id to
    /// upload into.
    pub fn assign(&self, key: TextureKey) -> TextureId {
        let mut inner = self.inner.lock().expect("texture cache lock");
        let slot_index = inner
            .slots
            .iter()
            .enumerate()
            .min_by_key(|(_, slot)| slot.timestamp)
            .map(|(index, _)| index)
            .expect("texture cache pool is empty");

        let stolen = inner.slots[slot_index].binding.take();
        if let Some(stolen_key) = stolen {
            inner.index.remove(&stolen_key);
            self.steal_listener.on_steal(stolen_key);
        }

        let timestamp = next_timestamp();
        let slot = &mut inner.slots[slot_index];
        slot.binding = Some(key);
        slot.timestamp = timestamp;
        inner.index.insert(key, slot_index);
        slot.texture
    }

    /// Look up `key`, assigning a fresh slot on a miss.
    pub fn lookup_or_assign(&self, key: TextureKey) -> (TextureId, bool) {
        if let Some(texture) = self.lookup(key) {
            (texture, false)
        } else {
            (self.assign(key), true)
        }
    }

    /// Invalidate exactly the slot bound to `key`, if any.
    pub fn invalidate(&self, key: TextureKey) {
        let mut inner = self.inner.lock().expect("texture cache lock");
        if let Some(slot_index) = inner.index.remove(&key) {
            inner.slots[slot_index].binding = None;
            inner.slots[slot_index].timestamp = 0;
        }
    }

    /// Invalidate every slot bound to `waveform`, regardless of block or
    /// resolution class (waveform destruction, §3).
    pub fn invalidate_waveform(&self, waveform: WaveformId) {
        let mut inner = self.inner.lock().expect("texture cache lock");
        let keys: Vec<TextureKey> = inner
            .index
            .keys()
            .filter(|key| key.waveform == waveform)
            .copied()
            .collect();
        for key in keys {
            if let Some(slot_index) = inner.index.remove(&key) {
                inner.slots[slot_index].binding = None;
                inner.slots[slot_index].timestamp = 0;
            }
        }
    }

    /// Clear every slot's binding without deallocating the fixed-size slot
    /// array itself, for the "GL context lost" entry point (§9 open
    /// question). The block-range/actor layers re-request loads on the next
    /// frame exactly as after a normal steal.
    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock().expect("texture cache lock");
        inner.index.clear();
        for slot in &mut inner.slots {
            slot.binding = None;
            slot.timestamp = 0;
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().expect("texture cache lock").slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    fn textures(n: u32) -> Vec<TextureId> {
        (0..n).map(TextureId).collect()
    }

    fn wf(n: u64) -> WaveformId {
        crate::waveform::Waveform::new(format!("wf{n}.wav").into(), 1, 1, 44_100).id()
    }

    #[test]
    fn texture_steal_fires_at_capacity_plus_one() {
        let stolen: Arc<StdMutex<Vec<TextureKey>>> = Arc::new(StdMutex::new(Vec::new()));
        let stolen_clone = stolen.clone();
        let cache = TextureCache::new(textures(64), move |key: TextureKey| {
            stolen_clone.lock().unwrap().push(key);
        });
        let waveform = wf(1);

        for block in 0..65u64 {
            let key = TextureKey {
                waveform,
                block_index: block,
                resolution_class: Mode::Hi,
            };
            cache.assign(key);
        }

        let stolen = stolen.lock().unwrap();
        assert_eq!(stolen.len(), 1);
        assert_eq!(stolen[0].block_index, 0);
        assert_eq!(stolen[0].waveform, waveform);
    }

    #[test]
    fn lookup_hit_does_not_trigger_steal() {
        let cache = TextureCache::new(textures(4), |_: TextureKey| {
            panic!("should not steal when capacity isn't exceeded");
        });
        let waveform = wf(2);
        let key = TextureKey {
            waveform,
            block_index: 0,
            resolution_class: Mode::Hi,
        };
        let first = cache.assign(key);
        let second = cache.lookup(key).expect("key should be present after assign");
        assert_eq!(first, second);
    }

    #[test]
    fn invalidate_all_clears_bindings_but_keeps_capacity() {
        let cache = TextureCache::new(textures(4), |_: TextureKey| {});
        let waveform = wf(3);
        let key = TextureKey {
            waveform,
            block_index: 0,
            resolution_class: Mode::Low,
        };
        cache.assign(key);
        assert!(cache.lookup(key).is_some());

        cache.invalidate_all();
        assert!(cache.lookup(key).is_none());
        assert_eq!(cache.capacity(), 4);
    }
}
