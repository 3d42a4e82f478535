//! Fixed-size object cache with per-slot reader/writer synchronization.
//!
//! The cache is a table of `CACHE_SLOTS` slots. Each slot carries its own
//! `RwLock` so lookups of different slots never contend and any number of
//! readers may stream the same blob concurrently, plus a separate recency
//! mutex so admission-time aging never touches the blob lock of other
//! slots. Replacement is LRU over an integer recency counter that changes
//! only on admission; serving a hit does not refresh an entry.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, OwnedRwLockReadGuard, RwLock};

use crate::{CACHE_SLOTS, MAX_KEY_LEN, MAX_OBJECT_SIZE};

/// A cached (key, blob) pair. The blob holds the raw origin response,
/// status line and headers included, at its true length.
struct CachedObject {
    key: String,
    body: Bytes,
}

/// Recency record, guarded by its own mutex so the admission sweep can
/// age other slots without acquiring their blob locks. `age` is only
/// meaningful relative to other slots and may go negative after enough
/// admissions. `populated` mirrors slot emptiness.
#[derive(Default)]
struct Recency {
    age: i64,
    populated: bool,
}

struct CacheSlot {
    state: Arc<RwLock<Option<CachedObject>>>,
    recency: Mutex<Recency>,
}

impl CacheSlot {
    fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(None)),
            recency: Mutex::new(Recency::default()),
        }
    }
}

/// A successful lookup. Holds the slot's read guard for its lifetime, so
/// the blob cannot be overwritten while the caller streams it. Drop the
/// handle to release the slot.
pub struct CacheHit {
    guard: OwnedRwLockReadGuard<Option<CachedObject>, CachedObject>,
}

impl CacheHit {
    /// The cached bytes, exactly as admitted.
    pub fn body(&self) -> &[u8] {
        &self.guard.body
    }
}

/// Shared handle to the slot table. Cloning is cheap; all clones operate
/// on the same table.
#[derive(Clone)]
pub struct ProxyCache {
    slots: Arc<Vec<CacheSlot>>,
}

impl ProxyCache {
    pub fn new() -> Self {
        Self::with_slots(CACHE_SLOTS)
    }

    /// A cache with a custom slot count, mainly for tests.
    pub fn with_slots(n: usize) -> Self {
        Self {
            slots: Arc::new((0..n).map(|_| CacheSlot::new()).collect()),
        }
    }

    /// Scan slots in index order and return a pinned handle to the first
    /// non-empty slot whose key matches. Lookup does not refresh recency.
    pub async fn lookup(&self, key: &str) -> Option<CacheHit> {
        for slot in self.slots.iter() {
            let guard = slot.state.clone().read_owned().await;
            match OwnedRwLockReadGuard::try_map(guard, |state| {
                state.as_ref().filter(|object| object.key == key)
            }) {
                Ok(hit) => return Some(CacheHit { guard: hit }),
                Err(_miss) => {}
            }
        }
        None
    }

    /// Install `(key, body)` over the current victim slot. Returns false
    /// without touching the table when the body or key is oversized.
    ///
    /// The victim is overwritten under its exclusive write lock and given
    /// the maximum recency; every other populated slot then ages by one
    /// under its recency mutex. Admissions are not deduplicated: two
    /// concurrent misses on the same key may both land, and lookups will
    /// return the first of them.
    pub async fn admit(&self, key: &str, body: Bytes) -> bool {
        if body.len() > MAX_OBJECT_SIZE || key.len() > MAX_KEY_LEN {
            return false;
        }

        let victim = self.select_victim().await;
        let slot = &self.slots[victim];

        let mut state = slot.state.clone().write_owned().await;
        *state = Some(CachedObject {
            key: key.to_string(),
            body,
        });
        {
            let mut recency = slot.recency.lock().await;
            recency.age = self.slots.len() as i64;
            recency.populated = true;
        }

        // Age the rest of the table while still excluding readers of the
        // victim, so the new entry is strictly younger than anything aged
        // in this pass. Only recency mutexes are taken here.
        for (index, other) in self.slots.iter().enumerate() {
            if index == victim {
                continue;
            }
            let mut recency = other.recency.lock().await;
            if recency.populated {
                recency.age -= 1;
            }
        }
        drop(state);
        true
    }

    /// Pick the slot to overwrite: the first empty slot if any, otherwise
    /// the smallest recency with ties going to the lowest index. Runs
    /// under read locks only; a concurrent admission may race the choice,
    /// which is safe because LRU here is advisory.
    async fn select_victim(&self) -> usize {
        let mut min_age = i64::MAX;
        let mut victim = 0;
        for (index, slot) in self.slots.iter().enumerate() {
            let state = slot.state.read().await;
            if state.is_none() {
                return index;
            }
            let recency = slot.recency.lock().await;
            if recency.age < min_age {
                min_age = recency.age;
                victim = index;
            }
            drop(recency);
            drop(state);
        }
        victim
    }

    /// Number of populated slots.
    pub async fn len(&self) -> usize {
        let mut count = 0;
        for slot in self.slots.iter() {
            if slot.state.read().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ProxyCache {
    fn default() -> Self {
        Self::new()
    }
}
