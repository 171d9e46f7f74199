//! Pluggable backing store for the pattern and result caches.
//!
//! Two functionally equivalent maps: a single reader-writer-locked
//! `HashMap`, and a sharded `DashMap` for contended workloads. The choice
//! is fixed at construction and observable only through the `using_tbb`
//! metrics flag. Closure-taking accessors run while the relevant guard is
//! held, which is what lets the pattern cache increment refcounts before
//! the lookup lock drops.

use dashmap::DashMap;
use std::collections::hash_map::Entry as HashMapEntry;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

fn read_recover<V>(lock: &RwLock<HashMap<u64, V>>) -> RwLockReadGuard<'_, HashMap<u64, V>> {
    lock.read().unwrap_or_else(|poisoned| {
        warn!("cache map read lock poisoned; recovering");
        poisoned.into_inner()
    })
}

fn write_recover<V>(lock: &RwLock<HashMap<u64, V>>) -> RwLockWriteGuard<'_, HashMap<u64, V>> {
    lock.write().unwrap_or_else(|poisoned| {
        warn!("cache map write lock poisoned; recovering");
        poisoned.into_inner()
    })
}

pub(crate) enum Store<V> {
    Locked(RwLock<HashMap<u64, V>>),
    Sharded(DashMap<u64, V>),
}

impl<V> Store<V> {
    pub(crate) fn new(sharded: bool) -> Self {
        if sharded {
            Store::Sharded(DashMap::new())
        } else {
            Store::Locked(RwLock::new(HashMap::new()))
        }
    }

    pub(crate) fn is_sharded(&self) -> bool {
        matches!(self, Store::Sharded(_))
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Store::Locked(map) => read_recover(map).len(),
            Store::Sharded(map) => map.len(),
        }
    }

    /// Run `f` against the entry for `key` while the lookup guard is held.
    pub(crate) fn get_and<R>(&self, key: u64, f: impl FnOnce(&V) -> R) -> Option<R> {
        match self {
            Store::Locked(map) => read_recover(map).get(&key).map(f),
            Store::Sharded(map) => map.get(&key).map(|entry| f(entry.value())),
        }
    }

    /// Insert `value` if `key` is absent. If an entry already exists, run
    /// `on_existing` against it under the write guard and return its result;
    /// `value` is dropped in that case.
    pub(crate) fn insert_or_get<R>(
        &self,
        key: u64,
        value: V,
        on_existing: impl FnOnce(&V) -> R,
    ) -> Option<R> {
        match self {
            Store::Locked(map) => match write_recover(map).entry(key) {
                HashMapEntry::Occupied(entry) => Some(on_existing(entry.get())),
                HashMapEntry::Vacant(slot) => {
                    slot.insert(value);
                    None
                }
            },
            Store::Sharded(map) => match map.entry(key) {
                dashmap::mapref::entry::Entry::Occupied(entry) => Some(on_existing(entry.get())),
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    slot.insert(value);
                    None
                }
            },
        }
    }

    /// Remove and return the entry for `key` if `pred` holds for it. The
    /// predicate and the removal are atomic with respect to readers.
    pub(crate) fn remove_if(&self, key: u64, pred: impl FnOnce(&V) -> bool) -> Option<V> {
        match self {
            Store::Locked(map) => {
                let mut guard = write_recover(map);
                if guard.get(&key).map(pred).unwrap_or(false) {
                    guard.remove(&key)
                } else {
                    None
                }
            }
            Store::Sharded(map) => map.remove_if(&key, |_, value| pred(value)).map(|(_, v)| v),
        }
    }

    /// Visit every entry. Visitors must not call back into the same store.
    pub(crate) fn for_each(&self, mut f: impl FnMut(u64, &V)) {
        match self {
            Store::Locked(map) => {
                for (key, value) in read_recover(map).iter() {
                    f(*key, value);
                }
            }
            Store::Sharded(map) => {
                for entry in map.iter() {
                    f(*entry.key(), entry.value());
                }
            }
        }
    }

    /// Remove and return all entries.
    pub(crate) fn drain(&self) -> Vec<(u64, V)> {
        match self {
            Store::Locked(map) => write_recover(map).drain().collect(),
            Store::Sharded(map) => {
                let keys: Vec<u64> = map.iter().map(|entry| *entry.key()).collect();
                keys.into_iter().filter_map(|key| map.remove(&key)).collect()
            }
        }
    }
}
