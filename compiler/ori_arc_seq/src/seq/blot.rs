//! Insertion-ordered map with tombstoning.
//!
//! Pairing maps are drained in discovery order while entries consumed by
//! an earlier matching set are invalidated. Blotting replaces the value
//! with [`Slot::Blotted`] in place, so iteration over the remaining entries
//! is undisturbed and a blotted key is never resurrected within the round.

use std::hash::Hash;

use rustc_hash::FxHashMap;

/// A map slot: either a live value or a tombstone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Slot<V> {
    Live(V),
    Blotted,
}

#[derive(Clone, Debug)]
pub(crate) struct BlotMap<K, V> {
    index: FxHashMap<K, usize>,
    entries: Vec<(K, Slot<V>)>,
}

impl<K, V> Default for BlotMap<K, V> {
    fn default() -> Self {
        Self {
            index: FxHashMap::default(),
            entries: Vec::new(),
        }
    }
}

impl<K: Copy + Eq + Hash, V> BlotMap<K, V> {
    /// Live value for `key`, inserting `make()` if the key is new.
    ///
    /// Returns `None` if the key was blotted.
    pub(crate) fn get_or_insert_with(&mut self, key: K, make: impl FnOnce() -> V) -> Option<&mut V> {
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                let idx = self.entries.len();
                self.index.insert(key, idx);
                self.entries.push((key, Slot::Live(make())));
                idx
            }
        };
        match &mut self.entries[idx].1 {
            Slot::Live(value) => Some(value),
            Slot::Blotted => None,
        }
    }

    /// Live value for `key`; `None` if absent or blotted.
    pub(crate) fn get(&self, key: &K) -> Option<&V> {
        let &idx = self.index.get(key)?;
        match &self.entries[idx].1 {
            Slot::Live(value) => Some(value),
            Slot::Blotted => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let &idx = self.index.get(key)?;
        match &mut self.entries[idx].1 {
            Slot::Live(value) => Some(value),
            Slot::Blotted => None,
        }
    }

    /// Tombstone `key`. Returns `true` if a live entry was blotted.
    pub(crate) fn blot(&mut self, key: &K) -> bool {
        let Some(&idx) = self.index.get(key) else {
            return false;
        };
        let slot = &mut self.entries[idx].1;
        let was_live = matches!(slot, Slot::Live(_));
        *slot = Slot::Blotted;
        was_live
    }

    pub(crate) fn is_blotted(&self, key: &K) -> bool {
        self.index
            .get(key)
            .is_some_and(|&idx| matches!(self.entries[idx].1, Slot::Blotted))
    }

    /// Snapshot of the live keys in insertion order.
    pub(crate) fn live_keys(&self) -> Vec<K> {
        self.entries
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Live(_)))
            .map(|(key, _)| *key)
            .collect()
    }
}
