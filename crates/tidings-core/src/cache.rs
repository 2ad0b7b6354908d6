//! Ordered, deduplicated result cache owned by one live query.
//!
//! Items live in a `BTreeMap` keyed by a signed slot number; the key index maps
//! identity to slot. Pushing takes the next slot after the current tail and
//! unshifting takes the slot before the current head, so neither end needs to
//! renumber existing items. Only `sort_by` rebuilds the slots.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

/// Anything with a stable identity that can be held in an [`OrderedResultCache`].
pub trait Keyed {
    type Key: Clone + Eq + Hash + Debug + Send + Sync;

    fn key(&self) -> Self::Key;
}

#[derive(Debug, Clone)]
pub struct OrderedResultCache<T: Keyed> {
    slots: BTreeMap<i64, T>,
    index: HashMap<T::Key, i64>,
    next_front: i64,
    next_back: i64,
    head: bool,
    tail: bool,
}

impl<T: Keyed> Default for OrderedResultCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed> OrderedResultCache<T> {
    pub fn new() -> Self {
        Self {
            slots: BTreeMap::new(),
            index: HashMap::new(),
            next_front: -1,
            next_back: 0,
            head: false,
            tail: false,
        }
    }

    /// Build a cache from items already in the desired order. Later duplicates are dropped.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let mut cache = Self::new();
        cache.append(items);
        cache
    }

    // ===== Boundary flags =====

    pub fn is_head(&self) -> bool {
        self.head
    }

    pub fn set_head(&mut self, head: bool) {
        self.head = head;
    }

    pub fn is_tail(&self) -> bool {
        self.tail
    }

    pub fn set_tail(&mut self, tail: bool) {
        self.tail = tail;
    }

    // ===== Getters =====

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, key: &T::Key) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &T::Key) -> Option<&T> {
        let slot = self.index.get(key)?;
        self.slots.get(slot)
    }

    pub fn first(&self) -> Option<&T> {
        self.slots.values().next()
    }

    pub fn last(&self) -> Option<&T> {
        self.slots.values().next_back()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.slots.values()
    }

    pub fn keys(&self) -> Vec<T::Key> {
        self.slots.values().map(Keyed::key).collect()
    }

    // ===== Mutations =====

    /// Insert at the tail. Returns false (and changes nothing) for a known identity.
    pub fn push(&mut self, item: T) -> bool {
        let key = item.key();
        if self.index.contains_key(&key) {
            return false;
        }
        let slot = self.next_back;
        self.next_back += 1;
        self.index.insert(key, slot);
        self.slots.insert(slot, item);
        true
    }

    /// Insert at the head. Returns false (and changes nothing) for a known identity.
    pub fn unshift(&mut self, item: T) -> bool {
        let key = item.key();
        if self.index.contains_key(&key) {
            return false;
        }
        let slot = self.next_front;
        self.next_front -= 1;
        self.index.insert(key, slot);
        self.slots.insert(slot, item);
        true
    }

    /// Append in iteration order. Returns the number of items actually inserted.
    pub fn append(&mut self, items: impl IntoIterator<Item = T>) -> usize {
        items.into_iter().map(|item| self.push(item) as usize).sum()
    }

    /// Prepend keeping the given order, so `items[0]` becomes the new first item.
    pub fn prepend(&mut self, items: Vec<T>) -> usize {
        items
            .into_iter()
            .rev()
            .map(|item| self.unshift(item) as usize)
            .sum()
    }

    /// Replace the item with the same identity in place. Unknown identities are ignored.
    pub fn update(&mut self, item: T) -> bool {
        let Some(slot) = self.index.get(&item.key()) else {
            return false;
        };
        match self.slots.get_mut(slot) {
            Some(existing) => {
                *existing = item;
                true
            }
            None => false,
        }
    }

    pub fn delete(&mut self, key: &T::Key) -> Option<T> {
        let slot = self.index.remove(key)?;
        self.slots.remove(&slot)
    }

    pub fn delete_all(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.next_front = -1;
        self.next_back = 0;
    }

    /// Remove and return the last item.
    pub fn pop(&mut self) -> Option<T> {
        let (_, item) = self.slots.pop_last()?;
        self.index.remove(&item.key());
        Some(item)
    }

    /// Remove and return the first item.
    pub fn shift(&mut self) -> Option<T> {
        let (_, item) = self.slots.pop_first()?;
        self.index.remove(&item.key());
        Some(item)
    }

    /// Remove every item for which `keep` returns false. Returns the removed items.
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let doomed: Vec<i64> = self
            .slots
            .iter()
            .filter(|(_, item)| !keep(item))
            .map(|(slot, _)| *slot)
            .collect();

        doomed
            .into_iter()
            .filter_map(|slot| {
                let item = self.slots.remove(&slot)?;
                self.index.remove(&item.key());
                Some(item)
            })
            .collect()
    }

    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(&T, &T) -> Ordering,
    {
        let mut items: Vec<T> = std::mem::take(&mut self.slots).into_values().collect();
        items.sort_by(|a, b| compare(a, b));
        self.index.clear();
        self.next_front = -1;
        self.next_back = 0;
        for item in items {
            self.push(item);
        }
    }
}

impl<T: Keyed + Clone> OrderedResultCache<T> {
    /// Owned snapshot of the current order, safe to hand to observers.
    pub fn copy(&self) -> Vec<T> {
        self.slots.values().cloned().collect()
    }
}
