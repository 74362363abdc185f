use crate::proto::WorkItem;
use rand::Rng;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// WorkQueue holds pending work that workers drain at random
///
/// Architecture:
/// - A single `Mutex<Vec<WorkItem>>` serializes every operation
/// - `hash` is the key: no two held items share one
/// - `pop_random` picks a uniform slot, swaps it with the last slot and
///   truncates, so removal is O(1) and arrival order is not preserved
///
/// Random selection keeps many workers draining one backlog from
/// systematically favoring any item. Lookups hand back clones; nothing
/// outside the lock ever references a slot.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<Vec<WorkItem>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoning is ignored: every write is a single Vec call.
    fn lock(&self) -> MutexGuard<'_, Vec<WorkItem>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True iff an item with `hash` is currently held
    pub fn exists(&self, hash: &str) -> bool {
        index_of(&self.lock(), hash).is_some()
    }

    /// Insert `item` unless its hash is already held.
    ///
    /// Returns true when the item was inserted.
    pub fn put(&self, item: WorkItem) -> bool {
        let mut items = self.lock();
        if index_of(&items, &item.hash).is_some() {
            debug!(hash = %item.hash, "Work already queued, ignoring");
            return false;
        }

        debug!(hash = %item.hash, queued = items.len() + 1, "Work queued");
        items.push(item);
        true
    }

    /// Copy of the item held under `hash`
    pub fn get(&self, hash: &str) -> Option<WorkItem> {
        let items = self.lock();
        index_of(&items, hash).map(|idx| items[idx].clone())
    }

    /// Remove the item held under `hash`.
    ///
    /// Absent hashes are a no-op: a cancel can race a pop that already
    /// claimed the item, or arrive before the item was ever queued.
    /// Returns true when something was removed.
    pub fn delete(&self, hash: &str) -> bool {
        let mut items = self.lock();
        match index_of(&items, hash) {
            Some(idx) => {
                items.swap_remove(idx);
                debug!(hash, "Work removed from queue");
                true
            }
            None => false,
        }
    }

    /// Remove and return a uniformly random item, `None` when empty
    pub fn pop_random(&self) -> Option<WorkItem> {
        let mut items = self.lock();
        if items.is_empty() {
            return None;
        }

        let idx = rand::thread_rng().gen_range(0..items.len());
        Some(items.swap_remove(idx))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn index_of(items: &[WorkItem], hash: &str) -> Option<usize> {
    items.iter().position(|item| item.hash == hash)
}
