//! Single-writer / multi-reader snapshot publication.
//!
//! The writer swaps in a fresh `Arc<T>` on every publish; readers clone the
//! current `Arc` and never observe a partially written value. The lock is
//! held only for the pointer swap or clone, never across user code.

use parking_lot::RwLock;
use std::sync::Arc;

/// Write half. Not `Clone`: exactly one producer per snapshot.
pub struct SnapshotPublisher<T> {
    slot: Arc<RwLock<Arc<T>>>,
}

/// Read half. Cheap to clone and `Send + Sync` for `T: Send + Sync`.
pub struct SnapshotReader<T> {
    slot: Arc<RwLock<Arc<T>>>,
}

/// Create a publisher/reader pair seeded with `initial`.
pub fn snapshot<T>(initial: T) -> (SnapshotPublisher<T>, SnapshotReader<T>) {
    let slot = Arc::new(RwLock::new(Arc::new(initial)));
    (
        SnapshotPublisher { slot: slot.clone() },
        SnapshotReader { slot },
    )
}

impl<T> SnapshotPublisher<T> {
    pub fn publish(&self, value: T) {
        let next = Arc::new(value);
        *self.slot.write() = next;
    }

    pub fn reader(&self) -> SnapshotReader<T> {
        SnapshotReader {
            slot: self.slot.clone(),
        }
    }
}

impl<T> SnapshotReader<T> {
    /// Latest published value.
    pub fn load(&self) -> Arc<T> {
        self.slot.read().clone()
    }
}

impl<T: Clone> SnapshotReader<T> {
    pub fn get(&self) -> T {
        (*self.load()).clone()
    }
}

impl<T> Clone for SnapshotReader<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}
