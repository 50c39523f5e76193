// The served tree: an immutable snapshot behind an atomically swapped pointer.

use std::sync::{Arc, PoisonError, RwLock};

use crate::vfs::Snapshot;

/// Shared handle to the current [`Snapshot`].
///
/// Readers clone the inner `Arc` and keep it for the whole response, so a
/// concurrent [`WorkingCopy::replace`] never tears a read. The lock is only
/// held for the pointer copy or swap.
#[derive(Debug, Clone)]
pub struct WorkingCopy {
    current: Arc<RwLock<Arc<Snapshot>>>,
}

impl WorkingCopy {
    pub fn new(snapshot: Snapshot) -> Self {
        Self { current: Arc::new(RwLock::new(Arc::new(snapshot))) }
    }

    /// The snapshot being served right now.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Swap in `next`, returning the snapshot it replaced.
    pub fn replace(&self, next: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(next);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, next)
    }

    pub fn commit_id(&self) -> Option<String> {
        self.snapshot().commit_id().map(str::to_string)
    }
}
