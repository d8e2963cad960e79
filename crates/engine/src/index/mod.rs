//! Derived graph index: built off to the side from full scans and published
//! by swapping one reference.

pub mod builder;
pub mod directory;
pub mod graph;
pub mod interner;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub use builder::{rebuild, RebuildOutcome};
pub use directory::{DirectoryGraph, DirectoryNode};
pub use graph::{GraphIndex, GraphIndexParts, IndexedArticle, IDENTITY_TAGS};

/// Holder of the published [`GraphIndex`].
///
/// Every build takes a generation up front. A finished build is only
/// published when no build with a higher generation has been published
/// already, so an overtaken build is discarded.
#[derive(Debug)]
pub struct GraphIndexHandle {
    current: RwLock<Arc<GraphIndex>>,
    next_generation: AtomicU64,
}

impl Default for GraphIndexHandle {
    fn default() -> Self {
        Self {
            current: RwLock::new(Arc::new(GraphIndex::empty())),
            next_generation: AtomicU64::new(1),
        }
    }
}

impl GraphIndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// The published snapshot.
    pub fn current(&self) -> Arc<GraphIndex> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Reserve the generation for a new build.
    pub fn begin_build(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Publish `index` unless a newer one is already out. Returns whether it
    /// was published.
    pub fn publish(&self, index: Arc<GraphIndex>) -> bool {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if index.generation() > guard.generation() {
            *guard = index;
            true
        } else {
            false
        }
    }
}
