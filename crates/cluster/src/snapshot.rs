use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use foundation::bounds::Aabb2;
use parking_lot::RwLock;
use tracing::debug;

use crate::index::{ClusterIndex, ClusterOptions};
use crate::indexer::{FeatureTable, GeometryIndexer};

/// One immutable build: the cluster index plus the features it points into.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub clusters: ClusterIndex,
    pub features: FeatureTable,
    /// Bounds of every indexed point, `None` while empty.
    pub bounds: Option<Aabb2>,
}

impl IndexSnapshot {
    pub fn generation(&self) -> u64 {
        self.clusters.generation()
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Handle to the live index, shared between the loader and the renderer.
///
/// Readers take a cheap `Arc` of the current snapshot. A rebuild constructs
/// the next snapshot without holding the lock and then swaps it in, so a
/// reader sees either the old build or the new one in full.
#[derive(Debug, Clone)]
pub struct SharedIndex {
    current: Arc<RwLock<Arc<IndexSnapshot>>>,
    generation: Arc<AtomicU64>,
    options: ClusterOptions,
}

impl SharedIndex {
    pub fn new(options: ClusterOptions) -> Self {
        let empty = IndexSnapshot {
            clusters: ClusterIndex::empty(options, 0),
            features: FeatureTable::new(),
            bounds: None,
        };
        Self {
            current: Arc::new(RwLock::new(Arc::new(empty))),
            generation: Arc::new(AtomicU64::new(0)),
            options,
        }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.options
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    /// Rebuild from the indexer's full point set and publish the result.
    ///
    /// Generations only ever grow, across sessions too, so cluster ids from
    /// any earlier build are rejected by the new one.
    pub fn rebuild(&self, source: &GeometryIndexer) -> Arc<IndexSnapshot> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let clusters = ClusterIndex::build(self.options, generation, source.points());
        let next = Arc::new(IndexSnapshot {
            clusters,
            features: source.table().clone(),
            bounds: source.bounds(),
        });
        debug!(generation, points = next.len(), "cluster index rebuilt");

        *self.current.write() = next.clone();
        next
    }

    /// Publish an empty build, e.g. when a new session starts.
    pub fn clear(&self) -> Arc<IndexSnapshot> {
        self.rebuild(&GeometryIndexer::new())
    }
}

impl Default for SharedIndex {
    fn default() -> Self {
        Self::new(ClusterOptions::default())
    }
}
