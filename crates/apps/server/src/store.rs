//! Keyset-ordered feature storage behind a bounded connection pool.

use std::collections::BTreeMap;
use std::future::Future;
use std::ops::Bound;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use formats::feature::{CollectionError, Feature};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read feature file: {0}")]
    Io(#[from] std::io::Error),
    #[error("feature file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Collection(#[from] CollectionError),
    #[error("connection pool is closed")]
    PoolClosed,
}

/// Ordered range access over features keyed by id.
pub trait FeatureStore: Send + Sync {
    /// Up to `limit` features with `id > after`, ascending by id.
    fn page_after(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Feature>, StoreError>>;
}

/// All features held in memory, ordered by id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: BTreeMap<u64, Feature>,
}

impl MemoryStore {
    pub fn new(features: impl IntoIterator<Item = Feature>) -> Self {
        let mut rows = BTreeMap::new();
        for f in features {
            if let Some(prev) = rows.insert(f.id, f) {
                warn!(id = prev.id, "duplicate feature id; keeping the later row");
            }
        }
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parse a GeoJSON `FeatureCollection`.
    ///
    /// Ids come from `id`, then `properties.id`, else the 1-based position in
    /// the collection. Entries that are not features are skipped.
    pub fn from_geojson_value(value: &Value) -> Result<Self, StoreError> {
        let items = value
            .as_object()
            .filter(|o| o.get("type").and_then(Value::as_str) == Some("FeatureCollection"))
            .and_then(|o| o.get("features"))
            .and_then(Value::as_array)
            .ok_or(CollectionError::NotAFeatureCollection)?;

        let mut features = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match Feature::from_geojson_value(item, Some(index as u64 + 1)) {
                Ok(f) => features.push(f),
                Err(err) => debug!(index, %err, "skipping collection entry"),
            }
        }
        Ok(Self::new(features))
    }

    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        let text = tokio::fs::read_to_string(path).await?;
        let value: Value = serde_json::from_str(&text)?;
        Self::from_geojson_value(&value)
    }
}

impl FeatureStore for MemoryStore {
    fn page_after(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Feature>, StoreError>> {
        let lower = match after {
            Some(id) => Bound::Excluded(id),
            None => Bound::Unbounded,
        };
        let rows: Vec<Feature> = self
            .rows
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, f)| f.clone())
            .collect();
        Box::pin(std::future::ready(Ok(rows)))
    }
}

/// Bounds the number of concurrent store users.
#[derive(Clone)]
pub struct Pool {
    store: Arc<dyn FeatureStore>,
    permits: Arc<Semaphore>,
}

impl Pool {
    pub fn new(store: Arc<dyn FeatureStore>, max_connections: usize) -> Self {
        Self {
            store,
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a free connection. It is released when dropped.
    pub async fn acquire(&self) -> Result<Connection, StoreError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| StoreError::PoolClosed)?;
        Ok(Connection {
            store: Arc::clone(&self.store),
            _permit: permit,
        })
    }
}

pub struct Connection {
    store: Arc<dyn FeatureStore>,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    pub async fn page_after(
        &self,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<Feature>, StoreError> {
        self.store.page_after(after, limit).await
    }
}
