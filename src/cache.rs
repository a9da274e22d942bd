//! Content-addressed plugin cache with per-key single-flight construction.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

use crate::api::{DataSourcePlugin, ResourcePlugin};
use crate::identity::PluginIdentity;

/// Concurrent map whose values are built at most once per key.
///
/// Concurrent first callers for the same key wait on one construction and
/// receive the winner's value. Different keys never block each other. A
/// failed construction leaves the slot empty, so the next caller retries.
pub struct SingleFlight<K, V> {
    cells: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the published value for `key`, never waiting on a build.
    pub fn get(&self, key: &K) -> Option<V> {
        self.cells.get(key).and_then(|cell| cell.get().cloned())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cells.get(key).is_some_and(|cell| cell.initialized())
    }

    /// Returns the value for `key`, running `init` if nothing is published yet.
    ///
    /// The flag is `true` when this call ran `init` and published its result.
    pub async fn get_or_try_init<F, Fut, E>(&self, key: K, init: F) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        // The shard guard must be released before awaiting.
        let cell = self.cells.entry(key).or_default().value().clone();

        if let Some(value) = cell.get() {
            return Ok((value.clone(), false));
        }

        let mut constructed = false;
        let value = cell
            .get_or_try_init(|| async {
                constructed = true;
                init().await
            })
            .await?;
        Ok((value.clone(), constructed))
    }

    /// Number of published values. Slots with a build in flight or a failed
    /// build are not counted.
    pub fn len(&self) -> usize {
        self.cells
            .iter()
            .filter(|e| e.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Live plugin instances keyed by [`PluginIdentity`], one map per plugin kind.
///
/// Entries are never evicted; they live as long as the cache.
#[derive(Default)]
pub struct PluginCache {
    pub(crate) resources: SingleFlight<PluginIdentity, Arc<dyn ResourcePlugin>>,
    pub(crate) data_sources: SingleFlight<PluginIdentity, Arc<dyn DataSourcePlugin>>,
}

impl PluginCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource(&self, identity: &PluginIdentity) -> Option<Arc<dyn ResourcePlugin>> {
        self.resources.get(identity)
    }

    pub fn data_source(&self, identity: &PluginIdentity) -> Option<Arc<dyn DataSourcePlugin>> {
        self.data_sources.get(identity)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub fn data_source_count(&self) -> usize {
        self.data_sources.len()
    }

    pub fn len(&self) -> usize {
        self.resource_count() + self.data_source_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PluginCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginCache")
            .field("resources", &self.resource_count())
            .field("data_sources", &self.data_source_count())
            .finish()
    }
}
