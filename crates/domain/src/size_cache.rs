//! Size label to id cache.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use store::{CatalogStore, Size, SizeId, StoreError, normalize_size_name};

/// Maps normalized size labels ("M", "MEDIUM", ...) to size ids.
///
/// Warmed from the size table at startup and extended on misses by an exact,
/// then prefix, lookup against the store. Entries are never evicted. Two
/// tasks resolving the same label concurrently may both hit the store; both
/// insert the same id.
#[derive(Debug, Default)]
pub struct SizeCache {
    entries: RwLock<HashMap<String, SizeId>>,
}

impl SizeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts every size under its normalized name.
    pub fn warm(&self, sizes: &[Size]) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for size in sizes {
            entries.insert(normalize_size_name(&size.name), size.id);
        }
    }

    /// Loads all sizes from the store.
    pub async fn warm_from<S: CatalogStore + ?Sized>(
        &self,
        store: &S,
    ) -> Result<usize, StoreError> {
        let sizes = store.sizes().await?;
        self.warm(&sizes);
        tracing::info!(sizes = sizes.len(), "Size cache warmed");
        Ok(sizes.len())
    }

    /// Looks a label up without touching the store.
    pub fn lookup(&self, label: &str) -> Option<SizeId> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&normalize_size_name(label))
            .copied()
    }

    /// Looks a label up, falling back to the store on a miss.
    ///
    /// A hit in the store is cached under the label as typed (normalized), so
    /// "m" resolves to "Medium" once and then stays cached.
    pub async fn resolve<S: CatalogStore + ?Sized>(
        &self,
        store: &S,
        label: &str,
    ) -> Result<Option<SizeId>, StoreError> {
        let key = normalize_size_name(label);
        if key.is_empty() {
            return Ok(None);
        }
        if let Some(id) = self.lookup(&key) {
            return Ok(Some(id));
        }

        let found = match store.size_by_name(&key).await? {
            Some(size) => Some(size),
            None => store.size_by_prefix(&key).await?,
        };

        if let Some(size) = &found {
            tracing::debug!(label = %key, size_id = %size.id, "Size cache extended");
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, size.id);
        }
        Ok(found.map(|s| s.id))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
