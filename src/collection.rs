//! Collection Manager.
//!
//! Thin policy layer over a [`VectorStore`]: pins dimensionality when a
//! collection is created, bounds query sizes, and picks a collection when
//! the caller did not name one.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    Collection, CollectionKey, CollectionStats, EmbeddingRecord, QueryFilters, ScoredId,
};
use crate::store::{IndexStore, UpsertCounts};

pub struct CollectionManager<'a> {
    store: &'a dyn IndexStore,
}

impl<'a> CollectionManager<'a> {
    pub fn new(store: &'a dyn IndexStore) -> Self {
        Self { store }
    }

    /// Create the collection if missing; fail if it exists with other dims.
    pub async fn ensure(&self, key: &CollectionKey, dims: usize) -> EngineResult<Collection> {
        let collection = self.store.create_collection(key, dims).await?;
        if collection.dims != dims {
            return Err(EngineError::DimensionMismatch {
                key: key.clone(),
                expected: collection.dims,
                actual: dims,
            });
        }
        Ok(collection)
    }

    /// Look up an existing collection and check it against the query model's dims.
    pub async fn require(&self, key: &CollectionKey, dims: usize) -> EngineResult<Collection> {
        let collection = self
            .store
            .get_collection(key)
            .await?
            .ok_or_else(|| EngineError::CollectionNotFound { key: key.clone() })?;
        if collection.dims != dims {
            return Err(EngineError::DimensionMismatch {
                key: key.clone(),
                expected: collection.dims,
                actual: dims,
            });
        }
        Ok(collection)
    }

    pub async fn get(&self, key: &CollectionKey) -> EngineResult<Option<Collection>> {
        Ok(self.store.get_collection(key).await?)
    }

    pub async fn list(&self) -> EngineResult<Vec<Collection>> {
        Ok(self.store.list_collections().await?)
    }

    pub async fn upsert(
        &self,
        key: &CollectionKey,
        records: &[EmbeddingRecord],
    ) -> EngineResult<UpsertCounts> {
        if records.is_empty() {
            return Ok(UpsertCounts::default());
        }
        Ok(self.store.upsert(key, records).await?)
    }

    /// Nearest neighbors, with `k` bounded to the collection size.
    pub async fn query(
        &self,
        key: &CollectionKey,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> EngineResult<Vec<ScoredId>> {
        let size = self.store.count(key).await? as usize;
        let k = k.min(size);
        if k == 0 {
            return Ok(Vec::new());
        }
        Ok(self.store.query(key, vector, k, filters).await?)
    }

    /// Drop vectors, registration and every cursor for `key`.
    pub async fn clear(&self, key: &CollectionKey) -> EngineResult<()> {
        Ok(self.store.reset_collection(key).await?)
    }

    pub async fn stats(&self) -> EngineResult<Vec<CollectionStats>> {
        let collections = self.store.list_collections().await?;
        let cursors = self.store.list_cursors(None).await?;

        let mut by_key: HashMap<&CollectionKey, (usize, Option<chrono::DateTime<chrono::Utc>>)> =
            HashMap::new();
        for cursor in &cursors {
            let entry = by_key.entry(&cursor.collection_key).or_insert((0, None));
            entry.0 += 1;
            entry.1 = entry.1.max(Some(cursor.updated_at));
        }

        Ok(collections
            .into_iter()
            .map(|c| {
                let (cursor_count, last_sync) = by_key.get(&c.key).copied().unwrap_or((0, None));
                CollectionStats {
                    key: c.key,
                    dims: c.dims,
                    document_count: c.document_count,
                    created_at: c.created_at,
                    last_sync,
                    cursor_count,
                }
            })
            .collect())
    }

    /// Pick the collection to query.
    ///
    /// Both parts given: that key. Otherwise the most populated collection
    /// matching whatever was given, falling back to `fallback` when nothing
    /// matches.
    pub async fn select(
        &self,
        provider: Option<&str>,
        model: Option<&str>,
        fallback: CollectionKey,
    ) -> EngineResult<CollectionKey> {
        if let (Some(p), Some(m)) = (provider, model) {
            return Ok(CollectionKey::new(p, m));
        }
        let best = self
            .store
            .list_collections()
            .await?
            .into_iter()
            .filter(|c| provider.map_or(true, |p| c.key.provider == p))
            .filter(|c| model.map_or(true, |m| c.key.model == m))
            .filter(|c| c.document_count > 0)
            .max_by(|a, b| {
                a.document_count
                    .cmp(&b.document_count)
                    .then_with(|| b.key.cmp(&a.key))
            });
        Ok(best.map(|c| c.key).unwrap_or(fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use crate::store::memory::InMemoryStore;
    use crate::store::VectorStore;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(id: &str, vector: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            document: Document {
                id: id.to_string(),
                thread_id: id.to_string(),
                timestamp: Utc::now(),
                headers: BTreeMap::new(),
                labels: vec![],
                snippet: String::new(),
                body_text: String::new(),
                raw_size: 0,
            },
            vector,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn ensure_pins_dims() {
        let store = InMemoryStore::new();
        let manager = CollectionManager::new(&store);
        let key = CollectionKey::new("ollama", "nomic-embed-text");
        manager.ensure(&key, 768).await.unwrap();
        manager.ensure(&key, 768).await.unwrap();
        let err = manager.ensure(&key, 1536).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::DimensionMismatch { expected: 768, actual: 1536, .. }
        ));
    }

    #[tokio::test]
    async fn require_reports_missing_collection() {
        let store = InMemoryStore::new();
        let manager = CollectionManager::new(&store);
        let key = CollectionKey::new("openai", "text-embedding-3-small");
        assert!(matches!(
            manager.require(&key, 1536).await,
            Err(EngineError::CollectionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn query_bounds_k_to_collection_size() {
        let store = InMemoryStore::new();
        let manager = CollectionManager::new(&store);
        let key = CollectionKey::new("test", "m");
        manager.ensure(&key, 2).await.unwrap();
        manager
            .upsert(&key, &[record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        let hits = manager
            .query(&key, &[1.0, 0.0], 50, &QueryFilters::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, "a");
    }

    #[tokio::test]
    async fn select_prefers_most_populated_match() {
        let store = InMemoryStore::new();
        let manager = CollectionManager::new(&store);
        let small = CollectionKey::new("ollama", "all-minilm");
        let big = CollectionKey::new("ollama", "nomic-embed-text");
        let cloud = CollectionKey::new("openai", "text-embedding-3-small");
        for key in [&small, &big, &cloud] {
            store.create_collection(key, 1).await.unwrap();
        }
        store.upsert(&small, &[record("a", vec![1.0])]).await.unwrap();
        store
            .upsert(&big, &[record("a", vec![1.0]), record("b", vec![1.0])])
            .await
            .unwrap();
        store
            .upsert(
                &cloud,
                &[record("a", vec![1.0]), record("b", vec![1.0]), record("c", vec![1.0])],
            )
            .await
            .unwrap();

        let fallback = CollectionKey::new("ollama", "default");
        assert_eq!(manager.select(None, None, fallback.clone()).await.unwrap(), cloud);
        assert_eq!(
            manager.select(Some("ollama"), None, fallback.clone()).await.unwrap(),
            big
        );
        assert_eq!(
            manager.select(Some("local"), None, fallback.clone()).await.unwrap(),
            fallback
        );
        assert_eq!(
            manager
                .select(Some("ollama"), Some("all-minilm"), fallback)
                .await
                .unwrap(),
            small
        );
    }
}
