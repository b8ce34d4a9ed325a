//! In-memory [`IndexStore`] implementation for tests and dry runs.
//!
//! Uses `HashMap` behind `std::sync::RwLock` for thread safety. Vector
//! search is brute-force cosine similarity over the collection.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::models::{
    Collection, CollectionKey, CursorPosition, Document, EmbeddingRecord, QueryFilters, ScoredId,
    SyncCursor,
};

use super::{
    advance_decision, rank, AdvanceOutcome, CursorStore, IndexStore, LockOutcome, SyncLocks,
    UpsertCounts, VectorStore,
};

struct MemCollection {
    dims: usize,
    created_at: DateTime<Utc>,
    records: HashMap<String, EmbeddingRecord>,
}

impl MemCollection {
    fn summary(&self, key: &CollectionKey) -> Collection {
        Collection {
            key: key.clone(),
            dims: self.dims,
            document_count: self.records.len() as u64,
            created_at: self.created_at,
        }
    }
}

type CursorKey = (String, CollectionKey);

/// In-memory index store.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<CollectionKey, MemCollection>>,
    cursors: RwLock<HashMap<CursorKey, SyncCursor>>,
    locks: Mutex<HashMap<CollectionKey, (String, DateTime<Utc>)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow::anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn create_collection(&self, key: &CollectionKey, dims: usize) -> Result<Collection> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let entry = collections
            .entry(key.clone())
            .or_insert_with(|| MemCollection {
                dims,
                created_at: Utc::now(),
                records: HashMap::new(),
            });
        Ok(entry.summary(key))
    }

    async fn get_collection(&self, key: &CollectionKey) -> Result<Option<Collection>> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections.get(key).map(|c| c.summary(key)))
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let collections = self.collections.read().map_err(poisoned)?;
        let mut list: Vec<Collection> = collections.iter().map(|(k, c)| c.summary(k)).collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(list)
    }

    async fn upsert(
        &self,
        key: &CollectionKey,
        records: &[EmbeddingRecord],
    ) -> Result<UpsertCounts> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let Some(collection) = collections.get_mut(key) else {
            bail!("collection {} does not exist", key);
        };
        if let Some(bad) = records.iter().find(|r| r.vector.len() != collection.dims) {
            bail!(
                "vector for {} has {} dimensions, collection {} expects {}",
                bad.document_id(),
                bad.vector.len(),
                key,
                collection.dims
            );
        }

        let mut counts = UpsertCounts::default();
        for record in records {
            match collection
                .records
                .insert(record.document_id().to_string(), record.clone())
            {
                Some(_) => counts.replaced += 1,
                None => counts.inserted += 1,
            }
        }
        Ok(counts)
    }

    async fn query(
        &self,
        key: &CollectionKey,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<ScoredId>> {
        let collections = self.collections.read().map_err(poisoned)?;
        let Some(collection) = collections.get(key) else {
            return Ok(Vec::new());
        };
        let scored = collection
            .records
            .values()
            .filter(|r| filters.matches(&r.document))
            .map(|r| ScoredId {
                document_id: r.document.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                timestamp: r.document.timestamp,
            })
            .collect();
        Ok(rank(scored, k))
    }

    async fn get_documents(&self, key: &CollectionKey, ids: &[String]) -> Result<Vec<Document>> {
        let collections = self.collections.read().map_err(poisoned)?;
        let Some(collection) = collections.get(key) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| collection.records.get(id))
            .map(|r| r.document.clone())
            .collect())
    }

    async fn count(&self, key: &CollectionKey) -> Result<u64> {
        let collections = self.collections.read().map_err(poisoned)?;
        Ok(collections
            .get(key)
            .map(|c| c.records.len() as u64)
            .unwrap_or(0))
    }

    async fn delete_collection(&self, key: &CollectionKey) -> Result<()> {
        self.collections.write().map_err(poisoned)?.remove(key);
        Ok(())
    }
}

#[async_trait]
impl CursorStore for InMemoryStore {
    async fn get_cursor(&self, signature: &str, key: &CollectionKey) -> Result<Option<SyncCursor>> {
        let cursors = self.cursors.read().map_err(poisoned)?;
        Ok(cursors.get(&(signature.to_string(), key.clone())).cloned())
    }

    async fn advance_cursor(
        &self,
        signature: &str,
        filter_query: &str,
        key: &CollectionKey,
        position: &CursorPosition,
        indexed: u64,
        force: bool,
    ) -> Result<AdvanceOutcome> {
        let mut cursors = self.cursors.write().map_err(poisoned)?;
        let map_key = (signature.to_string(), key.clone());
        let current = cursors.get(&map_key);
        let outcome = advance_decision(current.map(|c| &c.position), position, indexed, force);

        match outcome {
            AdvanceOutcome::Created | AdvanceOutcome::Advanced => {
                let total = current.map(|c| c.total_indexed).unwrap_or(0) + indexed;
                cursors.insert(
                    map_key,
                    SyncCursor {
                        signature: signature.to_string(),
                        filter_query: filter_query.to_string(),
                        collection_key: key.clone(),
                        position: position.clone(),
                        total_indexed: total,
                        updated_at: Utc::now(),
                    },
                );
            }
            AdvanceOutcome::Unchanged | AdvanceOutcome::Rejected => {}
        }
        Ok(outcome)
    }

    async fn clear_cursor(&self, signature: &str, key: &CollectionKey) -> Result<bool> {
        let mut cursors = self.cursors.write().map_err(poisoned)?;
        Ok(cursors
            .remove(&(signature.to_string(), key.clone()))
            .is_some())
    }

    async fn clear_cursors(&self, key: &CollectionKey) -> Result<u64> {
        let mut cursors = self.cursors.write().map_err(poisoned)?;
        let before = cursors.len();
        cursors.retain(|(_, k), _| k != key);
        Ok((before - cursors.len()) as u64)
    }

    async fn list_cursors(&self, key: Option<&CollectionKey>) -> Result<Vec<SyncCursor>> {
        let cursors = self.cursors.read().map_err(poisoned)?;
        let mut list: Vec<SyncCursor> = cursors
            .values()
            .filter(|c| key.map_or(true, |k| &c.collection_key == k))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }
}

#[async_trait]
impl SyncLocks for InMemoryStore {
    async fn try_lock(
        &self,
        key: &CollectionKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<LockOutcome> {
        let mut locks = self.locks.lock().map_err(poisoned)?;
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        if let Some((holder, acquired_at)) = locks.get(key) {
            if holder != owner && now - *acquired_at < ttl {
                return Ok(LockOutcome::Held {
                    owner: holder.clone(),
                });
            }
        }
        locks.insert(key.clone(), (owner.to_string(), now));
        Ok(LockOutcome::Acquired)
    }

    async fn renew(&self, key: &CollectionKey, owner: &str) -> Result<bool> {
        let mut locks = self.locks.lock().map_err(poisoned)?;
        match locks.get_mut(key) {
            Some((holder, acquired_at)) if holder == owner => {
                *acquired_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn unlock(&self, key: &CollectionKey, owner: &str) -> Result<()> {
        let mut locks = self.locks.lock().map_err(poisoned)?;
        if locks.get(key).is_some_and(|(holder, _)| holder == owner) {
            locks.remove(key);
        }
        Ok(())
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    /// Both maps stay write-locked for the whole reset.
    async fn reset_collection(&self, key: &CollectionKey) -> Result<()> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let mut cursors = self.cursors.write().map_err(poisoned)?;
        collections.remove(key);
        cursors.retain(|(_, k), _| k != key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn upsert_counts_and_rejects_wrong_dims() {
        let store = InMemoryStore::new();
        let key = CollectionKey::new("test", "m");
        store.create_collection(&key, 2).await.unwrap();

        let counts = store
            .upsert(&key, &[record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        assert_eq!(counts, UpsertCounts { inserted: 2, replaced: 0 });

        let counts = store
            .upsert(&key, &[record("a", vec![0.5, 0.5])])
            .await
            .unwrap();
        assert_eq!(counts, UpsertCounts { inserted: 0, replaced: 1 });
        assert_eq!(store.count(&key).await.unwrap(), 2);

        assert!(store
            .upsert(&key, &[record("c", vec![1.0, 0.0, 0.0])])
            .await
            .is_err());
    }

    #[tokio::test]
    async fn lock_excludes_other_owners_until_released() {
        let store = InMemoryStore::new();
        let key = CollectionKey::new("test", "m");
        let ttl = Duration::from_secs(60);
        assert_eq!(store.try_lock(&key, "a", ttl).await.unwrap(), LockOutcome::Acquired);
        assert_eq!(
            store.try_lock(&key, "b", ttl).await.unwrap(),
            LockOutcome::Held { owner: "a".into() }
        );
        store.unlock(&key, "b").await.unwrap();
        assert!(matches!(
            store.try_lock(&key, "b", ttl).await.unwrap(),
            LockOutcome::Held { .. }
        ));
        store.unlock(&key, "a").await.unwrap();
        assert_eq!(store.try_lock(&key, "b", ttl).await.unwrap(), LockOutcome::Acquired);
    }

    #[tokio::test]
    async fn renew_keeps_a_lock_alive_for_its_owner_only() {
        let store = InMemoryStore::new();
        let key = CollectionKey::new("test", "m");
        let ttl = Duration::from_millis(200);
        store.try_lock(&key, "a", ttl).await.unwrap();
        assert!(store.renew(&key, "a").await.unwrap());
        assert!(!store.renew(&key, "b").await.unwrap());

        // Once taken over, the old owner cannot renew
        store.try_lock(&key, "b", Duration::ZERO).await.unwrap();
        assert!(!store.renew(&key, "a").await.unwrap());
        store.unlock(&key, "b").await.unwrap();
        assert!(!store.renew(&key, "b").await.unwrap());
    }

    fn at(id: &str) -> CursorPosition {
        CursorPosition {
            timestamp: Utc::now(),
            document_id: id.to_string(),
        }
    }

    #[tokio::test]
    async fn clear_cursor_removes_one_filter_only() {
        let store = InMemoryStore::new();
        let key = CollectionKey::new("test", "m");
        store.advance_cursor("s1", "", &key, &at("a"), 1, false).await.unwrap();
        store.advance_cursor("s2", "q", &key, &at("a"), 1, false).await.unwrap();

        assert!(store.clear_cursor("s1", &key).await.unwrap());
        assert!(!store.clear_cursor("s1", &key).await.unwrap());
        assert!(store.get_cursor("s1", &key).await.unwrap().is_none());
        assert!(store.get_cursor("s2", &key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reset_drops_collection_and_its_cursors() {
        let store = InMemoryStore::new();
        let key = CollectionKey::new("test", "m");
        let other = CollectionKey::new("test", "other");
        store.create_collection(&key, 1).await.unwrap();
        store.create_collection(&other, 1).await.unwrap();
        store.upsert(&key, &[record("a", vec![1.0])]).await.unwrap();
        store.advance_cursor("s1", "", &key, &at("a"), 1, false).await.unwrap();
        store.advance_cursor("s1", "", &other, &at("a"), 1, false).await.unwrap();

        store.reset_collection(&key).await.unwrap();

        assert!(store.get_collection(&key).await.unwrap().is_none());
        assert!(store.list_cursors(Some(&key)).await.unwrap().is_empty());
        assert_eq!(store.list_cursors(Some(&other)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_locks_are_taken_over() {
        let store = InMemoryStore::new();
        let key = CollectionKey::new("test", "m");
        store.try_lock(&key, "a", Duration::from_secs(60)).await.unwrap();
        assert_eq!(
            store.try_lock(&key, "b", Duration::ZERO).await.unwrap(),
            LockOutcome::Acquired
        );
    }
}
