//! Storage abstraction for mailvec.
//!
//! Three capabilities make up an index backend:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`VectorStore`] | Collections of vectors keyed by `(provider, model)` |
//! | [`CursorStore`] | Durable, monotonic sync cursors |
//! | [`SyncLocks`] | One running sync per collection key |
//!
//! [`IndexStore`] bundles them. Implementations must be `Send + Sync` to
//! work with async runtimes.

pub mod memory;
pub mod sqlite;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::models::{
    Collection, CollectionKey, CursorPosition, Document, EmbeddingRecord, QueryFilters, ScoredId,
    SyncCursor,
};

/// How many records an upsert created versus overwrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertCounts {
    pub inserted: u64,
    pub replaced: u64,
}

impl UpsertCounts {
    pub fn total(&self) -> u64 {
        self.inserted + self.replaced
    }
}

/// Result of [`CursorStore::advance_cursor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// No cursor existed; one was written.
    Created,
    /// The cursor moved forward (or was forced).
    Advanced,
    /// Same position, nothing new indexed; nothing written.
    Unchanged,
    /// The requested position is behind the stored one.
    Rejected,
}

/// Result of [`SyncLocks::try_lock`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Held { owner: String },
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Register a collection. If it already exists it is returned unchanged,
    /// with the dims it was created with.
    async fn create_collection(&self, key: &CollectionKey, dims: usize) -> Result<Collection>;

    async fn get_collection(&self, key: &CollectionKey) -> Result<Option<Collection>>;

    async fn list_collections(&self) -> Result<Vec<Collection>>;

    /// Insert or replace records by document id. Fails if the collection is
    /// missing or any vector length differs from its dims.
    async fn upsert(&self, key: &CollectionKey, records: &[EmbeddingRecord])
        -> Result<UpsertCounts>;

    /// Up to `k` ids by cosine similarity descending, ties broken by newer
    /// timestamp and then by id.
    async fn query(
        &self,
        key: &CollectionKey,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<ScoredId>>;

    /// Stored metadata for the given ids. Unknown ids are omitted.
    async fn get_documents(&self, key: &CollectionKey, ids: &[String]) -> Result<Vec<Document>>;

    async fn count(&self, key: &CollectionKey) -> Result<u64>;

    /// Drop a collection's vectors and its registration.
    async fn delete_collection(&self, key: &CollectionKey) -> Result<()>;
}

#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn get_cursor(&self, signature: &str, key: &CollectionKey) -> Result<Option<SyncCursor>>;

    /// Move a cursor to `position`, adding `indexed` to its running total.
    ///
    /// Positions behind the stored one are rejected unless `force` is set.
    async fn advance_cursor(
        &self,
        signature: &str,
        filter_query: &str,
        key: &CollectionKey,
        position: &CursorPosition,
        indexed: u64,
        force: bool,
    ) -> Result<AdvanceOutcome>;

    async fn clear_cursor(&self, signature: &str, key: &CollectionKey) -> Result<bool>;

    /// Remove every cursor for a collection key, whatever its filter.
    async fn clear_cursors(&self, key: &CollectionKey) -> Result<u64>;

    async fn list_cursors(&self, key: Option<&CollectionKey>) -> Result<Vec<SyncCursor>>;
}

#[async_trait]
pub trait SyncLocks: Send + Sync {
    /// Take the run lock for `key`. Locks older than `ttl` are considered
    /// abandoned and are taken over.
    async fn try_lock(&self, key: &CollectionKey, owner: &str, ttl: Duration)
        -> Result<LockOutcome>;

    /// Refresh the lock's acquisition time. Returns `false` when `owner`
    /// no longer holds it.
    async fn renew(&self, key: &CollectionKey, owner: &str) -> Result<bool>;

    /// Release the lock if `owner` holds it.
    async fn unlock(&self, key: &CollectionKey, owner: &str) -> Result<()>;
}

#[async_trait]
pub trait IndexStore: VectorStore + CursorStore + SyncLocks {
    /// Remove a collection, its registration and all of its cursors.
    async fn reset_collection(&self, key: &CollectionKey) -> Result<()> {
        self.delete_collection(key).await?;
        self.clear_cursors(key).await?;
        Ok(())
    }
}

/// Decide how a cursor moves. Shared by every backend.
pub(crate) fn advance_decision(
    current: Option<&CursorPosition>,
    requested: &CursorPosition,
    indexed: u64,
    force: bool,
) -> AdvanceOutcome {
    match current {
        None => AdvanceOutcome::Created,
        Some(cur) if requested > cur => AdvanceOutcome::Advanced,
        Some(cur) if requested == cur && indexed == 0 => AdvanceOutcome::Unchanged,
        Some(cur) if requested == cur => AdvanceOutcome::Advanced,
        Some(_) if force => AdvanceOutcome::Advanced,
        Some(_) => AdvanceOutcome::Rejected,
    }
}

/// Order scored candidates and keep the best `k`.
pub(crate) fn rank(mut scored: Vec<ScoredId>, k: usize) -> Vec<ScoredId> {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.timestamp.cmp(&a.timestamp))
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    scored.truncate(k);
    scored
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::UNIX_EPOCH)
}
