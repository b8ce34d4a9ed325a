//! SQLite-backed [`IndexStore`] implementation.
//!
//! Vectors live in the `embeddings` table as little-endian f32 BLOBs next to
//! the document metadata needed for hydration. Similarity is computed in
//! Rust over the rows of one collection.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{
    Collection, CollectionKey, CursorPosition, Document, EmbeddingRecord, QueryFilters, ScoredId,
    SyncCursor,
};

use super::{
    advance_decision, from_millis, rank, AdvanceOutcome, CursorStore, IndexStore, LockOutcome,
    SyncLocks, UpsertCounts, VectorStore,
};

/// SQLite implementation of the store traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_path(&config.storage.db_path()).await
    }

    pub async fn open_path(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::migrate_pool(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_collection(row: &SqliteRow) -> Collection {
    Collection {
        key: CollectionKey::new(row.get::<String, _>("provider"), row.get::<String, _>("model")),
        dims: row.get::<i64, _>("dims") as usize,
        document_count: row.get::<i64, _>("document_count") as u64,
        created_at: from_millis(row.get("created_at")),
    }
}

fn row_to_cursor(row: &SqliteRow) -> SyncCursor {
    SyncCursor {
        signature: row.get("signature"),
        filter_query: row.get("filter_query"),
        collection_key: CollectionKey::new(
            row.get::<String, _>("provider"),
            row.get::<String, _>("model"),
        ),
        position: CursorPosition {
            timestamp: from_millis(row.get("last_timestamp_ms")),
            document_id: row.get("last_document_id"),
        },
        total_indexed: row.get::<i64, _>("total_indexed") as u64,
        updated_at: from_millis(row.get("updated_at")),
    }
}

fn row_to_document(row: &SqliteRow) -> Result<Document> {
    let headers: BTreeMap<String, String> =
        serde_json::from_str(row.get::<&str, _>("headers_json")).context("corrupt headers_json")?;
    let labels: Vec<String> =
        serde_json::from_str(row.get::<&str, _>("labels_json")).context("corrupt labels_json")?;
    Ok(Document {
        id: row.get("document_id"),
        thread_id: row.get("thread_id"),
        timestamp: from_millis(row.get("timestamp_ms")),
        headers,
        labels,
        snippet: row.get("snippet"),
        body_text: row.get("body_text"),
        raw_size: row.get::<i64, _>("raw_size") as u64,
    })
}

const COLLECTION_SELECT: &str = r#"
    SELECT c.provider, c.model, c.dims, c.created_at,
           (SELECT COUNT(*) FROM embeddings e
             WHERE e.provider = c.provider AND e.model = c.model) AS document_count
    FROM collections c
"#;

const CURSOR_SELECT: &str = r#"
    SELECT signature, provider, model, filter_query, last_timestamp_ms,
           last_document_id, total_indexed, updated_at
    FROM sync_cursors
"#;

#[async_trait]
impl VectorStore for SqliteStore {
    async fn create_collection(&self, key: &CollectionKey, dims: usize) -> Result<Collection> {
        sqlx::query(
            r#"
            INSERT INTO collections (provider, model, dims, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(provider, model) DO NOTHING
            "#,
        )
        .bind(&key.provider)
        .bind(&key.model)
        .bind(dims as i64)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await?;

        self.get_collection(key)
            .await?
            .with_context(|| format!("collection {} vanished after creation", key))
    }

    async fn get_collection(&self, key: &CollectionKey) -> Result<Option<Collection>> {
        let row = sqlx::query(&format!(
            "{} WHERE c.provider = ? AND c.model = ?",
            COLLECTION_SELECT
        ))
        .bind(&key.provider)
        .bind(&key.model)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_collection))
    }

    async fn list_collections(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query(&format!("{} ORDER BY c.provider, c.model", COLLECTION_SELECT))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_collection).collect())
    }

    async fn upsert(
        &self,
        key: &CollectionKey,
        records: &[EmbeddingRecord],
    ) -> Result<UpsertCounts> {
        let mut tx = self.pool.begin().await?;

        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dims FROM collections WHERE provider = ? AND model = ?")
                .bind(&key.provider)
                .bind(&key.model)
                .fetch_optional(&mut *tx)
                .await?;
        let Some(dims) = dims else {
            bail!("collection {} does not exist", key);
        };
        if let Some(bad) = records.iter().find(|r| r.vector.len() as i64 != dims) {
            bail!(
                "vector for {} has {} dimensions, collection {} expects {}",
                bad.document_id(),
                bad.vector.len(),
                key,
                dims
            );
        }

        let count_sql = "SELECT COUNT(*) FROM embeddings WHERE provider = ? AND model = ?";
        let before: i64 = sqlx::query_scalar(count_sql)
            .bind(&key.provider)
            .bind(&key.model)
            .fetch_one(&mut *tx)
            .await?;

        for record in records {
            let doc = &record.document;
            sqlx::query(
                r#"
                INSERT INTO embeddings (provider, model, document_id, vector, thread_id,
                                        timestamp_ms, headers_json, labels_json, snippet,
                                        body_text, raw_size, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(provider, model, document_id) DO UPDATE SET
                    vector = excluded.vector,
                    thread_id = excluded.thread_id,
                    timestamp_ms = excluded.timestamp_ms,
                    headers_json = excluded.headers_json,
                    labels_json = excluded.labels_json,
                    snippet = excluded.snippet,
                    body_text = excluded.body_text,
                    raw_size = excluded.raw_size,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&key.provider)
            .bind(&key.model)
            .bind(&doc.id)
            .bind(vec_to_blob(&record.vector))
            .bind(&doc.thread_id)
            .bind(doc.timestamp.timestamp_millis())
            .bind(serde_json::to_string(&doc.headers)?)
            .bind(serde_json::to_string(&doc.labels)?)
            .bind(&doc.snippet)
            .bind(&doc.body_text)
            .bind(doc.raw_size as i64)
            .bind(record.created_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        let after: i64 = sqlx::query_scalar(count_sql)
            .bind(&key.provider)
            .bind(&key.model)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        let inserted = (after - before).max(0) as u64;
        Ok(UpsertCounts {
            inserted,
            replaced: records.len() as u64 - inserted,
        })
    }

    async fn query(
        &self,
        key: &CollectionKey,
        vector: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<ScoredId>> {
        let mut sql = String::from(
            "SELECT document_id, vector, timestamp_ms, headers_json FROM embeddings \
             WHERE provider = ? AND model = ?",
        );
        if filters.since.is_some() {
            sql.push_str(" AND timestamp_ms >= ?");
        }
        if filters.until.is_some() {
            sql.push_str(" AND timestamp_ms <= ?");
        }

        let mut query = sqlx::query(&sql).bind(&key.provider).bind(&key.model);
        if let Some(since) = filters.since {
            query = query.bind(since.timestamp_millis());
        }
        if let Some(until) = filters.until {
            query = query.bind(until.timestamp_millis());
        }
        let rows = query.fetch_all(&self.pool).await?;

        let sender_filter = filters.from.as_ref().map(|f| f.to_lowercase());
        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(needle) = &sender_filter {
                let headers: BTreeMap<String, String> =
                    serde_json::from_str(row.get::<&str, _>("headers_json")).unwrap_or_default();
                let sender = headers.get("from").map(|s| s.to_lowercase()).unwrap_or_default();
                if !sender.contains(needle.as_str()) {
                    continue;
                }
            }
            let blob: Vec<u8> = row.get("vector");
            scored.push(ScoredId {
                document_id: row.get("document_id"),
                score: cosine_similarity(vector, &blob_to_vec(&blob)),
                timestamp: from_millis(row.get("timestamp_ms")),
            });
        }

        Ok(rank(scored, k))
    }

    async fn get_documents(&self, key: &CollectionKey, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT document_id, thread_id, timestamp_ms, headers_json, labels_json, snippet, \
             body_text, raw_size FROM embeddings \
             WHERE provider = ? AND model = ? AND document_id IN ({})",
            placeholders
        );
        let mut query = sqlx::query(&sql).bind(&key.provider).bind(&key.model);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn count(&self, key: &CollectionKey) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE provider = ? AND model = ?")
                .bind(&key.provider)
                .bind(&key.model)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn delete_collection(&self, key: &CollectionKey) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["embeddings", "collections"] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE provider = ? AND model = ?",
                table
            ))
            .bind(&key.provider)
            .bind(&key.model)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for SqliteStore {
    async fn get_cursor(&self, signature: &str, key: &CollectionKey) -> Result<Option<SyncCursor>> {
        let row = sqlx::query(&format!(
            "{} WHERE signature = ? AND provider = ? AND model = ?",
            CURSOR_SELECT
        ))
        .bind(signature)
        .bind(&key.provider)
        .bind(&key.model)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(row_to_cursor))
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
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query(&format!(
            "{} WHERE signature = ? AND provider = ? AND model = ?",
            CURSOR_SELECT
        ))
        .bind(signature)
        .bind(&key.provider)
        .bind(&key.model)
        .fetch_optional(&mut *tx)
        .await?
        .as_ref()
        .map(row_to_cursor);

        let outcome = advance_decision(
            current.as_ref().map(|c| &c.position),
            position,
            indexed,
            force,
        );

        if matches!(outcome, AdvanceOutcome::Created | AdvanceOutcome::Advanced) {
            let total = current.map(|c| c.total_indexed).unwrap_or(0) + indexed;
            sqlx::query(
                r#"
                INSERT INTO sync_cursors (signature, provider, model, filter_query,
                                          last_timestamp_ms, last_document_id,
                                          total_indexed, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(signature, provider, model) DO UPDATE SET
                    filter_query = excluded.filter_query,
                    last_timestamp_ms = excluded.last_timestamp_ms,
                    last_document_id = excluded.last_document_id,
                    total_indexed = excluded.total_indexed,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(signature)
            .bind(&key.provider)
            .bind(&key.model)
            .bind(filter_query)
            .bind(position.timestamp.timestamp_millis())
            .bind(&position.document_id)
            .bind(total as i64)
            .bind(Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn clear_cursor(&self, signature: &str, key: &CollectionKey) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM sync_cursors WHERE signature = ? AND provider = ? AND model = ?",
        )
        .bind(signature)
        .bind(&key.provider)
        .bind(&key.model)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_cursors(&self, key: &CollectionKey) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sync_cursors WHERE provider = ? AND model = ?")
            .bind(&key.provider)
            .bind(&key.model)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_cursors(&self, key: Option<&CollectionKey>) -> Result<Vec<SyncCursor>> {
        let rows = match key {
            Some(key) => {
                sqlx::query(&format!(
                    "{} WHERE provider = ? AND model = ? ORDER BY updated_at DESC",
                    CURSOR_SELECT
                ))
                .bind(&key.provider)
                .bind(&key.model)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("{} ORDER BY updated_at DESC", CURSOR_SELECT))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(rows.iter().map(row_to_cursor).collect())
    }
}

#[async_trait]
impl SyncLocks for SqliteStore {
    async fn try_lock(
        &self,
        key: &CollectionKey,
        owner: &str,
        ttl: Duration,
    ) -> Result<LockOutcome> {
        let now = Utc::now().timestamp_millis();
        let stale_before = now.saturating_sub(ttl.as_millis().min(i64::MAX as u128) as i64);
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM sync_locks WHERE provider = ? AND model = ? AND acquired_at <= ? AND owner != ?",
        )
        .bind(&key.provider)
        .bind(&key.model)
        .bind(stale_before)
        .bind(owner)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sync_locks (provider, model, owner, acquired_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(provider, model) DO NOTHING
            "#,
        )
        .bind(&key.provider)
        .bind(&key.model)
        .bind(owner)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let holder: String =
            sqlx::query_scalar("SELECT owner FROM sync_locks WHERE provider = ? AND model = ?")
                .bind(&key.provider)
                .bind(&key.model)
                .fetch_one(&mut *tx)
                .await?;

        tx.commit().await?;

        if holder == owner {
            Ok(LockOutcome::Acquired)
        } else {
            Ok(LockOutcome::Held { owner: holder })
        }
    }

    async fn renew(&self, key: &CollectionKey, owner: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sync_locks SET acquired_at = ? WHERE provider = ? AND model = ? AND owner = ?",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(&key.provider)
        .bind(&key.model)
        .bind(owner)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unlock(&self, key: &CollectionKey, owner: &str) -> Result<()> {
        sqlx::query("DELETE FROM sync_locks WHERE provider = ? AND model = ? AND owner = ?")
            .bind(&key.provider)
            .bind(&key.model)
            .bind(owner)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    /// Single transaction: vectors, registration and cursors go together.
    async fn reset_collection(&self, key: &CollectionKey) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["embeddings", "sync_cursors", "collections"] {
            sqlx::query(&format!(
                "DELETE FROM {} WHERE provider = ? AND model = ?",
                table
            ))
            .bind(&key.provider)
            .bind(&key.model)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_path(&dir.path().join("index.sqlite"))
            .await
            .unwrap();
        (dir, store)
    }

    fn record(id: &str, ms: i64, from: &str, vector: Vec<f32>) -> EmbeddingRecord {
        let mut headers = BTreeMap::new();
        headers.insert("from".to_string(), from.to_string());
        headers.insert("subject".to_string(), format!("subject {}", id));
        EmbeddingRecord {
            document: Document {
                id: id.to_string(),
                thread_id: format!("t-{}", id),
                timestamp: from_millis(ms),
                headers,
                labels: vec!["INBOX".to_string()],
                snippet: "snip".to_string(),
                body_text: format!("body of {}", id),
                raw_size: 10,
            },
            vector,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stores_and_hydrates_documents() {
        let (_dir, store) = temp_store().await;
        let key = CollectionKey::new("ollama", "nomic-embed-text");
        let created = store.create_collection(&key, 2).await.unwrap();
        assert_eq!(created.dims, 2);

        // Re-creating with other dims keeps the original pin
        assert_eq!(store.create_collection(&key, 5).await.unwrap().dims, 2);

        let counts = store
            .upsert(
                &key,
                &[
                    record("a", 1_000, "Alice <a@x.com>", vec![1.0, 0.0]),
                    record("b", 2_000, "Bob <b@x.com>", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();
        assert_eq!(counts.inserted, 2);

        let hits = store
            .query(&key, &[1.0, 0.0], 10, &QueryFilters::default())
            .await
            .unwrap();
        assert_eq!(hits[0].document_id, "a");
        assert!((hits[0].score - 1.0).abs() < 1e-6);

        let only_bob = QueryFilters {
            from: Some("bob".into()),
            ..Default::default()
        };
        let hits = store.query(&key, &[1.0, 0.0], 10, &only_bob).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "b");

        let docs = store
            .get_documents(&key, &["b".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].thread_id, "t-b");
        assert_eq!(docs[0].labels, vec!["INBOX"]);
        assert_eq!(docs[0].timestamp.timestamp_millis(), 2_000);
        assert_eq!(docs[0].subject(), "subject b");
    }

    #[tokio::test]
    async fn cursor_advance_is_monotonic() {
        let (_dir, store) = temp_store().await;
        let key = CollectionKey::new("openai", "text-embedding-3-small");
        let at = |ms: i64, id: &str| CursorPosition {
            timestamp: from_millis(ms),
            document_id: id.to_string(),
        };

        let first = store
            .advance_cursor("sig", "from:a", &key, &at(2_000, "m2"), 2, false)
            .await
            .unwrap();
        assert_eq!(first, AdvanceOutcome::Created);

        let back = store
            .advance_cursor("sig", "from:a", &key, &at(1_000, "m1"), 1, false)
            .await
            .unwrap();
        assert_eq!(back, AdvanceOutcome::Rejected);

        let same = store
            .advance_cursor("sig", "from:a", &key, &at(2_000, "m2"), 0, false)
            .await
            .unwrap();
        assert_eq!(same, AdvanceOutcome::Unchanged);

        store
            .advance_cursor("sig", "from:a", &key, &at(3_000, "m3"), 1, false)
            .await
            .unwrap();
        let cursor = store.get_cursor("sig", &key).await.unwrap().unwrap();
        assert_eq!(cursor.position, at(3_000, "m3"));
        assert_eq!(cursor.total_indexed, 3);
        assert_eq!(cursor.filter_query, "from:a");
    }

    #[tokio::test]
    async fn reset_removes_everything_for_the_key() {
        let (_dir, store) = temp_store().await;
        let key = CollectionKey::new("ollama", "m");
        let other = CollectionKey::new("ollama", "other");
        store.create_collection(&key, 2).await.unwrap();
        store.create_collection(&other, 2).await.unwrap();
        store
            .upsert(&key, &[record("a", 1, "x", vec![1.0, 1.0])])
            .await
            .unwrap();
        let at = CursorPosition {
            timestamp: from_millis(1),
            document_id: "a".into(),
        };
        store.advance_cursor("s1", "", &key, &at, 1, false).await.unwrap();
        store.advance_cursor("s2", "q", &key, &at, 1, false).await.unwrap();
        store.advance_cursor("s1", "", &other, &at, 1, false).await.unwrap();

        store.reset_collection(&key).await.unwrap();

        assert!(store.get_collection(&key).await.unwrap().is_none());
        assert_eq!(store.count(&key).await.unwrap(), 0);
        assert!(store.list_cursors(Some(&key)).await.unwrap().is_empty());
        assert_eq!(store.list_cursors(Some(&other)).await.unwrap().len(), 1);
        assert!(store.get_collection(&other).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_cursor_removes_one_filter_only() {
        let (_dir, store) = temp_store().await;
        let key = CollectionKey::new("ollama", "m");
        let at = CursorPosition {
            timestamp: from_millis(5),
            document_id: "a".into(),
        };
        store.advance_cursor("s1", "", &key, &at, 1, false).await.unwrap();
        store.advance_cursor("s2", "q", &key, &at, 1, false).await.unwrap();

        assert!(store.clear_cursor("s1", &key).await.unwrap());
        assert!(!store.clear_cursor("s1", &key).await.unwrap());
        assert!(store.get_cursor("s1", &key).await.unwrap().is_none());
        assert_eq!(store.get_cursor("s2", &key).await.unwrap().unwrap().position, at);
    }

    #[tokio::test]
    async fn renewed_lock_is_not_stale() {
        let (_dir, store) = temp_store().await;
        let key = CollectionKey::new("ollama", "m");
        let ttl = Duration::from_millis(150);
        store.try_lock(&key, "run-1", ttl).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.renew(&key, "run-1").await.unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(
            store.try_lock(&key, "run-2", ttl).await.unwrap(),
            LockOutcome::Held { owner: "run-1".into() }
        );

        assert!(!store.renew(&key, "run-2").await.unwrap());
        store.unlock(&key, "run-1").await.unwrap();
        assert!(!store.renew(&key, "run-1").await.unwrap());
    }

    #[tokio::test]
    async fn lock_is_exclusive() {
        let (_dir, store) = temp_store().await;
        let key = CollectionKey::new("ollama", "m");
        let ttl = Duration::from_secs(600);
        assert_eq!(store.try_lock(&key, "run-1", ttl).await.unwrap(), LockOutcome::Acquired);
        assert_eq!(
            store.try_lock(&key, "run-2", ttl).await.unwrap(),
            LockOutcome::Held { owner: "run-1".into() }
        );
        store.unlock(&key, "run-1").await.unwrap();
        assert_eq!(store.try_lock(&key, "run-2", ttl).await.unwrap(), LockOutcome::Acquired);
    }
}
