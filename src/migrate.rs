use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index if missing. Safe to run repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // One row per (provider, model); dims are pinned at creation
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (provider, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embeddings (
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            document_id TEXT NOT NULL,
            vector BLOB NOT NULL,
            thread_id TEXT NOT NULL,
            timestamp_ms INTEGER NOT NULL,
            headers_json TEXT NOT NULL DEFAULT '{}',
            labels_json TEXT NOT NULL DEFAULT '[]',
            snippet TEXT NOT NULL DEFAULT '',
            body_text TEXT NOT NULL,
            raw_size INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (provider, model, document_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_cursors (
            signature TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            filter_query TEXT NOT NULL,
            last_timestamp_ms INTEGER NOT NULL,
            last_document_id TEXT NOT NULL,
            total_indexed INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (signature, provider, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_locks (
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            owner TEXT NOT NULL,
            acquired_at INTEGER NOT NULL,
            PRIMARY KEY (provider, model)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embeddings_timestamp ON embeddings(provider, model, timestamp_ms DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sync_cursors_collection ON sync_cursors(provider, model)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
