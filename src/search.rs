//! Retrieval Engine and the `search` command.
//!
//! A query is embedded with the collection's own model, matched against
//! stored vectors by cosine similarity, and hydrated back into documents
//! from the metadata kept alongside each vector.
//!
//! Results are ordered by score descending, then newest first, then by
//! document id, so equal scores always come back in the same order.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::debug;

use crate::collection::CollectionManager;
use crate::config::{Config, EmbeddingBackend};
use crate::embedding::{create_provider, EmbeddingGateway};
use crate::error::{EngineError, EngineResult};
use crate::models::{CollectionKey, QueryFilters, SearchHit};
use crate::normalize::excerpt;
use crate::store::sqlite::SqliteStore;
use crate::store::IndexStore;

pub struct Retriever<'a> {
    store: &'a dyn IndexStore,
    gateway: &'a EmbeddingGateway,
}

impl<'a> Retriever<'a> {
    pub fn new(store: &'a dyn IndexStore, gateway: &'a EmbeddingGateway) -> Self {
        Self { store, gateway }
    }

    /// Top `k` documents for `query` in the gateway's collection.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filters: &QueryFilters,
    ) -> EngineResult<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let key = self.gateway.key();
        let manager = CollectionManager::new(self.store);
        // Missing collection is reported before the provider is contacted
        let collection = manager
            .get(&key)
            .await?
            .ok_or_else(|| EngineError::CollectionNotFound { key: key.clone() })?;
        manager.require(&key, self.gateway.dimensions().await?).await?;

        let vector = self.gateway.embed_query(query).await?;
        let scored = manager.query(&key, &vector, k, filters).await?;
        debug!(collection = %key, size = collection.document_count, hits = scored.len(), "vector query");
        if scored.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = scored.iter().map(|s| s.document_id.clone()).collect();
        let mut documents = self.store.get_documents(&key, &ids).await?;

        let mut hits = Vec::with_capacity(scored.len());
        for s in scored {
            if let Some(pos) = documents.iter().position(|d| d.id == s.document_id) {
                hits.push(SearchHit {
                    score: s.score,
                    document: documents.swap_remove(pos),
                });
            }
        }
        Ok(hits)
    }
}

/// Build a gateway for an existing collection key.
pub fn gateway_for(config: &Config, key: &CollectionKey) -> Result<EmbeddingGateway> {
    let Some(backend) = EmbeddingBackend::parse(&key.provider) else {
        bail!("unknown embedding provider '{}'", key.provider);
    };
    let provider = create_provider(&config.embedding, backend, &key.model)?;
    Ok(EmbeddingGateway::new(provider).with_dims(config.embedding.dims_for(backend, &key.model)))
}

/// Resolve the collection to query: explicit flags, else the most populated
/// collection matching them, else the configured embedding model.
pub async fn select_collection(
    config: &Config,
    store: &dyn IndexStore,
    provider: Option<EmbeddingBackend>,
    model: Option<&str>,
) -> Result<CollectionKey> {
    let (backend, default_model) = config.embedding.resolve(provider, model);
    let fallback = CollectionKey::new(backend.as_str(), default_model);
    let key = CollectionManager::new(store)
        .select(provider.map(|p| p.as_str()), model, fallback)
        .await?;
    Ok(key)
}

/// Parse a `YYYY-MM-DD` date bound. `end_of_day` selects 23:59:59 instead of midnight.
pub fn parse_date_bound(s: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", s))?;
    let time = if end_of_day {
        date.and_hms_opt(23, 59, 59)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    time.map(|t| t.and_utc())
        .ok_or_else(|| anyhow::anyhow!("Invalid date '{}'", s))
}

/// CLI options for `mailvec search`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub limit: Option<usize>,
    pub detailed: bool,
    pub provider: Option<EmbeddingBackend>,
    pub model: Option<String>,
    pub since: Option<String>,
    pub until: Option<String>,
    pub from: Option<String>,
    pub json: bool,
}

pub async fn run_search(config: &Config, options: SearchOptions) -> Result<()> {
    let filters = QueryFilters {
        since: options
            .since
            .as_deref()
            .map(|s| parse_date_bound(s, false))
            .transpose()?,
        until: options
            .until
            .as_deref()
            .map(|s| parse_date_bound(s, true))
            .transpose()?,
        from: options.from.clone(),
    };
    let limit = options.limit.unwrap_or(config.retrieval.search_limit);

    let store = SqliteStore::open(config).await?;
    let result = async {
        let key = select_collection(
            config,
            &store,
            options.provider,
            options.model.as_deref(),
        )
        .await?;
        let gateway = gateway_for(config, &key)?;
        let hits = Retriever::new(&store, &gateway)
            .search(&options.query, limit, &filters)
            .await?;
        Ok::<_, anyhow::Error>((key, hits))
    }
    .await;
    store.close().await;
    let (key, hits) = result?;

    if options.json {
        let out = serde_json::json!({
            "collection": key.to_string(),
            "query": options.query,
            "results": hits,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if hits.is_empty() {
        if filters.is_empty() {
            println!("No results.");
        } else {
            println!("No results matching the date and sender filters.");
        }
        return Ok(());
    }

    println!("collection: {}", key);
    println!();
    for (i, hit) in hits.iter().enumerate() {
        let doc = &hit.document;
        println!("{}. [{:.2}] {}", i + 1, hit.score, doc.subject());
        println!("    date: {}", doc.timestamp.format("%Y-%m-%d %H:%M"));
        println!("    from: {}", doc.sender());
        if options.detailed {
            let text = if doc.snippet.is_empty() {
                &doc.body_text
            } else {
                &doc.snippet
            };
            println!("    snippet: \"{}\"", excerpt(text.replace('\n', " ").trim(), 200));
            if !doc.labels.is_empty() {
                println!("    labels: {}", doc.labels.join(", "));
            }
        }
        println!("    id: {}", doc.id);
        println!();
    }
    Ok(())
}
