//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with batching, retry, and backoff.
//! - **`LocalProvider`**: runs models in-process via fastembed; no network calls after model download.
//!
//! [`EmbeddingGateway`] wraps one provider for the length of a run: it
//! resolves dimensionality once, validates every vector against it, and
//! isolates failures to the individual texts that caused them.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`]: compute similarity between two embedding vectors
//! - [`vec_to_blob`]: encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`]: decode a SQLite BLOB back into a `Vec<f32>`

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::catalog;
use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{EmbeddingFailure, EngineResult};
use crate::http::post_json_with_retry;
use crate::models::CollectionKey;

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider identifier (e.g. `"ollama"`), the first half of a collection key.
    fn provider_name(&self) -> &str;
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Dimensionality known without calling the provider, if any.
    fn known_dims(&self) -> Option<usize> {
        catalog::embedding_dims(self.provider_name(), self.model_name())
    }
    /// Embed a batch of texts. The result has one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ============ Ollama Provider ============

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
/// Requires Ollama to be running with an embedding model pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.ollama_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn provider_name(&self) -> &str {
        "ollama"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/embed", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

pub fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls the `POST /v1/embeddings` endpoint with the configured model.
/// Requires the `OPENAI_API_KEY` environment variable to be set.
pub struct OpenAIProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_retries: u32,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig, model: &str) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_key(config, model, api_key)
    }

    pub fn with_key(config: &EmbeddingConfig, model: &str, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.openai_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/embeddings", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by their `index` field.
pub fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push((index, vec));
    }

    embeddings.sort_by_key(|(index, _)| *index);
    Ok(embeddings.into_iter().map(|(_, v)| v).collect())
}

// ============ Local Provider (fastembed) ============

/// Embedding provider for in-process inference via fastembed.
///
/// Models are downloaded on first use from Hugging Face and cached.
/// After initial download, no network calls are needed.
#[cfg(feature = "local-embeddings")]
pub struct LocalProvider {
    model_name: String,
    model: fastembed::EmbeddingModel,
    batch_size: usize,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalProvider {
    pub fn new(config: &EmbeddingConfig, model: &str) -> Result<Self> {
        Ok(Self {
            model_name: model.to_string(),
            model: config_to_fastembed_model(model)?,
            batch_size: config.batch_size,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn provider_name(&self) -> &str {
        "local"
    }
    fn model_name(&self) -> &str {
        &self.model_name
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = texts.to_vec();
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let loaded = Arc::clone(&self.loaded);

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| anyhow::anyhow!("Local embedding model lock poisoned"))?;
            if guard.is_none() {
                let instance = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
                *guard = Some(instance);
            }
            let Some(instance) = guard.as_mut() else {
                bail!("Local embedding model unavailable");
            };
            instance
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await?
    }
}

#[cfg(feature = "local-embeddings")]
fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, multilingual-e5-large",
            other
        ),
    }
}

/// Create the [`EmbeddingProvider`] for a `(backend, model)` pair.
///
/// # Errors
///
/// Returns an error if the provider cannot be initialized (missing API key
/// or the `local-embeddings` feature was not compiled in).
pub fn create_provider(
    config: &EmbeddingConfig,
    backend: EmbeddingBackend,
    model: &str,
) -> Result<Arc<dyn EmbeddingProvider>> {
    match backend {
        EmbeddingBackend::Ollama => Ok(Arc::new(OllamaProvider::new(config, model)?)),
        EmbeddingBackend::Openai => Ok(Arc::new(OpenAIProvider::new(config, model)?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingBackend::Local => Ok(Arc::new(LocalProvider::new(config, model)?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingBackend::Local => {
            bail!("Local embedding provider requires --features local-embeddings")
        }
    }
}

// ============ Gateway ============

/// Per-run wrapper around one provider.
pub struct EmbeddingGateway {
    provider: Arc<dyn EmbeddingProvider>,
    dims_override: Option<usize>,
    dims: OnceCell<usize>,
}

impl EmbeddingGateway {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            provider,
            dims_override: None,
            dims: OnceCell::new(),
        }
    }

    /// Pin dimensionality from configuration instead of the catalog or a probe.
    pub fn with_dims(mut self, dims: Option<usize>) -> Self {
        self.dims_override = dims;
        self
    }

    pub fn key(&self) -> CollectionKey {
        CollectionKey::new(self.provider.provider_name(), self.provider.model_name())
    }

    /// Vector length produced by this model, resolved once and cached.
    ///
    /// Order: configured override, catalog entry, then a one-text probe.
    pub async fn dimensions(&self) -> EngineResult<usize> {
        let dims = self
            .dims
            .get_or_try_init(|| async {
                if let Some(d) = self.dims_override.or_else(|| self.provider.known_dims()) {
                    return Ok::<usize, EmbeddingFailure>(d);
                }
                debug!(model = %self.provider.model_name(), "probing embedding dimensionality");
                let probe = self
                    .provider
                    .embed_batch(&["dimension probe".to_string()])
                    .await
                    .map_err(|e| EmbeddingFailure::new(format!("{:#}", e)))?;
                match probe.first() {
                    Some(v) if !v.is_empty() => Ok(v.len()),
                    _ => Err(EmbeddingFailure::new("provider returned an empty probe vector")),
                }
            })
            .await?;
        Ok(*dims)
    }

    /// Embed `texts`, one outcome per input in the same order.
    ///
    /// A failed batch call is retried text by text so only the offending
    /// entries are marked failed. Vectors of the wrong length are failures.
    pub async fn embed_batch(
        &self,
        texts: &[String],
    ) -> EngineResult<Vec<Result<Vec<f32>, EmbeddingFailure>>> {
        let dims = self.dimensions().await?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let whole = match self.provider.embed_batch(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => Ok(vectors),
            Ok(vectors) => {
                warn!(
                    expected = texts.len(),
                    got = vectors.len(),
                    "embedding batch returned the wrong number of vectors"
                );
                Err(EmbeddingFailure::new(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    vectors.len()
                )))
            }
            Err(e) => {
                let message = format!("{:#}", e);
                warn!(error = %message, size = texts.len(), "embedding batch failed");
                Err(EmbeddingFailure::new(message))
            }
        };

        let outcomes = match whole {
            Ok(vectors) => vectors.into_iter().map(Ok).collect(),
            Err(failure) if texts.len() == 1 => vec![Err(failure)],
            Err(_) => {
                let mut outcomes = Vec::with_capacity(texts.len());
                for text in texts {
                    let single = self.provider.embed_batch(std::slice::from_ref(text)).await;
                    outcomes.push(match single {
                        Ok(mut v) if v.len() == 1 => Ok(v.remove(0)),
                        Ok(v) => Err(EmbeddingFailure::new(format!(
                            "expected 1 vector, got {}",
                            v.len()
                        ))),
                        Err(e) => Err(EmbeddingFailure::new(format!("{:#}", e))),
                    });
                }
                outcomes
            }
        };

        Ok(outcomes
            .into_iter()
            .map(|outcome| {
                outcome.and_then(|v| {
                    if v.len() == dims {
                        Ok(v)
                    } else {
                        Err(EmbeddingFailure::new(format!(
                            "vector has {} dimensions, expected {}",
                            v.len(),
                            dims
                        )))
                    }
                })
            })
            .collect())
    }

    /// Embed a single query text.
    pub async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        let mut outcomes = self.embed_batch(&[text.to_string()]).await?;
        match outcomes.pop() {
            Some(Ok(v)) => Ok(v),
            Some(Err(e)) => Err(e.into()),
            None => Err(EmbeddingFailure::new("Empty embedding response").into()),
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use mailvec::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails any batch containing a text that starts with `poison`.
    struct Picky {
        calls: AtomicUsize,
        dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for Picky {
        fn provider_name(&self) -> &str {
            "test"
        }
        fn model_name(&self) -> &str {
            "picky"
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| t.starts_with("poison")) {
                bail!("model refused input");
            }
            Ok(texts
                .iter()
                .map(|t| {
                    if t == "short" {
                        vec![1.0]
                    } else {
                        vec![t.len() as f32; self.dims]
                    }
                })
                .collect())
        }
    }

    fn gateway(dims: usize) -> (Arc<Picky>, EmbeddingGateway) {
        let provider = Arc::new(Picky {
            calls: AtomicUsize::new(0),
            dims,
        });
        (provider.clone(), EmbeddingGateway::new(provider))
    }

    #[tokio::test]
    async fn dimensions_are_probed_once() {
        let (provider, gw) = gateway(4);
        assert_eq!(gw.dimensions().await.unwrap(), 4);
        assert_eq!(gw.dimensions().await.unwrap(), 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gw.key(), CollectionKey::new("test", "picky"));
    }

    #[tokio::test]
    async fn override_skips_probe() {
        let (provider, gw) = gateway(4);
        let gw = gw.with_dims(Some(4));
        assert_eq!(gw.dimensions().await.unwrap(), 4);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_are_isolated_per_text() {
        let (_, gw) = gateway(3);
        let texts: Vec<String> = ["alpha", "poison pill", "gamma", "short"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let outcomes = gw.embed_batch(&texts).await.unwrap();
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].as_ref().unwrap(), &vec![5.0; 3]);
        assert!(outcomes[1].is_err());
        assert_eq!(outcomes[2].as_ref().unwrap(), &vec![5.0; 3]);
        assert!(outcomes[3].as_ref().unwrap_err().message.contains("expected 3"));
    }

    #[test]
    fn openai_response_sorted_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn ollama_response_parsed() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25], [1.0, 2.0]]});
        let vecs = parse_ollama_response(&json).unwrap();
        assert_eq!(vecs[1], vec![1.0, 2.0]);
        assert!(parse_ollama_response(&serde_json::json!({"embeddings": [1]})).is_err());
    }

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &b);
        assert!(sim.abs() < 1e-6);
    }

    #[test]
    fn test_cosine_different_lengths() {
        let a = vec![1.0, 2.0];
        let b = vec![1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }
}
