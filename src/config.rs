use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Embedding backends selectable from config and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local Ollama server (`/api/embed`).
    Ollama,
    /// OpenAI embeddings API (requires `OPENAI_API_KEY`).
    Openai,
    /// In-process fastembed models.
    Local,
}

impl EmbeddingBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingBackend::Ollama => "ollama",
            EmbeddingBackend::Openai => "openai",
            EmbeddingBackend::Local => "local",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            EmbeddingBackend::Ollama => "nomic-embed-text",
            EmbeddingBackend::Openai => "text-embedding-3-small",
            EmbeddingBackend::Local => "all-minilm-l6-v2",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "ollama" => Some(EmbeddingBackend::Ollama),
            "openai" => Some(EmbeddingBackend::Openai),
            "local" => Some(EmbeddingBackend::Local),
            _ => None,
        }
    }
}

/// Completion backends used by `ask`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CompletionBackend {
    Ollama,
    Openai,
}

impl CompletionBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionBackend::Ollama => "ollama",
            CompletionBackend::Openai => "openai",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            CompletionBackend::Ollama => "llama3.2",
            CompletionBackend::Openai => "gpt-4o-mini",
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            db_file: default_db_file(),
        }
    }
}

impl StorageConfig {
    pub fn db_path(&self) -> PathBuf {
        self.base_dir.join(&self.db_file)
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_db_file() -> String {
    "mailvec.sqlite".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GmailConfig {
    #[serde(default = "default_gmail_user")]
    pub user: String,
    #[serde(default = "default_token_path")]
    pub token_path: PathBuf,
    #[serde(default = "default_gmail_api_base")]
    pub api_base: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_gmail_timeout")]
    pub timeout_secs: u64,
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            user: default_gmail_user(),
            token_path: default_token_path(),
            api_base: default_gmail_api_base(),
            page_size: default_page_size(),
            timeout_secs: default_gmail_timeout(),
        }
    }
}

fn default_gmail_user() -> String {
    "me".to_string()
}
fn default_token_path() -> PathBuf {
    PathBuf::from("./credentials/token.json")
}
fn default_gmail_api_base() -> String {
    "https://gmail.googleapis.com".to_string()
}
fn default_page_size() -> u32 {
    500
}
fn default_gmail_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_backend")]
    pub provider: EmbeddingBackend,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_openai_url")]
    pub openai_url: String,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_backend(),
            model: None,
            dims: None,
            batch_size: default_embedding_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
            ollama_url: default_ollama_url(),
            openai_url: default_openai_url(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl EmbeddingConfig {
    /// Resolve the `(backend, model)` pair for a run, applying CLI overrides.
    ///
    /// A provider override without a model falls back to that provider's
    /// default model, unless the override names the configured provider.
    pub fn resolve(
        &self,
        provider: Option<EmbeddingBackend>,
        model: Option<&str>,
    ) -> (EmbeddingBackend, String) {
        let backend = provider.unwrap_or(self.provider);
        let model = match model {
            Some(m) => m.to_string(),
            None if backend == self.provider => self
                .model
                .clone()
                .unwrap_or_else(|| backend.default_model().to_string()),
            None => backend.default_model().to_string(),
        };
        (backend, model)
    }

    /// Configured dims override, only meaningful for the configured model.
    pub fn dims_for(&self, backend: EmbeddingBackend, model: &str) -> Option<usize> {
        let (cfg_backend, cfg_model) = self.resolve(None, None);
        if cfg_backend == backend && cfg_model == model {
            self.dims
        } else {
            None
        }
    }
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::Ollama
}
fn default_embedding_batch_size() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    60
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_openai_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_max_input_chars() -> usize {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_completion_backend")]
    pub provider: CompletionBackend,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: default_completion_backend(),
            model: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_completion_timeout(),
        }
    }
}

impl CompletionConfig {
    pub fn resolve(
        &self,
        provider: Option<CompletionBackend>,
        model: Option<&str>,
    ) -> (CompletionBackend, String) {
        let backend = provider.unwrap_or(self.provider);
        let model = match model {
            Some(m) => m.to_string(),
            None if backend == self.provider => self
                .model
                .clone()
                .unwrap_or_else(|| backend.default_model().to_string()),
            None => backend.default_model().to_string(),
        };
        (backend, model)
    }
}

fn default_completion_backend() -> CompletionBackend {
    CompletionBackend::Ollama
}
fn default_max_tokens() -> u32 {
    500
}
fn default_temperature() -> f32 {
    0.7
}
fn default_completion_timeout() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_sync_batch_size")]
    pub batch_size: usize,
    /// Attempts per page fetch, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_prefetch_pages")]
    pub prefetch_pages: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_sync_batch_size(),
            max_attempts: default_max_attempts(),
            retry_base_ms: default_retry_base_ms(),
            lock_ttl_secs: default_lock_ttl_secs(),
            prefetch_pages: default_prefetch_pages(),
        }
    }
}

fn default_sync_batch_size() -> usize {
    100
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    500
}
fn default_lock_ttl_secs() -> u64 {
    3600
}
fn default_prefetch_pages() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    #[serde(default = "default_ask_limit")]
    pub ask_limit: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            search_limit: default_search_limit(),
            ask_limit: default_ask_limit(),
            excerpt_chars: default_excerpt_chars(),
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_search_limit() -> usize {
    10
}
fn default_ask_limit() -> usize {
    5
}
fn default_excerpt_chars() -> usize {
    1000
}
fn default_max_context_chars() -> usize {
    12_000
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields [`Config::minimal`].
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        Ok(Config::minimal())
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.sync.batch_size == 0 {
        anyhow::bail!("sync.batch_size must be > 0");
    }
    if config.sync.max_attempts == 0 {
        anyhow::bail!("sync.max_attempts must be >= 1");
    }
    if config.sync.prefetch_pages == 0 {
        anyhow::bail!("sync.prefetch_pages must be >= 1");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0 when set");
    }
    if config.embedding.max_input_chars == 0 {
        anyhow::bail!("embedding.max_input_chars must be > 0");
    }
    if config.gmail.page_size == 0 || config.gmail.page_size > 500 {
        anyhow::bail!("gmail.page_size must be in [1, 500]");
    }
    if config.retrieval.search_limit == 0 || config.retrieval.ask_limit == 0 {
        anyhow::bail!("retrieval.search_limit and retrieval.ask_limit must be >= 1");
    }
    if config.retrieval.excerpt_chars == 0 {
        anyhow::bail!("retrieval.excerpt_chars must be > 0");
    }
    if config.retrieval.max_context_chars < config.retrieval.excerpt_chars {
        anyhow::bail!("retrieval.max_context_chars must be >= retrieval.excerpt_chars");
    }
    if config.completion.max_tokens == 0 {
        anyhow::bail!("completion.max_tokens must be > 0");
    }
    if !(0.0..=2.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.sync.batch_size, 100);
        assert_eq!(config.retrieval.ask_limit, 5);
        assert_eq!(config.completion.max_tokens, 500);
        assert_eq!(config.embedding.provider, EmbeddingBackend::Ollama);
        assert_eq!(config.storage.db_path(), PathBuf::from("./data/mailvec.sqlite"));
    }

    #[test]
    fn provider_override_uses_that_providers_default_model() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            provider = "ollama"
            model = "mxbai-embed-large"
            dims = 1024
            "#,
        )
        .unwrap();
        let (backend, model) = config.embedding.resolve(None, None);
        assert_eq!(backend, EmbeddingBackend::Ollama);
        assert_eq!(model, "mxbai-embed-large");
        assert_eq!(config.embedding.dims_for(backend, &model), Some(1024));

        let (backend, model) = config
            .embedding
            .resolve(Some(EmbeddingBackend::Openai), None);
        assert_eq!(model, "text-embedding-3-small");
        assert_eq!(config.embedding.dims_for(backend, &model), None);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let parsed: std::result::Result<Config, _> = toml::from_str(
            r#"
            [embedding]
            provider = "cohere"
            "#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn invalid_values_fail_validation() {
        let mut config = Config::minimal();
        config.sync.batch_size = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::minimal();
        config.completion.temperature = 3.5;
        assert!(validate(&config).is_err());

        let mut config = Config::minimal();
        config.gmail.page_size = 1000;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn load_config_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailvec.toml");
        std::fs::write(
            &path,
            "[storage]\nbase_dir = \"/tmp/mv\"\n[retrieval]\nsearch_limit = 3\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.retrieval.search_limit, 3);
        assert_eq!(config.storage.base_dir, PathBuf::from("/tmp/mv"));

        assert!(load_config(&dir.path().join("missing.toml")).is_err());
        assert!(load_or_default(&dir.path().join("missing.toml")).is_ok());
    }
}
