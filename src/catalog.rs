//! Known models and the `models` command.
//!
//! The embedding table doubles as the dimensionality lookup used before a
//! provider is ever called; unknown models are probed instead.

use anyhow::Result;
use std::time::Duration;

use crate::collection::CollectionManager;
use crate::config::Config;
use crate::store::sqlite::SqliteStore;

pub struct ModelInfo {
    pub provider: &'static str,
    pub name: &'static str,
    pub dims: Option<usize>,
    pub note: &'static str,
}

pub const EMBEDDING_MODELS: &[ModelInfo] = &[
    ModelInfo { provider: "ollama", name: "nomic-embed-text", dims: Some(768), note: "local, good general default" },
    ModelInfo { provider: "ollama", name: "mxbai-embed-large", dims: Some(1024), note: "local, higher quality, slower" },
    ModelInfo { provider: "ollama", name: "all-minilm", dims: Some(384), note: "local, small and fast" },
    ModelInfo { provider: "ollama", name: "snowflake-arctic-embed", dims: Some(1024), note: "local" },
    ModelInfo { provider: "openai", name: "text-embedding-3-small", dims: Some(1536), note: "cloud, cheap" },
    ModelInfo { provider: "openai", name: "text-embedding-3-large", dims: Some(3072), note: "cloud, best quality" },
    ModelInfo { provider: "openai", name: "text-embedding-ada-002", dims: Some(1536), note: "cloud, legacy" },
    ModelInfo { provider: "local", name: "all-minilm-l6-v2", dims: Some(384), note: "in-process" },
    ModelInfo { provider: "local", name: "bge-small-en-v1.5", dims: Some(384), note: "in-process" },
    ModelInfo { provider: "local", name: "bge-base-en-v1.5", dims: Some(768), note: "in-process" },
    ModelInfo { provider: "local", name: "bge-large-en-v1.5", dims: Some(1024), note: "in-process" },
    ModelInfo { provider: "local", name: "nomic-embed-text-v1.5", dims: Some(768), note: "in-process" },
    ModelInfo { provider: "local", name: "multilingual-e5-small", dims: Some(384), note: "in-process" },
    ModelInfo { provider: "local", name: "multilingual-e5-base", dims: Some(768), note: "in-process" },
    ModelInfo { provider: "local", name: "multilingual-e5-large", dims: Some(1024), note: "in-process" },
];

pub const COMPLETION_MODELS: &[ModelInfo] = &[
    ModelInfo { provider: "ollama", name: "llama3.2", dims: None, note: "local default" },
    ModelInfo { provider: "ollama", name: "mistral", dims: None, note: "local" },
    ModelInfo { provider: "openai", name: "gpt-4o-mini", dims: None, note: "cloud default" },
    ModelInfo { provider: "openai", name: "gpt-4o", dims: None, note: "cloud" },
    ModelInfo { provider: "openai", name: "gpt-4-turbo", dims: None, note: "cloud" },
    ModelInfo { provider: "openai", name: "gpt-3.5-turbo", dims: None, note: "cloud, legacy" },
];

/// Dimensionality of a known embedding model. Ollama tags (`name:latest`)
/// resolve to their base name.
pub fn embedding_dims(provider: &str, model: &str) -> Option<usize> {
    let base = if provider == "ollama" {
        model.split(':').next().unwrap_or(model)
    } else {
        model
    };
    EMBEDDING_MODELS
        .iter()
        .find(|m| m.provider == provider && m.name == base)
        .and_then(|m| m.dims)
}

/// Names of models installed in the local Ollama server, if it answers.
pub async fn installed_ollama_models(url: &str) -> Option<Vec<String>> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()
        .ok()?;
    let json: serde_json::Value = client
        .get(format!("{}/api/tags", url.trim_end_matches('/')))
        .send()
        .await
        .ok()?
        .error_for_status()
        .ok()?
        .json()
        .await
        .ok()?;
    Some(
        json.get("models")?
            .as_array()?
            .iter()
            .filter_map(|m| m.get("name").and_then(|n| n.as_str()))
            .map(str::to_string)
            .collect(),
    )
}

/// Run the `models` command: known models, existing collections, and
/// whatever the local Ollama server has pulled.
pub async fn run_models(config: &Config) -> Result<()> {
    println!("Embedding models");
    println!("================");
    println!("  {:<8} {:<26} {:>6}   NOTE", "PROVIDER", "MODEL", "DIMS");
    for m in EMBEDDING_MODELS {
        println!(
            "  {:<8} {:<26} {:>6}   {}",
            m.provider,
            m.name,
            m.dims.map(|d| d.to_string()).unwrap_or_else(|| "?".into()),
            m.note
        );
    }

    println!();
    println!("Completion models");
    println!("=================");
    for m in COMPLETION_MODELS {
        println!("  {:<8} {:<26}   {}", m.provider, m.name, m.note);
    }

    let db_path = config.storage.db_path();
    if db_path.exists() {
        let store = SqliteStore::open(config).await?;
        let manager = CollectionManager::new(&store);
        let collections = manager.list().await?;
        println!();
        println!("Indexed collections");
        println!("===================");
        if collections.is_empty() {
            println!("  (none, run `mailvec sync` first)");
        }
        for c in collections {
            println!(
                "  {:<40} {:>6} dims {:>8} emails",
                c.key.to_string(),
                c.dims,
                c.document_count
            );
        }
        store.close().await;
    }

    println!();
    match installed_ollama_models(&config.embedding.ollama_url).await {
        Some(models) if !models.is_empty() => {
            println!("Installed Ollama models ({})", config.embedding.ollama_url);
            for name in models {
                println!("  {}", name);
            }
        }
        Some(_) => println!("Ollama is running but has no models pulled."),
        None => println!(
            "Ollama not reachable at {} (install models with `ollama pull <name>`).",
            config.embedding.ollama_url
        ),
    }

    Ok(())
}
