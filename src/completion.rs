//! Text completion providers used by `ask`.
//!
//! - **[`OllamaCompletion`]**: `POST /api/generate` on a local Ollama server.
//! - **[`OpenAICompletion`]**: `POST /v1/chat/completions` (requires `OPENAI_API_KEY`).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::{CompletionBackend, Config};
use crate::http::post_json_with_retry;

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn provider_name(&self) -> &str;
    fn model_name(&self) -> &str;
    /// Generate a completion for `prompt`, bounded to `max_tokens` output tokens.
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

pub struct OllamaCompletion {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OllamaCompletion {
    pub fn new(config: &Config, model: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.completion.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.embedding.ollama_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            temperature: config.completion.temperature,
            max_retries: config.embedding.max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for OllamaCompletion {
    fn provider_name(&self) -> &str {
        "ollama"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": max_tokens,
            }
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/api/generate", self.url),
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_generate(&json)
    }
}

pub fn parse_ollama_generate(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(|r| r.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing response field"))
}

pub struct OpenAICompletion {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAICompletion {
    pub fn new(config: &Config, model: &str) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Self::with_key(config, model, api_key)
    }

    pub fn with_key(config: &Config, model: &str, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.completion.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.embedding.openai_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            temperature: config.completion.temperature,
            max_retries: config.embedding.max_retries,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompletion {
    fn provider_name(&self) -> &str {
        "openai"
    }
    fn model_name(&self) -> &str {
        &self.model
    }
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
            "temperature": self.temperature,
        });
        let json = post_json_with_retry(
            &self.client,
            &format!("{}/v1/chat/completions", self.url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_chat(&json)
    }
}

pub fn parse_openai_chat(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|c| c.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

pub fn create_completion_provider(
    config: &Config,
    backend: CompletionBackend,
    model: &str,
) -> Result<Arc<dyn CompletionProvider>> {
    match backend {
        CompletionBackend::Ollama => Ok(Arc::new(OllamaCompletion::new(config, model)?)),
        CompletionBackend::Openai => Ok(Arc::new(OpenAICompletion::new(config, model)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generate_and_chat_shapes() {
        let ollama = serde_json::json!({"response": "  Yes, on Friday.\n", "done": true});
        assert_eq!(parse_ollama_generate(&ollama).unwrap(), "Yes, on Friday.");

        let openai = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "See [1]."}}]
        });
        assert_eq!(parse_openai_chat(&openai).unwrap(), "See [1].");
        assert!(parse_openai_chat(&serde_json::json!({"choices": []})).is_err());
    }
}
