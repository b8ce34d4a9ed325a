//! The `check` command: connectivity to Gmail, Ollama and OpenAI.
//!
//! Each service gets its cheapest authenticated call. OpenAI is
//! skipped when no API key is set.

use std::time::Duration;

use anyhow::{bail, Result};

use crate::catalog::installed_ollama_models;
use crate::config::{Config, GmailConfig};
use crate::gmail::{load_access_token, GmailSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Failed,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Failed => "FAILED",
            CheckStatus::Skipped => "SKIPPED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub service: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

impl CheckResult {
    fn new(service: &'static str, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            service,
            status,
            detail: detail.into(),
        }
    }
}

/// Confirm the access token against `users.getProfile`.
pub async fn check_gmail(config: &GmailConfig, token: Result<String>) -> CheckResult {
    let source = match token.and_then(|t| GmailSource::new(config, t)) {
        Ok(source) => source,
        Err(e) => return CheckResult::new("gmail", CheckStatus::Failed, format!("{:#}", e)),
    };
    match source.profile().await {
        Ok(profile) => CheckResult::new(
            "gmail",
            CheckStatus::Ok,
            format!("{} ({} messages)", profile.email, profile.messages_total),
        ),
        Err(e) => CheckResult::new("gmail", CheckStatus::Failed, e.to_string()),
    }
}

pub async fn check_ollama(url: &str) -> CheckResult {
    match installed_ollama_models(url).await {
        Some(models) => CheckResult::new(
            "ollama",
            CheckStatus::Ok,
            format!("{} ({} models installed)", url, models.len()),
        ),
        None => CheckResult::new(
            "ollama",
            CheckStatus::Failed,
            format!("not reachable at {}", url),
        ),
    }
}

/// List models with the API key; any 2xx means the key is accepted.
pub async fn check_openai(base_url: &str, api_key: Option<String>, timeout: Duration) -> CheckResult {
    let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
        return CheckResult::new("openai", CheckStatus::Skipped, "OPENAI_API_KEY not set");
    };
    let client = match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => return CheckResult::new("openai", CheckStatus::Failed, e.to_string()),
    };

    let url = format!("{}/v1/models", base_url.trim_end_matches('/'));
    match client.get(&url).bearer_auth(api_key.trim()).send().await {
        Ok(response) if response.status().is_success() => {
            CheckResult::new("openai", CheckStatus::Ok, format!("API key accepted at {}", base_url))
        }
        Ok(response) => CheckResult::new(
            "openai",
            CheckStatus::Failed,
            format!("HTTP {} from {}", response.status().as_u16(), url),
        ),
        Err(e) => CheckResult::new("openai", CheckStatus::Failed, format!("request failed: {}", e)),
    }
}

pub async fn check_all(config: &Config) -> Vec<CheckResult> {
    vec![
        check_gmail(&config.gmail, load_access_token(&config.gmail.token_path)).await,
        check_ollama(&config.embedding.ollama_url).await,
        check_openai(
            &config.embedding.openai_url,
            std::env::var("OPENAI_API_KEY").ok(),
            Duration::from_secs(config.embedding.timeout_secs),
        )
        .await,
    ]
}

/// Run the `check` command. Fails when any configured service is unreachable.
pub async fn run_check(config: &Config) -> Result<()> {
    let results = check_all(config).await;

    println!("{:<8} {:<8} DETAIL", "SERVICE", "STATUS");
    for result in &results {
        println!(
            "{:<8} {:<8} {}",
            result.service,
            result.status.as_str(),
            result.detail
        );
    }

    let failed = results
        .iter()
        .filter(|r| r.status == CheckStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{} connection check(s) failed", failed);
    }
    Ok(())
}
