//! Answering Orchestrator and the `ask` command.
//!
//! Retrieves the closest emails for a question, packs them into a bounded
//! context block, and asks a completion model to answer from that context
//! alone. When retrieval finds nothing the model is never called.

use std::sync::OnceLock;

use anyhow::Result;
use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::completion::{create_completion_provider, CompletionProvider};
use crate::config::{CompletionBackend, Config, EmbeddingBackend};
use crate::error::{EngineError, EngineResult};
use crate::models::{QueryFilters, SearchHit};
use crate::normalize::excerpt;
use crate::search::{gateway_for, select_collection, Retriever};
use crate::store::sqlite::SqliteStore;

/// Context packing limits.
#[derive(Debug, Clone, Copy)]
pub struct ContextBounds {
    /// Body characters kept per email.
    pub excerpt_chars: usize,
    /// Total characters across all email blocks.
    pub max_context_chars: usize,
}

impl Default for ContextBounds {
    fn default() -> Self {
        Self {
            excerpt_chars: 1000,
            max_context_chars: 12_000,
        }
    }
}

/// A packed context block and the hits it contains, numbered from 1.
#[derive(Debug, Clone)]
pub struct AnswerContext {
    pub text: String,
    pub items: Vec<SearchHit>,
}

/// Result of [`Answerer::ask`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    /// Retrieval returned nothing; no completion call was made.
    NoResults,
    Grounded {
        text: String,
        /// Documents given to the model, in citation order.
        sources: Vec<SearchHit>,
        context_ids: Vec<String>,
        /// Context items the answer cites as `[n]`.
        referenced_ids: Vec<String>,
    },
}

impl Answer {
    pub const NO_RESULTS_MESSAGE: &'static str = "No relevant emails found for your question.";
}

/// Render hits as numbered email blocks, dropping whole items that would
/// overflow `bounds.max_context_chars`.
pub fn build_context(hits: &[SearchHit], bounds: ContextBounds) -> AnswerContext {
    let mut text = String::new();
    let mut items = Vec::new();

    for hit in hits {
        let doc = &hit.document;
        let n = items.len() + 1;
        let mut block = format!(
            "--- Email [{}] ---\nFrom: {}\nTo: {}\nDate: {}\nSubject: {}\n",
            n,
            doc.sender(),
            doc.recipients(),
            doc.timestamp.format("%Y-%m-%d %H:%M"),
            doc.subject()
        );
        let body = doc.body_text.trim();
        if !body.is_empty() {
            block.push_str("Body:\n");
            block.push_str(&excerpt(body, bounds.excerpt_chars));
            block.push('\n');
        }
        block.push('\n');

        if text.chars().count() + block.chars().count() > bounds.max_context_chars {
            debug!(document_id = %doc.id, "context budget reached, dropping item");
            continue;
        }
        text.push_str(&block);
        items.push(hit.clone());
    }

    AnswerContext { text, items }
}

/// Full prompt sent to the completion model.
pub fn build_prompt(question: &str, context: &AnswerContext) -> String {
    format!(
        "You are a helpful assistant analyzing emails. Based on the following emails, \
         please answer this question: {question}\n\n\
         Email context:\n{context}\n\
         Answer using only the information in these emails and cite the emails you rely on \
         by their number, e.g. [1]. If the emails don't contain enough information to answer \
         the question, say so. Today's date: {today}.",
        question = question.trim(),
        context = context.text,
        today = Utc::now().format("%Y-%m-%d"),
    )
}

fn citation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid citation regex"))
}

/// Ids of context items cited as `[n]` in `answer`, in first-cited order.
pub fn cited_ids(answer: &str, context: &AnswerContext) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in citation_re().captures_iter(answer) {
        let Ok(n) = caps[1].parse::<usize>() else {
            continue;
        };
        if let Some(hit) = n.checked_sub(1).and_then(|i| context.items.get(i)) {
            if !ids.contains(&hit.document.id) {
                ids.push(hit.document.id.clone());
            }
        }
    }
    ids
}

pub struct Answerer<'a> {
    retriever: &'a Retriever<'a>,
    completion: &'a dyn CompletionProvider,
    search_limit: usize,
    bounds: ContextBounds,
}

impl<'a> Answerer<'a> {
    pub fn new(retriever: &'a Retriever<'a>, completion: &'a dyn CompletionProvider) -> Self {
        Self {
            retriever,
            completion,
            search_limit: 5,
            bounds: ContextBounds::default(),
        }
    }

    pub fn with_search_limit(mut self, limit: usize) -> Self {
        self.search_limit = limit;
        self
    }

    pub fn with_bounds(mut self, bounds: ContextBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub async fn ask(&self, question: &str, max_tokens: u32) -> EngineResult<Answer> {
        let hits = self
            .retriever
            .search(question, self.search_limit, &QueryFilters::default())
            .await?;
        if hits.is_empty() {
            return Ok(Answer::NoResults);
        }

        let context = build_context(&hits, self.bounds);
        if context.items.is_empty() {
            return Ok(Answer::NoResults);
        }
        let prompt = build_prompt(question, &context);
        info!(
            model = %self.completion.model_name(),
            items = context.items.len(),
            prompt_chars = prompt.len(),
            "requesting answer"
        );

        let text = self
            .completion
            .complete(&prompt, max_tokens)
            .await
            .map_err(|e| EngineError::Completion(format!("{:#}", e)))?;

        let referenced_ids = cited_ids(&text, &context);
        let context_ids = context
            .items
            .iter()
            .map(|h| h.document.id.clone())
            .collect();
        Ok(Answer::Grounded {
            text,
            sources: context.items,
            context_ids,
            referenced_ids,
        })
    }
}

/// CLI options for `mailvec ask`.
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub question: String,
    pub search_limit: Option<usize>,
    pub provider: Option<CompletionBackend>,
    pub model: Option<String>,
    pub embedding_provider: Option<EmbeddingBackend>,
    pub embedding_model: Option<String>,
    pub max_tokens: Option<u32>,
}

pub async fn run_ask(config: &Config, options: AskOptions) -> Result<()> {
    let (backend, model) = config
        .completion
        .resolve(options.provider, options.model.as_deref());
    let completion = create_completion_provider(config, backend, &model)?;
    let max_tokens = options.max_tokens.unwrap_or(config.completion.max_tokens);
    let bounds = ContextBounds {
        excerpt_chars: config.retrieval.excerpt_chars,
        max_context_chars: config.retrieval.max_context_chars,
    };

    let store = SqliteStore::open(config).await?;
    let result = async {
        let key = select_collection(
            config,
            &store,
            options.embedding_provider,
            options.embedding_model.as_deref(),
        )
        .await?;
        let gateway = gateway_for(config, &key)?;
        let retriever = Retriever::new(&store, &gateway);
        let answer = Answerer::new(&retriever, completion.as_ref())
            .with_search_limit(options.search_limit.unwrap_or(config.retrieval.ask_limit))
            .with_bounds(bounds)
            .ask(&options.question, max_tokens)
            .await?;
        Ok::<_, anyhow::Error>((key, answer))
    }
    .await;
    store.close().await;
    let (key, answer) = result?;

    match answer {
        Answer::NoResults => println!("{}", Answer::NO_RESULTS_MESSAGE),
        Answer::Grounded {
            text,
            sources,
            referenced_ids,
            ..
        } => {
            println!("collection: {}", key);
            println!("model: {}/{}", backend.as_str(), model);
            println!();
            println!("{}", text);
            println!();
            println!("Sources:");
            for (i, hit) in sources.iter().enumerate() {
                let marker = if referenced_ids.contains(&hit.document.id) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "  {}[{}] [{:.2}] {} ({}, {})",
                    marker,
                    i + 1,
                    hit.score,
                    hit.document.subject(),
                    hit.document.sender(),
                    hit.document.timestamp.format("%Y-%m-%d")
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;
    use chrono::TimeZone;
    use std::collections::BTreeMap;

    fn hit(id: &str, body: &str) -> SearchHit {
        let mut headers = BTreeMap::new();
        headers.insert("from".into(), "carol@example.com".into());
        headers.insert("subject".into(), format!("About {}", id));
        SearchHit {
            score: 0.9,
            document: Document {
                id: id.into(),
                thread_id: id.into(),
                timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap(),
                headers,
                labels: vec![],
                snippet: String::new(),
                body_text: body.into(),
                raw_size: body.len() as u64,
            },
        }
    }

    #[test]
    fn context_numbers_items_and_truncates_bodies() {
        let hits = vec![hit("m1", &"x".repeat(50)), hit("m2", "short body")];
        let ctx = build_context(
            &hits,
            ContextBounds {
                excerpt_chars: 10,
                max_context_chars: 10_000,
            },
        );
        assert_eq!(ctx.items.len(), 2);
        assert!(ctx.text.contains("--- Email [1] ---"));
        assert!(ctx.text.contains("--- Email [2] ---"));
        assert!(ctx.text.contains(&format!("{}...", "x".repeat(10))));
        assert!(!ctx.text.contains(&"x".repeat(11)));
        assert!(ctx.text.contains("Date: 2024-05-01 09:30"));
    }

    #[test]
    fn context_drops_items_past_the_budget() {
        let hits = vec![hit("m1", "first"), hit("m2", &"y".repeat(500))];
        let ctx = build_context(
            &hits,
            ContextBounds {
                excerpt_chars: 1000,
                max_context_chars: 200,
            },
        );
        assert_eq!(ctx.items.len(), 1);
        assert_eq!(ctx.items[0].document.id, "m1");
        assert!(ctx.text.chars().count() <= 200);
    }

    #[test]
    fn citations_map_back_to_context_ids() {
        let ctx = build_context(
            &[hit("m1", "a"), hit("m2", "b"), hit("m3", "c")],
            ContextBounds::default(),
        );
        let ids = cited_ids("Per [3] and [1], yes. See also [3] and [9].", &ctx);
        assert_eq!(ids, vec!["m3".to_string(), "m1".to_string()]);
    }

    #[test]
    fn prompt_grounds_answer_in_context() {
        let ctx = build_context(&[hit("m1", "Lunch moved to Friday")], ContextBounds::default());
        let prompt = build_prompt("When is lunch?", &ctx);
        assert!(prompt.contains("When is lunch?"));
        assert!(prompt.contains("Lunch moved to Friday"));
        assert!(prompt.contains("only the information in these emails"));
        assert!(prompt.contains(&Utc::now().format("%Y-%m-%d").to_string()));
    }
}
