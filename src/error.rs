//! Error taxonomy for the indexing and retrieval engine.
//!
//! Provider and storage plumbing returns [`anyhow::Result`]; the engine
//! surfaces the conditions callers act on as [`EngineError`] variants.

use thiserror::Error;

use crate::models::CollectionKey;

/// Failure reported by a document source for a single page request.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// Rate limiting, network failure or a 5xx. Safe to retry the same page.
    #[error("transient source error: {0}")]
    Transient(String),
    /// Malformed filter, bad credentials or any other non-retryable condition.
    #[error("source error: {0}")]
    Fatal(String),
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient(_))
    }
}

/// Failure to produce a vector for one input text.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("embedding failed: {message}")]
pub struct EmbeddingFailure {
    pub message: String,
}

impl EmbeddingFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("mailbox source still failing after {attempts} attempts: {message}")]
    TransientSource { attempts: u32, message: String },

    #[error("mailbox source failed: {0}")]
    FatalSource(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingFailure),

    #[error(
        "collection {key} holds {expected}-dimensional vectors but the model produces {actual}; \
         re-run `mailvec sync --clear` for this model to rebuild it"
    )]
    DimensionMismatch {
        key: CollectionKey,
        expected: usize,
        actual: usize,
    },

    #[error(
        "no collection for {key}; run `mailvec sync --provider {} --model {}` first",
        .key.provider,
        .key.model
    )]
    CollectionNotFound { key: CollectionKey },

    #[error("another sync for {key} is already running (owner {owner})")]
    SyncInProgress { key: CollectionKey, owner: String },

    #[error("lost the sync lock for {key} to another run; stopped after the last completed batch")]
    LockLost { key: CollectionKey },

    #[error("completion failed: {0}")]
    Completion(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl From<SourceError> for EngineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Transient(message) => EngineError::TransientSource {
                attempts: 1,
                message,
            },
            SourceError::Fatal(message) => EngineError::FatalSource(message),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_not_found_names_the_sync_command() {
        let err = EngineError::CollectionNotFound {
            key: CollectionKey::new("ollama", "nomic-embed-text"),
        };
        let msg = err.to_string();
        assert!(msg.contains("mailvec sync --provider ollama --model nomic-embed-text"));
    }

    #[test]
    fn source_errors_map_onto_engine_variants() {
        let fatal: EngineError = SourceError::Fatal("bad query".into()).into();
        assert!(matches!(fatal, EngineError::FatalSource(_)));
        assert!(SourceError::Transient("429".into()).is_transient());
    }
}
