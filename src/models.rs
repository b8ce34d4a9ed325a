//! Core data models used throughout mailvec.
//!
//! These types represent the documents, collections, and sync cursors that
//! flow through the indexing and retrieval pipeline.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A normalized mail message as produced by a document source.
///
/// Header names are lower-cased. Once fetched a document is never mutated;
/// re-indexing the same `id` replaces the stored record wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub thread_id: String,
    pub timestamp: DateTime<Utc>,
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub snippet: String,
    pub body_text: String,
    pub raw_size: u64,
}

impl Document {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn subject(&self) -> &str {
        self.header("subject").unwrap_or("(No Subject)")
    }

    pub fn sender(&self) -> &str {
        self.header("from").unwrap_or("")
    }

    pub fn recipients(&self) -> &str {
        self.header("to").unwrap_or("")
    }

    /// The text handed to the embedding model: a short header preamble
    /// followed by the body, cut to `max_chars` characters.
    pub fn embedding_text(&self, max_chars: usize) -> String {
        let text = format!(
            "Subject: {}\nFrom: {}\nTo: {}\n\n{}",
            self.subject(),
            self.sender(),
            self.recipients(),
            self.body_text
        );
        crate::normalize::truncate_chars(&text, max_chars).to_string()
    }

    /// Position of this document in cursor order.
    pub fn position(&self) -> CursorPosition {
        CursorPosition {
            timestamp: self.timestamp,
            document_id: self.id.clone(),
        }
    }
}

/// Identity of a collection: one per `(provider, model)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionKey {
    pub provider: String,
    pub model: String,
}

impl CollectionKey {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

/// A registered collection and its pinned dimensionality.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Collection {
    pub key: CollectionKey,
    pub dims: usize,
    pub document_count: u64,
    pub created_at: DateTime<Utc>,
}

/// A vector plus the document metadata retained next to it.
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub document: Document,
    pub vector: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn document_id(&self) -> &str {
        &self.document.id
    }
}

/// A point in the `(timestamp, document_id)` order used by sync cursors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub timestamp: DateTime<Utc>,
    pub document_id: String,
}

impl Ord for CursorPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.document_id.cmp(&other.document_id))
    }
}

impl PartialOrd for CursorPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CursorPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.timestamp.format("%Y-%m-%dT%H:%M:%SZ"),
            self.document_id
        )
    }
}

/// Progress marker for one `(filter, collection)` pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncCursor {
    pub signature: String,
    pub filter_query: String,
    pub collection_key: CollectionKey,
    pub position: CursorPosition,
    pub total_indexed: u64,
    pub updated_at: DateTime<Utc>,
}

/// Stable signature of a mailbox filter query.
///
/// Whitespace runs are collapsed before hashing so `"from:a  is:unread"`
/// and `" from:a is:unread "` share a cursor.
pub fn query_signature(filter: &str) -> String {
    let normalized = filter.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// A stored vector's similarity to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredId {
    pub document_id: String,
    pub score: f32,
    pub timestamp: DateTime<Utc>,
}

/// Restrictions applied to nearest-neighbor queries.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Case-insensitive substring of the `from` header.
    pub from: Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.since.is_none() && self.until.is_none() && self.from.is_none()
    }

    pub fn matches(&self, document: &Document) -> bool {
        if let Some(since) = self.since {
            if document.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if document.timestamp > until {
                return false;
            }
        }
        if let Some(from) = &self.from {
            let needle = from.to_lowercase();
            if !document.sender().to_lowercase().contains(&needle) {
                return false;
            }
        }
        true
    }
}

/// A retrieval result: a hydrated document and its similarity score.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub score: f32,
    pub document: Document,
}

/// Per-collection summary reported by `stats`.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub key: CollectionKey,
    pub dims: usize,
    pub document_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_sync: Option<DateTime<Utc>>,
    pub cursor_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc(id: &str, secs: i64) -> Document {
        let mut headers = BTreeMap::new();
        headers.insert("subject".to_string(), "Quarterly report".to_string());
        headers.insert("from".to_string(), "Alice <alice@example.com>".to_string());
        headers.insert("to".to_string(), "bob@example.com".to_string());
        Document {
            id: id.to_string(),
            thread_id: "t1".to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
            headers,
            labels: vec![],
            snippet: String::new(),
            body_text: "Numbers are up.".to_string(),
            raw_size: 42,
        }
    }

    #[test]
    fn signature_ignores_whitespace_differences() {
        assert_eq!(
            query_signature("from:alice   is:unread"),
            query_signature("  from:alice is:unread ")
        );
        assert_ne!(query_signature("from:alice"), query_signature("from:bob"));
        assert_eq!(query_signature("").len(), 64);
    }

    #[test]
    fn cursor_positions_order_by_time_then_id() {
        let a = doc("a", 100).position();
        let b = doc("b", 100).position();
        let c = doc("a", 200).position();
        assert!(a < b);
        assert!(b < c);
        assert_eq!(a.cmp(&a.clone()), Ordering::Equal);
    }

    #[test]
    fn embedding_text_includes_headers_and_is_bounded() {
        let d = doc("a", 1);
        let text = d.embedding_text(10_000);
        assert!(text.starts_with("Subject: Quarterly report\nFrom: Alice"));
        assert!(text.ends_with("Numbers are up."));
        assert_eq!(d.embedding_text(7), "Subject");
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let d = doc("a", 1);
        assert_eq!(d.header("Subject"), Some("Quarterly report"));
        assert_eq!(d.header("cc"), None);
    }

    #[test]
    fn filters_match_sender_and_window() {
        let d = doc("a", 1_000);
        let filters = QueryFilters {
            from: Some("ALICE".to_string()),
            ..Default::default()
        };
        assert!(filters.matches(&d));

        let filters = QueryFilters {
            since: Some(Utc.timestamp_opt(2_000, 0).unwrap()),
            ..Default::default()
        };
        assert!(!filters.matches(&d));
        assert!(QueryFilters::default().is_empty());
    }
}
