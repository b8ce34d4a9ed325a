//! # mailvec
//!
//! Incremental mailbox indexing into a local vector store, with semantic
//! search and grounded question answering over the indexed mail.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌─────────────┐
//! │   Gmail    │──▶│   Indexer    │──▶│   SQLite    │
//! │  (source)  │   │ embed+upsert │   │ vec+cursors │
//! └────────────┘   └──────────────┘   └──────┬──────┘
//!                                            │
//!                        ┌───────────────────┤
//!                        ▼                   ▼
//!                  ┌──────────┐        ┌──────────┐
//!                  │  search  │───────▶│   ask    │
//!                  │ (cosine) │        │  (LLM)   │
//!                  └──────────┘        └──────────┘
//! ```
//!
//! Each `(provider, model)` pair owns its own collection, so vectors from
//! different embedding models never mix. Sync cursors are kept per mailbox
//! filter and collection, and only ever move forward.
//!
//! ## Quick Start
//!
//! ```bash
//! mailvec init
//! mailvec sync --query "newer_than:1y" --incremental
//! mailvec search "flight confirmation" --detailed
//! mailvec ask "When does my lease renew?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Engine error taxonomy |
//! | [`source`] | Document source contract and retry policy |
//! | [`gmail`] | Gmail REST adapter |
//! | [`embedding`] | Embedding providers and the per-run gateway |
//! | [`completion`] | Completion providers |
//! | [`store`] | Vector, cursor and lock storage |
//! | [`collection`] | Collection policy layer |
//! | [`index`] | Sync orchestration |
//! | [`search`] | Retrieval |
//! | [`ask`] | Grounded answering |
//! | [`check`] | Service connectivity checks |

pub mod ask;
pub mod catalog;
pub mod check;
pub mod collection;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod gmail;
pub mod http;
pub mod index;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod search;
pub mod source;
pub mod stats;
pub mod store;
