//! Indexing Orchestrator and the `sync` command.
//!
//! One run: resolve the collection and its dims, take the run lock,
//! optionally clear, read the cursor, then stream mailbox pages through
//! embed → upsert → cursor-advance one batch at a time. The cursor only
//! moves over mail that was upserted, and the run lock is renewed after
//! every batch.
//!
//! Page fetching runs in a spawned task feeding a bounded channel, so the
//! next page downloads while the current batch is embedded. A batch is
//! durable once its upsert and cursor advance have both completed;
//! interruption at any other point leaves the cursor at the previous batch
//! and a re-run re-embeds at most one batch.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collection::CollectionManager;
use crate::config::{Config, EmbeddingBackend};
use crate::embedding::{create_provider, EmbeddingGateway};
use crate::error::{EngineError, EngineResult};
use crate::gmail::GmailSource;
use crate::models::{query_signature, CollectionKey, CursorPosition, Document, EmbeddingRecord};
use crate::progress::{NoProgress, ProgressMode, SyncProgressEvent, SyncProgressReporter};
use crate::source::{
    next_page_with_retry, open_with_retry, DocumentSource, ListRequest, RetryPolicy, SourceOrder,
};
use crate::store::sqlite::SqliteStore;
use crate::store::{AdvanceOutcome, IndexStore, LockOutcome};

/// What to index in one run.
#[derive(Debug, Clone)]
pub struct SyncRequest {
    /// Mailbox filter query; also the identity of the sync cursor.
    pub filter: String,
    /// Maximum number of new documents to consider.
    pub limit: Option<usize>,
    /// Resume after the stored cursor for this filter.
    pub incremental: bool,
    /// Drop the collection and its cursors first.
    pub clear: bool,
    pub batch_size: usize,
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            filter: String::new(),
            limit: None,
            incremental: false,
            clear: false,
            batch_size: 100,
        }
    }
}

/// Outcome of a sync run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub collection: CollectionKey,
    pub cleared: bool,
    pub collection_created: bool,
    /// Cursor the run resumed after, when incremental.
    pub resumed_from: Option<CursorPosition>,
    pub fetched: u64,
    /// Fetched documents at or before the cursor, not re-embedded.
    pub already_indexed: u64,
    pub embedded: u64,
    pub skipped: u64,
    pub skipped_ids: Vec<String>,
    pub upserted: u64,
    pub inserted: u64,
    pub replaced: u64,
    /// Cursor after the run.
    pub cursor: Option<CursorPosition>,
    pub interrupted: bool,
}

impl SyncReport {
    fn new(collection: CollectionKey) -> Self {
        Self {
            collection,
            cleared: false,
            collection_created: false,
            resumed_from: None,
            fetched: 0,
            already_indexed: 0,
            embedded: 0,
            skipped: 0,
            skipped_ids: Vec::new(),
            upserted: 0,
            inserted: 0,
            replaced: 0,
            cursor: None,
            interrupted: false,
        }
    }
}

enum FetchEvent {
    Opened(SourceOrder),
    Page(Vec<Document>),
    Failed(EngineError),
}

/// Aborts the fetch task when the run ends on any path.
struct FetchTask(JoinHandle<()>);

impl Drop for FetchTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Cursor advance postponed to the end of a provider-ordered run.
#[derive(Default)]
struct Deferred {
    max: Option<CursorPosition>,
    inserted: u64,
}

pub struct Indexer<'a> {
    store: &'a dyn IndexStore,
    gateway: &'a EmbeddingGateway,
    source: Arc<dyn DocumentSource>,
    retry: RetryPolicy,
    lock_ttl: Duration,
    prefetch_pages: usize,
    max_input_chars: usize,
    progress: &'a dyn SyncProgressReporter,
    cancel: CancellationToken,
}

impl<'a> Indexer<'a> {
    pub fn new(
        store: &'a dyn IndexStore,
        gateway: &'a EmbeddingGateway,
        source: Arc<dyn DocumentSource>,
    ) -> Self {
        Self {
            store,
            gateway,
            source,
            retry: RetryPolicy::default(),
            lock_ttl: Duration::from_secs(3600),
            prefetch_pages: 2,
            max_input_chars: 8000,
            progress: &NoProgress,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = ttl;
        self
    }

    pub fn with_prefetch_pages(mut self, pages: usize) -> Self {
        self.prefetch_pages = pages.max(1);
        self
    }

    pub fn with_max_input_chars(mut self, chars: usize) -> Self {
        self.max_input_chars = chars.max(1);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn SyncProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one sync under the collection's run lock.
    pub async fn run(&self, request: &SyncRequest) -> EngineResult<SyncReport> {
        if request.batch_size == 0 {
            return Err(EngineError::Config("batch size must be > 0".into()));
        }
        let key = self.gateway.key();
        let dims = self.gateway.dimensions().await?;

        let owner = uuid::Uuid::new_v4().to_string();
        if let LockOutcome::Held { owner: holder } =
            self.store.try_lock(&key, &owner, self.lock_ttl).await?
        {
            return Err(EngineError::SyncInProgress { key, owner: holder });
        }

        let result = self.run_locked(&key, &owner, dims, request).await;

        if let Err(e) = self.store.unlock(&key, &owner).await {
            warn!(collection = %key, error = %e, "failed to release sync lock");
        }
        result
    }

    async fn run_locked(
        &self,
        key: &CollectionKey,
        owner: &str,
        dims: usize,
        request: &SyncRequest,
    ) -> EngineResult<SyncReport> {
        let manager = CollectionManager::new(self.store);
        let signature = query_signature(&request.filter);
        let mut report = SyncReport::new(key.clone());

        if request.clear {
            manager.clear(key).await?;
            report.cleared = true;
            info!(collection = %key, "cleared collection and sync cursors");
        }

        report.collection_created = manager.get(key).await?.is_none();
        manager.ensure(key, dims).await?;

        let since = if request.incremental {
            self.store
                .get_cursor(&signature, key)
                .await?
                .map(|c| c.position)
        } else {
            None
        };
        report.resumed_from = since.clone();
        if let Some(position) = &since {
            info!(collection = %key, cursor = %position, "resuming after cursor");
        }

        let (tx, mut rx) = mpsc::channel(self.prefetch_pages);
        let _fetch = FetchTask(tokio::spawn(fetch_pages(
            Arc::clone(&self.source),
            ListRequest {
                filter: request.filter.clone(),
                since: since.clone(),
                limit: request.limit,
            },
            self.retry.clone(),
            tx,
        )));

        self.progress.report(SyncProgressEvent::Listing {
            collection: key.to_string(),
            filter: request.filter.clone(),
        });

        let mut order = SourceOrder::ProviderNative;
        let mut deferred = Deferred::default();
        let mut pending: Vec<Document> = Vec::with_capacity(request.batch_size);
        let mut accepted = 0usize;

        'pages: loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    report.interrupted = true;
                    break 'pages;
                }
                event = rx.recv() => event,
            };

            let documents = match event {
                None => break,
                Some(FetchEvent::Opened(o)) => {
                    debug!(?o, "mailbox stream opened");
                    order = o;
                    continue;
                }
                Some(FetchEvent::Failed(e)) => {
                    warn!(collection = %key, error = %e, "sync aborted; cursor left at last completed batch");
                    return Err(e);
                }
                Some(FetchEvent::Page(documents)) => documents,
            };

            for doc in documents {
                if request.limit.is_some_and(|limit| accepted >= limit) {
                    break 'pages;
                }
                report.fetched += 1;

                if since.as_ref().is_some_and(|s| doc.position() <= *s) {
                    report.already_indexed += 1;
                    if order == SourceOrder::ProviderNative {
                        // Everything after this point in provider order is older still
                        break 'pages;
                    }
                    continue;
                }

                accepted += 1;
                pending.push(doc);
                if pending.len() >= request.batch_size {
                    let batch = std::mem::take(&mut pending);
                    self.process_batch(key, &signature, request, batch, order, &mut deferred, &mut report)
                        .await?;
                    self.renew_lock(key, owner).await?;
                    if self.cancel.is_cancelled() {
                        report.interrupted = true;
                        break 'pages;
                    }
                }
            }
        }

        if !report.interrupted && !pending.is_empty() {
            let batch = std::mem::take(&mut pending);
            self.process_batch(key, &signature, request, batch, order, &mut deferred, &mut report)
                .await?;
            self.renew_lock(key, owner).await?;
        }

        if !report.interrupted {
            if let Some(max) = deferred.max {
                self.advance(key, &signature, request, &max, deferred.inserted)
                    .await?;
            }
        }

        report.cursor = self
            .store
            .get_cursor(&signature, key)
            .await?
            .map(|c| c.position);

        info!(
            collection = %key,
            fetched = report.fetched,
            embedded = report.embedded,
            skipped = report.skipped,
            upserted = report.upserted,
            interrupted = report.interrupted,
            "sync finished"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_batch(
        &self,
        key: &CollectionKey,
        signature: &str,
        request: &SyncRequest,
        batch: Vec<Document>,
        order: SourceOrder,
        deferred: &mut Deferred,
        report: &mut SyncReport,
    ) -> EngineResult<()> {
        let texts: Vec<String> = batch
            .iter()
            .map(|d| d.embedding_text(self.max_input_chars))
            .collect();
        let outcomes = self.gateway.embed_batch(&texts).await?;
        let size = batch.len();

        let now = Utc::now();
        let mut records = Vec::with_capacity(size);
        let mut first_failure = None;
        for (doc, outcome) in batch.into_iter().zip(outcomes) {
            match outcome {
                Ok(vector) => records.push(EmbeddingRecord {
                    document: doc,
                    vector,
                    created_at: now,
                }),
                Err(e) => {
                    warn!(collection = %key, document_id = %doc.id, error = %e, "skipping document");
                    report.skipped += 1;
                    report.skipped_ids.push(doc.id);
                    first_failure.get_or_insert(e);
                }
            }
        }

        // Nothing embedded means the provider is down, not that the mail is bad
        if records.is_empty() {
            if let Some(failure) = first_failure {
                warn!(collection = %key, size, "no document in the batch could be embedded; aborting");
                return Err(failure.into());
            }
        }
        report.embedded += records.len() as u64;
        let upserted_max = records.iter().map(|r| r.document.position()).max();

        let counts = CollectionManager::new(self.store)
            .upsert(key, &records)
            .await?;
        report.upserted += counts.total();
        report.inserted += counts.inserted;
        report.replaced += counts.replaced;

        if let Some(max) = upserted_max {
            match order {
                SourceOrder::Ascending => {
                    self.advance(key, signature, request, &max, counts.inserted)
                        .await?;
                }
                SourceOrder::ProviderNative => {
                    deferred.inserted += counts.inserted;
                    if deferred.max.as_ref().map_or(true, |m| max > *m) {
                        deferred.max = Some(max);
                    }
                }
            }
        }

        self.progress.report(SyncProgressEvent::Batch {
            collection: key.to_string(),
            fetched: report.fetched,
            embedded: report.embedded,
            skipped: report.skipped,
        });
        Ok(())
    }

    /// Refresh the run lock; another holder means two runs overlapped.
    async fn renew_lock(&self, key: &CollectionKey, owner: &str) -> EngineResult<()> {
        if self.store.renew(key, owner).await? {
            return Ok(());
        }
        warn!(collection = %key, "sync lock taken over by another run");
        Err(EngineError::LockLost { key: key.clone() })
    }

    async fn advance(
        &self,
        key: &CollectionKey,
        signature: &str,
        request: &SyncRequest,
        position: &CursorPosition,
        inserted: u64,
    ) -> EngineResult<()> {
        let outcome = self
            .store
            .advance_cursor(signature, &request.filter, key, position, inserted, false)
            .await?;
        match outcome {
            AdvanceOutcome::Rejected => {
                debug!(collection = %key, position = %position, "cursor already past this batch")
            }
            _ => debug!(collection = %key, position = %position, ?outcome, "cursor advanced"),
        }
        Ok(())
    }
}

async fn fetch_pages(
    source: Arc<dyn DocumentSource>,
    request: ListRequest,
    retry: RetryPolicy,
    tx: mpsc::Sender<FetchEvent>,
) {
    let mut stream = match open_with_retry(source.as_ref(), &request, &retry).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = tx.send(FetchEvent::Failed(e)).await;
            return;
        }
    };
    if tx.send(FetchEvent::Opened(stream.order())).await.is_err() {
        return;
    }

    loop {
        match next_page_with_retry(stream.as_mut(), &retry).await {
            Ok(Some(page)) => {
                if tx.send(FetchEvent::Page(page)).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                let _ = tx.send(FetchEvent::Failed(e)).await;
                return;
            }
        }
    }
}

/// CLI options for `mailvec sync`.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub query: String,
    pub limit: Option<usize>,
    pub clear: bool,
    pub yes: bool,
    pub incremental: bool,
    pub provider: Option<EmbeddingBackend>,
    pub model: Option<String>,
    pub batch_size: Option<usize>,
    pub progress: ProgressMode,
}

/// What a Ctrl-C does to a running sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    /// Stop after the batch in flight.
    FinishBatch,
    /// Quit at once.
    Exit,
}

/// First interrupt cancels at the next batch boundary; the second exits.
pub struct Interrupts {
    cancel: CancellationToken,
}

impl Interrupts {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn on_signal(&self) -> InterruptAction {
        if self.cancel.is_cancelled() {
            InterruptAction::Exit
        } else {
            self.cancel.cancel();
            InterruptAction::FinishBatch
        }
    }
}

fn handle_interrupts(cancel: CancellationToken) {
    let interrupts = Interrupts::new(cancel);
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            match interrupts.on_signal() {
                InterruptAction::FinishBatch => {
                    eprintln!("interrupt received, finishing current batch (Ctrl-C again to quit)...")
                }
                InterruptAction::Exit => {
                    eprintln!("interrupted");
                    std::process::exit(130);
                }
            }
        }
    });
}

/// Run the `sync` command against Gmail and the SQLite index.
pub async fn run_sync(config: &Config, options: SyncOptions) -> Result<()> {
    let (backend, model) = config
        .embedding
        .resolve(options.provider, options.model.as_deref());
    let key = CollectionKey::new(backend.as_str(), &model);

    if options.clear && !options.yes && !confirm_clear(&key)? {
        println!("Aborted.");
        return Ok(());
    }

    let provider = create_provider(&config.embedding, backend, &model)?;
    let gateway =
        EmbeddingGateway::new(provider).with_dims(config.embedding.dims_for(backend, &model));
    let source: Arc<dyn DocumentSource> = Arc::new(GmailSource::from_config(&config.gmail)?);
    let store = SqliteStore::open(config).await?;
    let reporter = options.progress.reporter();

    // Installed after the prompt so Ctrl-C there still kills the process
    let cancel = CancellationToken::new();
    handle_interrupts(cancel.clone());

    let indexer = Indexer::new(&store, &gateway, source)
        .with_retry(RetryPolicy::from_config(&config.sync))
        .with_lock_ttl(Duration::from_secs(config.sync.lock_ttl_secs))
        .with_prefetch_pages(config.sync.prefetch_pages)
        .with_max_input_chars(config.embedding.max_input_chars)
        .with_progress(reporter.as_ref())
        .with_cancellation(cancel);

    let request = SyncRequest {
        filter: options.query,
        limit: options.limit,
        incremental: options.incremental,
        clear: options.clear,
        batch_size: options.batch_size.unwrap_or(config.sync.batch_size),
    };

    let result = indexer.run(&request).await;
    store.close().await;
    let report = result?;
    print_report(&report);
    Ok(())
}

fn confirm_clear(key: &CollectionKey) -> Result<bool> {
    print!(
        "This deletes every indexed email and sync cursor for {}. Continue? [y/N] ",
        key
    );
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_report(report: &SyncReport) {
    println!("sync {}", report.collection);
    if report.cleared {
        println!("  cleared: yes");
    }
    if let Some(from) = &report.resumed_from {
        println!("  resumed after: {}", from);
    }
    println!("  fetched: {} emails", report.fetched);
    if report.already_indexed > 0 {
        println!("  already indexed: {}", report.already_indexed);
    }
    println!("  embedded: {}", report.embedded);
    println!("  skipped: {}", report.skipped);
    for id in &report.skipped_ids {
        println!("    - {}", id);
    }
    println!(
        "  upserted: {} (new {}, replaced {})",
        report.upserted, report.inserted, report.replaced
    );
    match &report.cursor {
        Some(cursor) => println!("  cursor: {}", cursor),
        None => println!("  cursor: none"),
    }
    if report.interrupted {
        println!("interrupted");
    } else {
        println!("ok");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_interrupt_exits() {
        let cancel = CancellationToken::new();
        let interrupts = Interrupts::new(cancel.clone());
        assert_eq!(interrupts.on_signal(), InterruptAction::FinishBatch);
        assert!(cancel.is_cancelled());
        assert_eq!(interrupts.on_signal(), InterruptAction::Exit);
    }
}
