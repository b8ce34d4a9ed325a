//! Sync progress reporting.
//!
//! Reports observable progress during `mailvec sync` so users see what is
//! being listed and how far indexing has come. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug)]
pub enum SyncProgressEvent {
    /// The mailbox listing is being opened (no totals yet).
    Listing { collection: String, filter: String },
    /// A batch was embedded and stored. Counts are cumulative for the run.
    Batch {
        collection: String,
        fetched: u64,
        embedded: u64,
        skipped: u64,
    },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the indexing pipeline.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync ollama/nomic-embed-text  embedded 1,200 (fetched 1,234, skipped 3)".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Listing { collection, filter } if filter.is_empty() => {
                format!("sync {}  listing mailbox...\n", collection)
            }
            SyncProgressEvent::Listing { collection, filter } => {
                format!("sync {}  listing mailbox ({})...\n", collection, filter)
            }
            SyncProgressEvent::Batch {
                collection,
                fetched,
                embedded,
                skipped,
            } => format!(
                "sync {}  embedded {} (fetched {}, skipped {})\n",
                collection,
                format_number(*embedded),
                format_number(*fetched),
                format_number(*skipped)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::Listing { collection, filter } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "listing",
                "filter": filter
            }),
            SyncProgressEvent::Batch {
                collection,
                fetched,
                embedded,
                skipped,
            } => serde_json::json!({
                "event": "progress",
                "collection": collection,
                "phase": "indexing",
                "fetched": fetched,
                "embedded": embedded,
                "skipped": skipped
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
