//! Index statistics.
//!
//! Summarizes what is indexed: one row per collection with its
//! dimensionality, email count, number of sync cursors and when it last
//! synced. Used by `mailvec stats` to confirm syncs are landing.

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::collection::CollectionManager;
use crate::config::Config;
use crate::progress::format_number;
use crate::store::sqlite::SqliteStore;

/// Run the stats command: query the index and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let db_path = config.storage.db_path();
    let db_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let store = SqliteStore::open(config).await?;
    let stats = CollectionManager::new(&store).stats().await;
    store.close().await;
    let stats = stats?;

    let total: u64 = stats.iter().map(|s| s.document_count).sum();

    println!("mailvec index stats");
    println!("===================");
    println!();
    println!("  Database:     {}", db_path.display());
    println!("  Size:         {}", format_bytes(db_size));
    println!("  Collections:  {}", stats.len());
    println!("  Emails:       {}", format_number(total));

    if !stats.is_empty() {
        println!();
        println!(
            "  {:<40} {:>6} {:>9} {:>8}   {}",
            "COLLECTION", "DIMS", "EMAILS", "CURSORS", "LAST SYNC"
        );
        println!("  {}", "-".repeat(84));
        for s in &stats {
            let sync_display = match s.last_sync {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<40} {:>6} {:>9} {:>8}   {}",
                s.key.to_string(),
                s.dims,
                format_number(s.document_count),
                s.cursor_count,
                sync_display
            );
        }
    } else {
        println!();
        println!("  No collections yet. Run `mailvec sync` to index your mailbox.");
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: DateTime<Utc>) -> String {
    let delta = (Utc::now() - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
