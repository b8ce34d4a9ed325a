use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::Utc;
use tempfile::TempDir;

use mailvec::models::{CollectionKey, CursorPosition, Document, EmbeddingRecord};
use mailvec::store::sqlite::SqliteStore;
use mailvec::store::{CursorStore, VectorStore};

fn mailvec_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mailvec"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    // Port 9 (discard) refuses connections, so provider lookups fail fast
    let config_content = format!(
        r#"[storage]
base_dir = "{root}/data"

[gmail]
token_path = "{root}/credentials/token.json"

[embedding]
provider = "ollama"
model = "nomic-embed-text"
ollama_url = "http://127.0.0.1:9"
max_retries = 0

[sync]
batch_size = 25
"#,
        root = root.display()
    );

    let config_path = config_dir.join("mailvec.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_mailvec(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = mailvec_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("GMAIL_ACCESS_TOKEN")
        .env_remove("OPENAI_API_KEY")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run mailvec binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mailvec(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/mailvec.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, first) = run_mailvec(&config_path, &["init"]);
    assert!(first, "First init failed");
    let (_, _, second) = run_mailvec(&config_path, &["init"]);
    assert!(second, "Second init failed (not idempotent)");
}

#[test]
fn test_stats_on_empty_index() {
    let (_tmp, config_path) = setup_test_env();
    run_mailvec(&config_path, &["init"]);

    let (stdout, stderr, success) = run_mailvec(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Collections:  0"));
    assert!(stdout.contains("No collections yet"));
}

#[tokio::test]
async fn test_stats_lists_collections_and_cursors() {
    let (tmp, config_path) = setup_test_env();
    let key = CollectionKey::new("ollama", "nomic-embed-text");
    let now = Utc::now();
    let document = Document {
        id: "msg-1".into(),
        thread_id: "thread-1".into(),
        timestamp: now,
        headers: BTreeMap::from([("subject".to_string(), "Hi".to_string())]),
        labels: vec![],
        snippet: String::new(),
        body_text: "hello".into(),
        raw_size: 5,
    };

    let store = SqliteStore::open_path(&tmp.path().join("data/mailvec.sqlite"))
        .await
        .unwrap();
    store.create_collection(&key, 3).await.unwrap();
    store
        .upsert(
            &key,
            &[EmbeddingRecord {
                document: document.clone(),
                vector: vec![0.1, 0.2, 0.3],
                created_at: now,
            }],
        )
        .await
        .unwrap();
    store
        .advance_cursor(
            "sig",
            "",
            &key,
            &CursorPosition {
                timestamp: now,
                document_id: document.id.clone(),
            },
            1,
            false,
        )
        .await
        .unwrap();
    store.close().await;

    let (stdout, stderr, success) = run_mailvec(&config_path, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("ollama/nomic-embed-text"));
    assert!(stdout.contains("Emails:       1"));
    assert!(stdout.contains("just now"));
}

#[test]
fn test_search_without_collection_suggests_sync() {
    let (_tmp, config_path) = setup_test_env();
    run_mailvec(&config_path, &["init"]);

    let (_, stderr, success) = run_mailvec(&config_path, &["search", "quarterly report"]);
    assert!(!success);
    assert!(
        stderr.contains("mailvec sync --provider ollama --model nomic-embed-text"),
        "unexpected stderr: {}",
        stderr
    );
}

#[test]
fn test_sync_without_credentials_fails_cleanly() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mailvec(&config_path, &["sync", "--limit", "5"]);
    assert!(!success, "sync unexpectedly succeeded: {}", stdout);
    assert!(stderr.contains("GMAIL_ACCESS_TOKEN"), "unexpected stderr: {}", stderr);
    // Nothing was indexed
    assert!(!stdout.contains("ok"));
    assert!(!tmp.path().join("data/mailvec.sqlite").exists());
}

#[test]
fn test_sync_clear_without_confirmation_aborts() {
    let (tmp, config_path) = setup_test_env();

    // stdin is closed, which reads as "no"
    let (stdout, stderr, success) = run_mailvec(&config_path, &["sync", "--clear"]);
    assert!(success, "sync --clear failed: {}", stderr);
    assert!(stdout.contains("Continue? [y/N]"));
    assert!(stdout.contains("Aborted."));
    assert!(!tmp.path().join("data/mailvec.sqlite").exists());
}

#[test]
fn test_check_reports_each_service() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_mailvec(&config_path, &["check"]);
    assert!(!success, "check unexpectedly passed: {}", stdout);
    assert!(stdout.contains("SERVICE"));
    let line = |service: &str| {
        stdout
            .lines()
            .find(|l| l.starts_with(service))
            .unwrap_or_else(|| panic!("no {} line in {}", service, stdout))
            .to_string()
    };
    assert!(line("gmail").contains("FAILED"));
    assert!(line("gmail").contains("GMAIL_ACCESS_TOKEN"));
    assert!(line("ollama").contains("FAILED"));
    assert!(line("openai").contains("SKIPPED"));
    assert!(stderr.contains("2 connection check(s) failed"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(&config_path, "[sync]\nbatch_size = 0\n").unwrap();

    let (_, stderr, success) = run_mailvec(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("batch_size"), "unexpected stderr: {}", stderr);
}

#[test]
fn test_models_works_without_config_file() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("nope.toml");

    let (stdout, stderr, success) = run_mailvec(&missing, &["models"]);
    assert!(success, "models failed: {}", stderr);
    assert!(stdout.contains("nomic-embed-text"));
    assert!(stdout.contains("text-embedding-3-small"));
    assert!(stdout.contains("gpt-4o-mini"));
}

#[test]
fn test_completions_script() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_mailvec(&tmp.path().join("unused.toml"), &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("mailvec"));
}
