//! # mailvec CLI
//!
//! ## Usage
//!
//! ```bash
//! mailvec --config ./config/mailvec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mailvec init` | Create the SQLite index and run schema migrations |
//! | `mailvec sync` | Fetch, embed and store mail for one embedding model |
//! | `mailvec search "<query>"` | Semantic search over indexed mail |
//! | `mailvec ask "<question>"` | Answer a question from the closest emails |
//! | `mailvec stats` | Per-collection counts and last sync |
//! | `mailvec models` | Known models and existing collections |
//! | `mailvec check` | Test connections to Gmail, Ollama and OpenAI |
//! | `mailvec completions <shell>` | Print a shell completion script |

use std::path::PathBuf;

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mailvec::ask::{self, AskOptions};
use mailvec::config::{self, CompletionBackend, EmbeddingBackend};
use mailvec::index::{self, SyncOptions};
use mailvec::progress::ProgressMode;
use mailvec::search::{self, SearchOptions};
use mailvec::{catalog, check, migrate, stats};

/// mailvec: incremental vector indexing, search and Q&A over your mailbox.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Secrets are read from `GMAIL_ACCESS_TOKEN` and `OPENAI_API_KEY`.
#[derive(Parser)]
#[command(name = "mailvec", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mailvec.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index database.
    ///
    /// Creates the SQLite file and all tables. Safe to run repeatedly.
    Init,

    /// Index mail from the mailbox into a collection.
    ///
    /// The collection is chosen by embedding provider and model. With
    /// `--incremental` only mail newer than the stored cursor for this
    /// query is fetched.
    Sync {
        /// Mailbox search query (Gmail syntax). Empty indexes everything.
        #[arg(short, long, default_value = "")]
        query: String,

        /// Maximum number of emails to index in this run.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Delete the collection and its cursors before syncing.
        #[arg(long)]
        clear: bool,

        /// Skip the confirmation prompt for `--clear`.
        #[arg(short, long)]
        yes: bool,

        /// Resume after the last indexed email for this query.
        #[arg(short, long)]
        incremental: bool,

        /// Embedding provider.
        #[arg(short, long, value_enum)]
        provider: Option<EmbeddingBackend>,

        /// Embedding model.
        #[arg(short, long)]
        model: Option<String>,

        /// Emails per embedding batch (overrides `[sync].batch_size`).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Semantic search over indexed mail.
    Search {
        query: String,

        /// Maximum number of results.
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show snippet and labels for each result.
        #[arg(short, long)]
        detailed: bool,

        /// Embedding provider of the collection to search.
        #[arg(short, long, value_enum)]
        provider: Option<EmbeddingBackend>,

        /// Embedding model of the collection to search.
        #[arg(short, long)]
        model: Option<String>,

        /// Only mail on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Only mail on or before this date (YYYY-MM-DD).
        #[arg(long)]
        until: Option<String>,

        /// Only mail whose sender contains this text.
        #[arg(long)]
        from: Option<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Ask a question answered from your indexed mail.
    Ask {
        question: String,

        /// Number of emails given to the model as context.
        #[arg(long)]
        search_limit: Option<usize>,

        /// Completion provider.
        #[arg(short, long, value_enum)]
        provider: Option<CompletionBackend>,

        /// Completion model.
        #[arg(short, long)]
        model: Option<String>,

        /// Embedding provider of the collection to search.
        #[arg(long, value_enum)]
        embedding_provider: Option<EmbeddingBackend>,

        /// Embedding model of the collection to search.
        #[arg(long)]
        embedding_model: Option<String>,

        /// Maximum tokens in the answer.
        #[arg(short = 't', long)]
        max_tokens: Option<u32>,
    },

    /// Show per-collection statistics.
    Stats,

    /// List known models, indexed collections and installed Ollama models.
    Models,

    /// Test connections to Gmail, Ollama and OpenAI.
    Check,

    /// Print a shell completion script.
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "mailvec=info,warn",
        _ => "mailvec=debug,info",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require a config file
    match &cli.command {
        Commands::Completions { shell } => {
            clap_complete::generate(*shell, &mut Cli::command(), "mailvec", &mut std::io::stdout());
            return Ok(());
        }
        Commands::Models => {
            let cfg = config::load_or_default(&cli.config)?;
            catalog::run_models(&cfg).await?;
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Sync {
            query,
            limit,
            clear,
            yes,
            incremental,
            provider,
            model,
            batch_size,
            progress,
        } => {
            index::run_sync(
                &cfg,
                SyncOptions {
                    query,
                    limit,
                    clear,
                    yes,
                    incremental,
                    provider,
                    model,
                    batch_size,
                    progress: progress.unwrap_or_else(ProgressMode::default_for_tty),
                },
            )
            .await?;
        }
        Commands::Search {
            query,
            limit,
            detailed,
            provider,
            model,
            since,
            until,
            from,
            json,
        } => {
            search::run_search(
                &cfg,
                SearchOptions {
                    query,
                    limit,
                    detailed,
                    provider,
                    model,
                    since,
                    until,
                    from,
                    json,
                },
            )
            .await?;
        }
        Commands::Ask {
            question,
            search_limit,
            provider,
            model,
            embedding_provider,
            embedding_model,
            max_tokens,
        } => {
            ask::run_ask(
                &cfg,
                AskOptions {
                    question,
                    search_limit,
                    provider,
                    model,
                    embedding_provider,
                    embedding_model,
                    max_tokens,
                },
            )
            .await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Check => {
            check::run_check(&cfg).await?;
        }
        Commands::Models | Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
