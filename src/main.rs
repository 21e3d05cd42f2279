//! # trove CLI
//!
//! The `trove` binary manages indexcards, search indexes and the indexing
//! daemon, runs searches, and starts the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! trove --config ./config/trove.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `trove init` | Create the SQLite database and run schema migrations |
//! | `trove card put` | Save an indexcard from a tripledict JSON file and queue it |
//! | `trove card delete <uuid>` | Soft-delete an indexcard and queue its removal |
//! | `trove card show <uuid>` | Print an indexcard |
//! | `trove index status` | Status of every strategy and its indexes |
//! | `trove index setup <strategy>` | Create the current index and keep it live |
//! | `trove index delete <indexname>` | Delete an index |
//! | `trove index promote <indexname>` | Make an index the default for searching |
//! | `trove index backfill <strategy>` | Queue every indexcard for the current index |
//! | `trove index backfill-complete <strategy>` | Finish a backfill and promote its index |
//! | `trove daemon` | Run the indexing daemons until interrupted |
//! | `trove search cards "<querystring>"` | Cardsearch |
//! | `trove search values "<querystring>"` | Valuesearch |
//! | `trove serve` | Start the HTTP server |
//!
//! Logging goes to stderr, filtered by `TROVE_LOG` (default `info`).

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trovesearch::admin::{self, IndexAction};
use trovesearch::config;
use trovesearch::daemon::DaemonSet;
use trovesearch::migrate;
use trovesearch::progress::ProgressMode;
use trovesearch::search;
use trovesearch::server;
use trovesearch::services::Services;
use trovesearch_core::store::{IndexcardStore, SourceRecordKey};

/// trove: search indexing for scholarly metadata.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/trove.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "trove",
    about = "Search indexing for scholarly metadata: RDF indexcards into Elasticsearch",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/trove.toml")]
    config: PathBuf,

    /// More logging (-v debug, -vv trace). Ignored when TROVE_LOG is set.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Manage indexcards.
    Card {
        #[command(subcommand)]
        action: CardAction,
    },

    /// Manage search indexes.
    Index {
        #[command(subcommand)]
        action: IndexCommand,
    },

    /// Run one indexing daemon per enabled strategy until Ctrl-C.
    Daemon,

    /// Search from the command line; prints the JSON response.
    Search {
        #[command(subcommand)]
        kind: SearchKind,
    },

    /// Start the HTTP server.
    Serve,
}

#[derive(Subcommand)]
enum CardAction {
    /// Save an indexcard from a tripledict JSON file (`-` reads stdin).
    Put {
        /// Source config label.
        #[arg(long)]
        source: String,

        /// Identifier of the record within the source.
        #[arg(long)]
        record: String,

        /// IRI of the resource the card describes.
        #[arg(long)]
        focus: String,

        rdf: PathBuf,
    },
    Delete {
        uuid: String,
    },
    Show {
        uuid: String,
    },
}

#[derive(Subcommand)]
enum IndexCommand {
    Status,
    Setup {
        strategy: String,
    },
    Delete {
        indexname: String,
    },
    Promote {
        indexname: String,
    },
    Backfill {
        strategy: String,

        /// Progress on stderr: off, human, or json.
        #[arg(long)]
        progress: Option<String>,
    },
    BackfillComplete {
        strategy: String,
    },
}

#[derive(Subcommand)]
enum SearchKind {
    Cards { querystring: String },
    Values { querystring: String },
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("TROVE_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn progress_mode(flag: Option<&str>) -> anyhow::Result<ProgressMode> {
    Ok(match flag {
        None => ProgressMode::default_for_tty(),
        Some("off") => ProgressMode::Off,
        Some("human") => ProgressMode::Human,
        Some("json") => ProgressMode::Json,
        Some(other) => bail!("--progress must be off, human, or json; got '{}'", other),
    })
}

fn read_rdf(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        let mut body = String::new();
        std::io::stdin().read_to_string(&mut body)?;
        return Ok(body);
    }
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Card { action } => {
            let services = Services::connect(&cfg).await?;
            match action {
                CardAction::Put {
                    source,
                    record,
                    focus,
                    rdf,
                } => {
                    let body = read_rdf(&rdf)?;
                    let card = admin::put_card(
                        services.store.as_ref(),
                        &services.messenger,
                        &SourceRecordKey::new(source, record),
                        &focus,
                        &body,
                    )
                    .await?;
                    println!("{}", card.uuid);
                }
                CardAction::Delete { uuid } => {
                    let deleted =
                        admin::delete_card(services.store.as_ref(), &services.messenger, &uuid)
                            .await?;
                    if !deleted {
                        bail!("indexcard not found or already deleted: {}", uuid);
                    }
                    println!("Deleted {}", uuid);
                }
                CardAction::Show { uuid } => match services.store.get_indexcard(&uuid).await? {
                    Some(card) => print_json(&card)?,
                    None => bail!("indexcard not found: {}", uuid),
                },
            }
            services.close().await;
        }
        Commands::Index { action } => {
            let services = Services::connect(&cfg).await?;
            let no_progress = ProgressMode::Off.reporter();
            match action {
                IndexCommand::Status => {
                    print_json(&admin::index_statuses(&services.registry).await?)?;
                }
                IndexCommand::Setup { strategy } => {
                    let status = admin::apply_index_action(
                        &services.registry,
                        &services.messenger,
                        &strategy,
                        IndexAction::Setup,
                        no_progress.as_ref(),
                    )
                    .await?;
                    print_json(&status)?;
                }
                IndexCommand::Delete { indexname } => {
                    admin::apply_index_action(
                        &services.registry,
                        &services.messenger,
                        &indexname,
                        IndexAction::Delete,
                        no_progress.as_ref(),
                    )
                    .await?;
                    println!("Deleted {}", indexname);
                }
                IndexCommand::Promote { indexname } => {
                    let status = admin::apply_index_action(
                        &services.registry,
                        &services.messenger,
                        &indexname,
                        IndexAction::MakeDefault,
                        no_progress.as_ref(),
                    )
                    .await?;
                    print_json(&status)?;
                }
                IndexCommand::Backfill { strategy, progress } => {
                    let reporter = progress_mode(progress.as_deref())?.reporter();
                    let managed = services.registry.get_strategy(&strategy)?;
                    let count =
                        admin::start_backfill(managed, &services.messenger, reporter.as_ref())
                            .await?;
                    println!("Queued {} indexcards for {}", count, strategy);
                }
                IndexCommand::BackfillComplete { strategy } => {
                    let status = admin::apply_index_action(
                        &services.registry,
                        &services.messenger,
                        &strategy,
                        IndexAction::MarkBackfillComplete,
                        no_progress.as_ref(),
                    )
                    .await?;
                    print_json(&status)?;
                }
            }
            services.close().await;
        }
        Commands::Daemon => {
            let services = Services::connect(&cfg).await?;
            let daemons = DaemonSet::start(&services.registry, &services.messenger, &cfg.daemon)?;
            tokio::signal::ctrl_c().await?;
            eprintln!("Stopping indexer daemons...");
            for (strategy, stats) in daemons.shutdown().await? {
                eprintln!(
                    "{}: {} done, {} requeued, {} dropped",
                    strategy, stats.messages_done, stats.messages_requeued, stats.messages_dropped
                );
            }
            services.close().await;
        }
        Commands::Search { kind } => {
            let services = Services::connect(&cfg).await?;
            match kind {
                SearchKind::Cards { querystring } => {
                    print_json(&search::cardsearch(&services.registry, &querystring).await?)?;
                }
                SearchKind::Values { querystring } => {
                    print_json(&search::valuesearch(&services.registry, &querystring).await?)?;
                }
            }
            services.close().await;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
