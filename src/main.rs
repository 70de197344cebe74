//! # ontotag CLI
//!
//! ## Usage
//!
//! ```bash
//! ontotag --config ./config/ontotag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `init` | Create the state database and both indices |
//! | `reset-indices --yes` | Delete and recreate both indices |
//! | `sync-terms [--terminology NAME]` | Mirror terminologies into the terms index |
//! | `prune-terms <named-graph>` | Remove every term of one named graph |
//! | `schedule [--full]` | Poll the feed (or list every item) and ingest until idle |
//! | `ingest <id>...` | Run the pipeline for explicit documents |
//! | `index <id>` | Run the indexing stage for one document |
//! | `worker` | Poll on an interval and run the pipeline forever |
//! | `retag` | Retag every indexed document |
//! | `search` | Keyword search, printed as JSON |
//! | `suggest <prefix>` | Term label completion |
//! | `get <id>` | Print one indexed document |
//! | `status <id>` | Print a document's pipeline state |
//! | `stats` | Index counts, watermark, pipeline states |
//! | `serve` | Start the HTTP API |
//! | `completions <shell>` | Print a shell completion script |
//!
//! Logs go to stderr; command output goes to stdout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing_subscriber::EnvFilter;

use ontotag::bus::{Bus, Subscription};
use ontotag::config::{self, Config};
use ontotag::index_client::IndexClient;
use ontotag::object_store::{self, NotifyingStore};
use ontotag::pipeline::{self, Pipeline};
use ontotag::progress::ProgressMode;
use ontotag::repository::DspaceRepository;
use ontotag::search::{self, Searcher};
use ontotag::sparql::SparqlClient;
use ontotag::stages::{DocState, Stages};
use ontotag::synonyms::SynonymResolver;
use ontotag::tagger::Tagger;
use ontotag::term_sync::{TermSyncer, Terminology};
use ontotag::{db, extract, get, indices, migrate, retag, server, stats};

/// Ontology-driven tagging and search indexing for document repositories.
///
/// All commands accept `--config` pointing to a TOML configuration file.
/// See `config/ontotag.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "ontotag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ontotag.toml")]
    config: PathBuf,

    /// Log output format. `RUST_LOG` overrides the default `ontotag=info` filter.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the state database and both indices.
    ///
    /// Idempotent: existing tables and indices are left as they are.
    Init,

    /// Delete and recreate the documents and terms indices.
    ResetIndices {
        /// Confirm that every indexed document and term is dropped.
        #[arg(long)]
        yes: bool,
    },

    /// Mirror configured terminologies into the terms index.
    SyncTerms {
        /// Only sync the terminology with this name.
        #[arg(long)]
        terminology: Option<String>,

        /// Progress reporting on stderr. Defaults to human when stderr is a TTY.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Remove every term of one named graph from the terms index.
    PruneTerms { named_graph: String },

    /// Schedule new feed entries and run the pipeline until idle.
    Schedule {
        /// Schedule every repository item instead of polling the feed.
        #[arg(long)]
        full: bool,
    },

    /// Run the pipeline for explicit document ids until idle.
    Ingest {
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Run the indexing stage for one document.
    Index { id: String },

    /// Poll the feed on `pipeline.poll_interval_secs` and run the pipeline forever.
    Worker,

    /// Retag every indexed document against the current terms index.
    Retag,

    /// Keyword search. Prints the index store response as JSON.
    Search {
        /// Comma-separated keywords.
        #[arg(long)]
        keywords: Option<String>,

        /// Comma-separated term labels to filter on.
        #[arg(long)]
        term: Option<String>,

        /// Comma-separated term URIs to filter on.
        #[arg(long = "term-uri")]
        term_uri: Option<String>,

        #[arg(long)]
        from: Option<u32>,

        #[arg(long)]
        size: Option<u32>,

        /// Comma-separated `field:direction` pairs.
        #[arg(long)]
        sort: Option<String>,

        /// Comma-separated fields searched by the keywords.
        #[arg(long)]
        fields: Option<String>,

        /// Expand keywords with ontology synonyms.
        #[arg(long)]
        synonyms: bool,

        #[arg(long)]
        refereed: bool,

        #[arg(long)]
        endorsed: bool,
    },

    /// Term label completion.
    Suggest {
        prefix: String,

        #[arg(long, default_value_t = 10)]
        size: usize,
    },

    /// Print one indexed document, without its extracted text.
    Get { id: String },

    /// Print a document's pipeline state.
    Status { id: String },

    /// Index counts, feed watermark, and pipeline states.
    Stats {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Print a shell completion script.
    Completions { shell: clap_complete::Shell },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(shell, &mut Cli::command(), "ontotag", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = open_db(&cfg).await?;
            pool.close().await;
            let index = IndexClient::from_config(&cfg.search)?;
            indices::ensure_indices(&index, &cfg.search).await?;
            println!("Initialized {} and indices.", cfg.db.path.display());
        }
        Commands::ResetIndices { yes } => {
            if !yes {
                bail!("reset-indices drops every indexed document and term; pass --yes to confirm");
            }
            let index = IndexClient::from_config(&cfg.search)?;
            indices::reset_indices(&index, &cfg.search).await?;
            println!("Indices recreated.");
        }
        Commands::SyncTerms {
            terminology,
            progress,
        } => {
            let selected: Vec<Terminology> = cfg
                .graph
                .terminologies
                .iter()
                .filter(|t| terminology.as_deref().map_or(true, |name| t.name == name))
                .map(Terminology::from_config)
                .collect::<Result<_, _>>()?;
            if selected.is_empty() {
                match terminology {
                    Some(name) => bail!("no terminology named '{}' in configuration", name),
                    None => bail!("no terminologies configured under [[graph.terminologies]]"),
                }
            }
            let mode = match progress {
                Some(ProgressArg::Off) => ProgressMode::Off,
                Some(ProgressArg::Human) => ProgressMode::Human,
                Some(ProgressArg::Json) => ProgressMode::Json,
                None => ProgressMode::default_for_tty(),
            };
            let syncer = TermSyncer::from_config(&cfg)?;
            let reports = syncer.sync_all(&selected, &*mode.reporter()).await?;
            print_json(&reports)?;
        }
        Commands::PruneTerms { named_graph } => {
            let syncer = TermSyncer::from_config(&cfg)?;
            let deleted = syncer.prune_terminology(&named_graph).await?;
            println!("Removed {} terms of {}.", deleted, named_graph);
        }
        Commands::Schedule { full } => {
            let (pipeline, mut sub, _pool) = build_pipeline(&cfg).await?;
            let published = pipeline.schedule(full, cfg.repository.page_size).await?;
            let summary = pipeline.run_until_idle(&mut sub).await;
            let watermark = pipeline.settle_watermark().await?;
            tracing::info!(published, watermark = ?watermark, "schedule run finished");
            print_json(&summary)?;
        }
        Commands::Ingest { ids } => {
            let (pipeline, mut sub, pool) = build_pipeline(&cfg).await?;
            pipeline.submit(&ids);
            let summary = pipeline.run_until_idle(&mut sub).await;
            print_json(&summary)?;
            for id in &ids {
                match pipeline::get_state(&pool, id).await? {
                    Some(state) => println!("{}\t{}", id, state.state),
                    None => println!("{}\t-", id),
                }
            }
        }
        Commands::Index { id } => {
            let (pipeline, _sub, pool) = build_pipeline(&cfg).await?;
            match pipeline.stages().index_document(&id).await {
                Ok(state) => {
                    pipeline::record_state(&pool, &id, state, None).await?;
                    println!("Indexed {}.", id);
                }
                Err(e) => {
                    let message = e.to_string();
                    pipeline::record_state(&pool, &id, DocState::Failed, Some(&message)).await?;
                    return Err(e).with_context(|| format!("indexing {} failed", id));
                }
            }
        }
        Commands::Worker => run_worker(&cfg).await?,
        Commands::Retag => {
            let index = IndexClient::from_config(&cfg.search)?;
            let tagger = Tagger::from_config(index.clone(), &cfg.search);
            let report = retag::retag_all(&index, &tagger, &cfg.search).await?;
            print_json(&report)?;
        }
        Commands::Search {
            keywords,
            term,
            term_uri,
            from,
            size,
            sort,
            fields,
            synonyms,
            refereed,
            endorsed,
        } => {
            let mut params = HashMap::new();
            let pairs = [
                ("keywords", keywords),
                ("term", term),
                ("termURI", term_uri),
                ("from", from.map(|v| v.to_string())),
                ("size", size.map(|v| v.to_string())),
                ("sort", sort),
                ("fields", fields),
            ];
            for (name, value) in pairs {
                if let Some(value) = value {
                    params.insert(name.to_string(), value);
                }
            }
            for (name, set) in [("synonyms", synonyms), ("refereed", refereed), ("endorsed", endorsed)] {
                if set {
                    params.insert(name.to_string(), "true".to_string());
                }
            }
            let Some(opts) = search::parse_params(&params) else {
                println!("{{}}");
                return Ok(());
            };
            let results = searcher(&cfg)?.search(opts).await?;
            print_json(&results)?;
        }
        Commands::Suggest { prefix, size } => {
            let suggestions = searcher(&cfg)?.suggest(&prefix, size).await?;
            if suggestions.is_empty() {
                println!("No suggestions.");
            }
            for s in suggestions {
                println!("{}\t{}", s.label, s.uris.join(" "));
            }
        }
        Commands::Get { id } => {
            let index = IndexClient::from_config(&cfg.search)?;
            match get::get_document(&index, &cfg.search.documents_index, &id).await? {
                Some(doc) => print_json(&doc)?,
                None => bail!("document not found: {}", id),
            }
        }
        Commands::Status { id } => {
            let pool = open_db(&cfg).await?;
            match pipeline::get_state(&pool, &id).await? {
                Some(state) => print_json(&state)?,
                None => println!("No state recorded for {}.", id),
            }
            pool.close().await;
        }
        Commands::Stats { json } => {
            let pool = open_db(&cfg).await?;
            let index = IndexClient::from_config(&cfg.search)?;
            let collected = stats::collect(&index, &cfg.search, &pool).await?;
            if json {
                print_json(&collected)?;
            } else {
                stats::print_stats(&collected);
            }
            pool.close().await;
        }
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ontotag=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn open_db(cfg: &Config) -> anyhow::Result<SqlitePool> {
    let pool = db::connect(&cfg.db)
        .await
        .with_context(|| format!("opening state database {}", cfg.db.path.display()))?;
    migrate::run_migrations(&pool).await?;
    Ok(pool)
}

fn searcher(cfg: &Config) -> anyhow::Result<Searcher> {
    let index = IndexClient::from_config(&cfg.search)?;
    let synonyms = SynonymResolver::new(SparqlClient::from_config(&cfg.graph)?);
    Ok(Searcher::new(index, &cfg.search, Some(synonyms)))
}

async fn build_pipeline(cfg: &Config) -> anyhow::Result<(Pipeline, Subscription, SqlitePool)> {
    let pool = open_db(cfg).await?;
    let (bus, sub) = Bus::new();
    let index = IndexClient::from_config(&cfg.search)?;
    let stages = Stages {
        repository: Arc::new(DspaceRepository::new(&cfg.repository)?),
        store: NotifyingStore::new(object_store::from_config(&cfg.storage)?, bus.clone()),
        extractor: extract::from_config(&cfg.extractor)?,
        tagger: Tagger::from_config(index.clone(), &cfg.search),
        index,
        documents_index: cfg.search.documents_index.clone(),
        content_mime_types: cfg.repository.content_mime_types.clone(),
        bus,
    };
    let pipeline = Pipeline::new(stages, pool.clone(), &cfg.pipeline);
    Ok((pipeline, sub, pool))
}

async fn run_worker(cfg: &Config) -> anyhow::Result<()> {
    let (pipeline, mut sub, _pool) = build_pipeline(cfg).await?;
    let runner = pipeline.clone();
    let mut run = tokio::spawn(async move { runner.run_forever(&mut sub).await });
    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.pipeline.poll_interval_secs));

    tracing::info!(
        interval_secs = cfg.pipeline.poll_interval_secs,
        concurrency = cfg.pipeline.concurrency,
        "worker started"
    );
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = pipeline.schedule(false, cfg.repository.page_size).await {
                    tracing::error!(error = %e, "scheduler pass failed");
                }
            }
            finished = &mut run => {
                let summary = finished?;
                tracing::warn!(?summary, "pipeline runner stopped");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down worker");
                break;
            }
        }
    }
    Ok(())
}
