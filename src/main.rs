//! # KB Harness CLI (`kbh`)
//!
//! ## Usage
//!
//! ```bash
//! kbh --config ./config/kbh.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbh serve` | Start the HTTP server |
//! | `kbh crawl <url>` | Crawl one seed and print the collected URLs |
//! | `kbh kb crawl <url>...` | Crawl seeds and build (or reuse) a collection |
//! | `kbh kb local <path>...` | Build (or reuse) a collection from local files |
//! | `kbh query <collection> "<text>"` | Query a persisted collection |
//! | `kbh collections` | List collections |
//! | `kbh cleanup [--max N]` | Evict the oldest collections over capacity |

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use kb_harness::config::{self, Config};
use kb_harness::crawl::{self, CrawlDepth, CrawlOptions};
use kb_harness::fetch::{Fetcher, HttpFetcher};
use kb_harness::kb::{CrawlKbRequest, KbBuild, KnowledgeBase, LocalKbRequest};
use kb_harness::server;

/// KB Harness: crawl sites or local files into hybrid-searchable collections.
#[derive(Parser)]
#[command(name = "kbh", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/kbh.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Crawl a single seed and print the URLs it resolves to. Nothing is indexed.
    Crawl {
        url: String,

        #[command(flatten)]
        crawl: CrawlArgs,
    },

    /// Build knowledge bases.
    #[command(subcommand)]
    Kb(KbCommand),

    /// Query a persisted collection.
    Query {
        collection: String,
        query: String,

        /// Maximum hits per sub-index.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List collection names.
    Collections,

    /// Delete the oldest collections until at most `--max` remain.
    Cleanup {
        /// Defaults to `[store].max_collections`.
        #[arg(long)]
        max: Option<usize>,
    },
}

#[derive(Subcommand)]
enum KbCommand {
    /// Crawl seed URLs (or index them directly with `--no-crawl`).
    Crawl {
        #[arg(required = true)]
        urls: Vec<String>,

        #[command(flatten)]
        crawl: CrawlArgs,

        /// Index the URLs as given, without following links.
        #[arg(long)]
        no_crawl: bool,

        /// Keep only documents containing one of these keywords (max 3 used in the name).
        #[arg(long = "keyword")]
        keywords: Vec<String>,

        /// Drop a collection with the same identity before building.
        #[arg(long)]
        reindex: bool,
    },

    /// Index local files and directories.
    Local {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(long = "keyword")]
        keywords: Vec<String>,

        #[arg(long)]
        reindex: bool,
    },
}

#[derive(clap::Args)]
struct CrawlArgs {
    /// Link depth; omit to crawl until the page budget is spent.
    #[arg(long)]
    depth: Option<usize>,

    #[arg(long)]
    max_pages: Option<usize>,

    /// Seconds.
    #[arg(long)]
    min_delay: Option<f64>,

    /// Seconds.
    #[arg(long)]
    max_delay: Option<f64>,

    /// Keep only URLs containing this substring (case-insensitive).
    #[arg(long)]
    url_keyword: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::info!(path = %path.display(), "Config file not found, using defaults");
        let config = Config::default();
        config::validate(&config)?;
        Ok(config)
    }
}

fn print_build(build: &KbBuild) {
    println!("collection: {}", build.collection);
    println!("locations:  {}", build.locations.len());
    println!("chunks:     {}", build.chunks);
}

/// Crawl one seed over HTTP only; the store and embedder are never opened.
async fn crawl_seed(config: &Config, url: &str, args: CrawlArgs) -> anyhow::Result<()> {
    let defaults = &config.crawl;
    let options = CrawlOptions::from_config(defaults)
        .with_depth(CrawlDepth::from(args.depth))
        .with_max_pages(args.max_pages.unwrap_or(defaults.max_pages))
        .with_delays(
            args.min_delay.unwrap_or(defaults.min_delay),
            args.max_delay.unwrap_or(defaults.max_delay),
        )
        .with_url_keyword(args.url_keyword);
    options.validate()?;
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(defaults)?);
    let urls = crawl::crawl(fetcher, url, options).await?;
    for url in &urls {
        println!("{}", url);
    }
    println!("{} URLs", urls.len());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = load(&cli.config)?;

    match cli.command {
        Commands::Crawl { url, crawl } => crawl_seed(&config, &url, crawl).await,
        command => run(config, command).await,
    }
}

async fn run(config: Config, command: Commands) -> anyhow::Result<()> {
    let kb = Arc::new(KnowledgeBase::open(config).await?);

    match command {
        Commands::Serve => {
            server::run_server(kb).await?;
        }
        Commands::Crawl { url, crawl } => {
            crawl_seed(kb.config(), &url, crawl).await?;
        }
        Commands::Kb(KbCommand::Crawl {
            urls,
            crawl,
            no_crawl,
            keywords,
            reindex,
        }) => {
            let req = CrawlKbRequest {
                keywords,
                crawl: !no_crawl,
                depth: crawl.depth,
                max_pages: crawl.max_pages,
                min_delay: crawl.min_delay,
                max_delay: crawl.max_delay,
                url_keyword: crawl.url_keyword,
                reindex,
                ..CrawlKbRequest::new(urls)
            };
            let build = kb.crawl_and_create_kb(req).await?;
            print_build(&build);
        }
        Commands::Kb(KbCommand::Local {
            paths,
            keywords,
            reindex,
        }) => {
            let build = kb
                .create_knowledge_base(LocalKbRequest {
                    paths,
                    keywords,
                    reindex,
                })
                .await?;
            print_build(&build);
        }
        Commands::Query {
            collection,
            query,
            top_k,
        } => {
            let hits = kb.query(&collection, &query, top_k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                let snippet: String = hit.content.chars().take(200).collect();
                println!("{}. [{:.4}] {}", i + 1, hit.score, hit.source_location);
                println!("   {}", snippet.replace('\n', " "));
            }
        }
        Commands::Collections => {
            for name in kb.list_collections().await? {
                println!("{}", name);
            }
        }
        Commands::Cleanup { max } => {
            let report = kb.cleanup(max).await?;
            for name in &report.deleted {
                println!("deleted {}", name);
            }
            for (name, err) in &report.failed {
                println!("failed  {} ({})", name, err);
            }
            println!("{} collections remain", report.remaining);
        }
    }

    Ok(())
}
