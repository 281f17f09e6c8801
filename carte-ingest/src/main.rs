//! carte-ingest - multi-source menu acquisition pipeline
//!
//! Operator CLI for crawling marketplace and brand-site menus into the
//! carte database. The run itself never exits non-zero for per-brand
//! failures; only a broken setup (bad config, unreachable database,
//! unknown brand) aborts.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use carte_common::config::CarteConfig;
use carte_common::db::init_database_pool;
use carte_common::model::SourceId;
use carte_ingest::run::{self, RunOptions};
use carte_ingest::store::{menus, registry};

#[derive(Parser, Debug)]
#[command(name = "carte-ingest")]
#[command(about = "Multi-source menu acquisition pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "CARTE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory holding carte.db
    #[arg(short, long, global = true, env = "CARTE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl the brand backlog
    Run {
        /// Process at most this many brands
        #[arg(long)]
        limit: Option<usize>,
        /// Fetch and classify but write nothing
        #[arg(long)]
        dry_run: bool,
        /// Re-scrape pairs that already settled
        #[arg(long)]
        force: bool,
        /// Restrict the run to one source
        #[arg(long)]
        source: Option<String>,
    },
    /// Crawl a single brand by slug
    Brand {
        slug: String,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        source: Option<String>,
    },
    /// Load or update registry brands from a JSON file
    ImportBrands {
        file: PathBuf,
    },
    /// Inspect and resolve quarantined menus
    Quarantine {
        #[command(subcommand)]
        action: QuarantineAction,
    },
}

#[derive(Subcommand, Debug)]
enum QuarantineAction {
    /// List all quarantined menus
    List,
    /// Accept a quarantined menu as-is
    Promote { slug: String, source: String },
    /// Drop a quarantined menu and reject the pair
    Delete { slug: String, source: String },
}

fn parse_source(s: &str) -> Result<SourceId> {
    SourceId::from_str(s).context("valid sources: grabfood, foodpanda, brand_site, vision")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    // Log build identification immediately after tracing init, before any
    // database or network delays.
    info!(
        "Starting Carte Ingest (carte-ingest) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = CarteConfig::load(cli.config.as_deref())?;
    let data_dir = config.resolve_data_dir(cli.data_dir.as_deref());
    let db_path = config.database_path(&data_dir);
    info!("Database: {}", db_path.display());
    let pool = init_database_pool(&db_path).await?;

    match cli.command {
        Command::Run {
            limit,
            dry_run,
            force,
            source,
        } => {
            let only_source = source.as_deref().map(parse_source).transpose()?;
            run::execute(
                &config,
                &pool,
                RunOptions {
                    slug: None,
                    limit,
                    dry_run,
                    force,
                    only_source,
                },
            )
            .await?;
        }
        Command::Brand {
            slug,
            dry_run,
            force,
            source,
        } => {
            let only_source = source.as_deref().map(parse_source).transpose()?;
            run::execute(
                &config,
                &pool,
                RunOptions {
                    slug: Some(slug),
                    limit: None,
                    dry_run,
                    force,
                    only_source,
                },
            )
            .await?;
        }
        Command::ImportBrands { file } => {
            let (inserted, updated) = registry::import_brands(&pool, &file).await?;
            println!("Imported brands: {} new, {} updated", inserted, updated);
        }
        Command::Quarantine { action } => match action {
            QuarantineAction::List => {
                let entries = menus::quarantined(&pool).await?;
                if entries.is_empty() {
                    println!("Nothing in quarantine.");
                } else {
                    println!("{} menu(s) in quarantine:\n", entries.len());
                    for entry in entries {
                        println!(
                            "  {:<32} {:<10} {:>4} items  coverage {:.2}  {}  ({})",
                            entry.slug,
                            entry.source.as_str(),
                            entry.item_count,
                            entry.price_coverage,
                            entry.gate_reason.as_str(),
                            entry.updated_at.format("%Y-%m-%d")
                        );
                    }
                }
            }
            QuarantineAction::Promote { slug, source } => {
                let source = parse_source(&source)?;
                let brand = require_brand(&pool, &slug).await?;
                if menus::promote(&pool, brand.brand_id, source).await? {
                    println!("Promoted {} / {} to accepted.", slug, source);
                } else {
                    println!("No quarantined menu for {} / {}.", slug, source);
                }
            }
            QuarantineAction::Delete { slug, source } => {
                let source = parse_source(&source)?;
                let brand = require_brand(&pool, &slug).await?;
                if menus::delete_quarantined(&pool, brand.brand_id, source).await? {
                    println!("Deleted quarantined menu for {} / {}.", slug, source);
                } else {
                    println!("No quarantined menu for {} / {}.", slug, source);
                }
            }
        },
    }

    Ok(())
}

async fn require_brand(
    pool: &sqlx::SqlitePool,
    slug: &str,
) -> Result<carte_common::model::BrandTarget> {
    registry::brand_by_slug(pool, slug)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no brand with slug '{}'", slug))
}
