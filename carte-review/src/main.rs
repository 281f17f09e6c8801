//! carte-review - quarantine review service
//!
//! Serves the operator API for inspecting and resolving quarantined menus.
//! Shares carte.db with the ingest pipeline.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use carte_common::config::CarteConfig;
use carte_common::db::init_database_pool;
use carte_review::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "carte-review")]
#[command(about = "Quarantine review service for the carte pipeline")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5740", env = "CARTE_REVIEW_PORT")]
    port: u16,

    /// Configuration file (TOML)
    #[arg(short, long, env = "CARTE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory holding carte.db
    #[arg(short, long, env = "CARTE_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    // Log build identification immediately after tracing init, before any
    // database or network delays.
    info!(
        "Starting Carte Review (carte-review) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let config = CarteConfig::load(args.config.as_deref())?;
    let data_dir = config.resolve_data_dir(args.data_dir.as_deref());
    let db_path = config.database_path(&data_dir);
    info!("Database: {}", db_path.display());

    let pool = init_database_pool(&db_path).await?;
    let state = AppState::new(pool);
    let app = build_router(state);

    let addr = format!("127.0.0.1:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("carte-review listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
