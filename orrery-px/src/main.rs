//! orrery-px - Product Experience Service
//!
//! Owns the product session state machine: chart upload, placement
//! extraction and confirmation, the stepped Q&A flow with bounded
//! follow-ups, and final deliverable generation. Browser clients drive it
//! over HTTP; the session record in SQLite is the single source of truth.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use orrery_common::config::{self, TomlConfig};
use orrery_px::models::ProductCatalog;
use orrery_px::services::{BlobStore, InsightGateway};
use orrery_px::AppState;

/// Product Experience Service
#[derive(Debug, Parser)]
#[command(name = "orrery-px", version)]
struct Args {
    /// Root folder for the database and uploaded blobs
    #[arg(long)]
    root_folder: Option<String>,

    /// Directory of product definition TOML files
    /// (defaults to {root_folder}/products)
    #[arg(long)]
    products_dir: Option<String>,

    /// Listen port
    #[arg(long, default_value_t = 5742)]
    port: u16,

    /// Insight gateway base URL
    #[arg(long, env = "ORRERY_GATEWAY_URL")]
    gateway_url: Option<String>,

    /// Insight gateway API key
    #[arg(long, env = "ORRERY_GATEWAY_API_KEY", hide_env_values = true)]
    gateway_api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = TomlConfig::load_default("orrery-px");

    // Initialize tracing from the configured level, overridable via RUST_LOG
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(toml_config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting orrery-px (Product Experience) service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Resolve and prepare the root folder
    let root_folder = config::resolve_root_folder(
        args.root_folder.as_deref(),
        "ORRERY_ROOT",
        &toml_config,
    );
    config::ensure_root_folder(&root_folder)?;
    info!("Root folder: {}", root_folder.display());

    // Open or create the database
    let db_path = config::database_path(&root_folder);
    info!("Database: {}", db_path.display());
    let db_pool = orrery_px::db::init_database_pool(&db_path).await?;
    info!("Database connection established");

    // Load product definitions
    let products_dir = args
        .products_dir
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| root_folder.join("products"));
    let catalog = ProductCatalog::load_dir(&products_dir)?;
    if catalog.is_empty() {
        tracing::warn!(
            dir = %products_dir.display(),
            "No product definitions loaded; session creation will 404"
        );
    } else {
        info!("Loaded {} product definition(s)", catalog.len());
    }

    // Insight gateway: env/CLI first, then TOML
    let gateway_url = args
        .gateway_url
        .or(toml_config.gateway_url)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Insight gateway URL not configured. Set ORRERY_GATEWAY_URL, pass \
                 --gateway-url, or add gateway_url to the TOML config."
            )
        })?;
    let gateway_api_key = args
        .gateway_api_key
        .or(toml_config.gateway_api_key)
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Insight gateway API key not configured. Set ORRERY_GATEWAY_API_KEY, pass \
                 --gateway-api-key, or add gateway_api_key to the TOML config."
            )
        })?;
    let gateway = InsightGateway::new(&gateway_url, &gateway_api_key)?;
    info!("Insight gateway: {}", gateway_url);

    let blobs = BlobStore::new(config::uploads_path(&root_folder));

    let state = AppState::new(db_pool, catalog, Arc::new(gateway), blobs);
    let app = orrery_px::build_router(state);

    let addr = format!("127.0.0.1:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
