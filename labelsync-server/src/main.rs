//! labelsync-server - label and mapping distribution service
//!
//! Serves the client API (`/api/v1`), the admin API (`/admin`) and the
//! health endpoint from one listener.

use anyhow::{Context, Result};
use clap::Parser;
use labelsync_common::config::{CompiledDefaults, RootFolderInitializer, RootFolderResolver};
use labelsync_common::db::init_database;
use labelsync_server::{build_router, AppState};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for labelsync-server
#[derive(Parser, Debug)]
#[command(name = "labelsync-server")]
#[command(about = "Shipping label distribution server")]
#[command(version)]
struct Args {
    /// Root folder holding the database, labels and bundles
    ///
    /// Falls back to LABELSYNC_ROOT_FOLDER, then LABELSYNC_ROOT, then the
    /// config file.
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Listen address (host:port)
    #[arg(short, long, env = "LABELSYNC_BIND")]
    bind: Option<String>,

    /// TOML config file (defaults to ~/.config/labelsync/labelsync.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let resolver = RootFolderResolver::new("labelsync")
        .with_cli_arg(args.root_folder)
        .with_config_path(args.config);
    let config = resolver.load_config();

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(
        "Starting labelsync-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    if let Some(path) = resolver.config_file_path() {
        info!("Config file: {}", path.display());
    }

    let initializer = RootFolderInitializer::new(resolver.resolve_with(&config));
    initializer.ensure_directory_exists()?;
    info!("Root folder: {}", initializer.root().display());

    let db_path = initializer.database_path();
    let fresh = !initializer.database_exists();
    let pool = match init_database(&db_path).await {
        Ok(pool) => {
            if fresh {
                info!("Created new database: {}", db_path.display());
            } else {
                info!("Database ready: {}", db_path.display());
            }
            pool
        }
        Err(e) => {
            error!("Failed to open database {}: {}", db_path.display(), e);
            return Err(e.into());
        }
    };

    let state = AppState::new(pool, initializer, &config);

    if state.admin_token.is_none() {
        warn!("No admin_token configured; /admin routes are unauthenticated");
    }

    let retention = state.retention;
    if retention.orders_days > 0 || retention.files_days > 0 {
        match state
            .store
            .sweep_expired(retention.orders_days, retention.files_days)
            .await
        {
            Ok(stats) => info!(
                orders_deleted = stats.orders_deleted,
                files_deleted = stats.files_deleted,
                "Startup retention sweep finished"
            ),
            Err(e) => warn!(error = %e, "Startup retention sweep failed"),
        }
    }

    let bind = args
        .bind
        .or_else(|| config.bind_address.clone())
        .unwrap_or_else(|| CompiledDefaults::for_current_platform().bind_address);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("labelsync-server listening on http://{}", bind);
    info!("Health check: http://{}/health", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
