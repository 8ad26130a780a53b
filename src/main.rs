use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, net::SocketAddr, path::Path, sync::Arc};
use tempshare::{
    clock::SystemClock,
    config::AppConfig,
    db,
    handlers::{AppState, auth::AuthKeys},
    routes::routes::routes,
    services::{
        object_store::DiskObjectStore,
        registry::SqliteRegistry,
        share_service::ShareService,
        sweeper::{SweepConfig, Sweeper},
    },
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!(
        host = %cfg.host,
        port = cfg.port,
        storage_dir = %cfg.storage_dir,
        database_url = %cfg.database_url,
        retention_hours = cfg.retention_hours,
        sweep_interval_secs = cfg.sweep_interval_secs,
        "Starting tempshare"
    );

    // --- Database ---
    let pool = db::connect(&cfg.database_url).await?;
    db::run_migrations(&pool).await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Core services ---
    let registry = Arc::new(SqliteRegistry::new(pool.clone()));
    let store = Arc::new(DiskObjectStore::new(&cfg.storage_dir));
    let clock = Arc::new(SystemClock);
    let shares = ShareService::new(
        registry.clone(),
        store.clone(),
        clock.clone(),
        chrono::Duration::hours(cfg.retention_hours),
    );

    let cancel = CancellationToken::new();
    let sweeper = Sweeper::new(
        registry,
        store,
        clock,
        SweepConfig {
            interval: std::time::Duration::from_secs(cfg.sweep_interval_secs),
            orphan_grace: chrono::Duration::seconds(cfg.orphan_grace_secs as i64),
            ..SweepConfig::default()
        },
    )
    .spawn(cancel.clone());

    // --- Build router ---
    let state = AppState {
        shares,
        auth: AuthKeys::from_secret(&cfg.jwt_secret),
        db: pool,
        storage_dir: cfg.storage_dir.clone().into(),
    };
    let app: Router = routes(cfg.max_upload_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cancel.cancel();
    if let Err(err) = sweeper.await {
        tracing::warn!(error = %err, "sweeper task ended abnormally");
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
