use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ablage::{
    config,
    db::{SqliteManager, SqlitePool},
    routes,
    state::AppState,
    storage::BlobStore,
    store::MetadataStore,
    tasks,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (stdout + tägliche Datei-Rotation unter ./logs)
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "ablage.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Guards am Leben halten (nicht fallen lassen), damit Non-Blocking Writer korrekt flushen
    let _log_guards = (stdout_guard, file_guard);

    // Load configuration (embedded defaults -> ablage.toml -> env/.env)
    let app_cfg = config::load()?;
    if app_cfg.auth.master_key == "master_key" {
        tracing::warn!("auth.master_key is still the built-in default; set ABLAGE__AUTH__MASTER_KEY");
    }

    // Database: own bounded pool, one connection opened up front to fail fast
    let db_url = &app_cfg.database.url;
    config::ensure_sqlite_parent_dir(db_url)?;
    let pool = SqlitePool::new(SqliteManager::from_url(db_url)?, app_cfg.database.max_connections);
    pool.warm_up(1).await?;
    info!("SQLite database at {} (max {} connections)", db_url, pool.max_size());

    let (expired_tx, expired_rx) = mpsc::unbounded_channel();
    let store = MetadataStore::new(pool.clone(), app_cfg.database.acquire_timeout()).with_expiry_notifier(expired_tx);
    store.init_schema().await?;

    let blobs = BlobStore::open(&app_cfg.storage.dir).await?;
    info!("Storing files under {}", blobs.root().display());

    let state = AppState::new(store, blobs.clone(), app_cfg.clone());

    // Background jobs: blob reaper, expiry sweeper (runs once right away), limiter eviction
    tokio::spawn(tasks::reap_expired_blobs(blobs, expired_rx));
    tokio::spawn(tasks::sweep_expired(state.clone(), Duration::from_secs(app_cfg.expiry.sweep_interval_secs)));
    tokio::spawn(tasks::evict_idle_clients(
        state.rate_limiter.clone(),
        Duration::from_secs(app_cfg.rate_limits.cleanup_interval_secs),
        app_cfg.rate_limits.idle_multiple,
    ));

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    // CORS: in Debug permissiv (für lokale Entwicklung), Datei-Antworten setzen ihren eigenen Header
    let app = if cfg!(debug_assertions) { app.layer(CorsLayer::permissive()) } else { app };

    // Server listen addr (from config)
    let port: u16 = app_cfg.server.port;
    let host: String = app_cfg.server.host.clone();
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", host, port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Ablage listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
