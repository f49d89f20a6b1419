//! telem-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (JSON in production, pretty in dev).
//! 3. Create the persistent directory and open the task store.
//! 4. Start the task lifecycle engine (expired purge, supervisor, recovery).
//! 5. Build the Axum router and start the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use telem_core::{SqliteTaskStore, TaskService};
use telem_server::{routes, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cfg.log_level.parse().unwrap_or_default()),
        )
        .with_target(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!(version = env!("CARGO_PKG_VERSION"), "telem-server starting");

    // ── 3. Store ───────────────────────────────────────────────────────────────
    let core_cfg = Arc::new(cfg.core());
    tokio::fs::create_dir_all(&core_cfg.persistent_dir)
        .await
        .with_context(|| {
            format!(
                "creating persistent directory {}",
                core_cfg.persistent_dir.display()
            )
        })?;
    let store = Arc::new(
        SqliteTaskStore::open(&core_cfg.db_path())
            .await
            .context("opening task store")?,
    );
    info!(db = %core_cfg.db_path().display(), "task store ready");

    // ── 4. Lifecycle engine ────────────────────────────────────────────────────
    let service = TaskService::start(Arc::clone(&store), Arc::clone(&core_cfg))
        .await
        .context("starting task service")?;
    info!(
        max_tasks = core_cfg.max_in_flight,
        cycle_ms = core_cfg.cycle.as_millis() as u64,
        "task service running"
    );

    // ── 5. HTTP server ─────────────────────────────────────────────────────────
    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        store,
        service,
    });
    let app = routes::build(state);
    let addr: SocketAddr = cfg.bind_address.parse().context("parsing bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
