use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use extract_core::config::AttemptsBackend;
use extract_core::ExtractConfig;
use extract_runner::{
    AttemptTracker, Coordinator, CoordinatorConfig, HttpTaskRunner, MemoryAttemptTracker,
    SchedulerEngine, SqliteAttemptTracker, SqliteAuditLog,
};
use extract_scheduler::{JobRegistry, TaskStore};
use rusqlite::Connection;
use tracing::{info, warn};

mod app;
mod http;

#[derive(Parser)]
#[command(name = "extract-gateway", version, about = "Extract task scheduler and trigger control surface")]
struct Args {
    /// Config file (defaults to ~/.extract/extract.toml)
    #[arg(short, long, env = "EXTRACT_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "extract_gateway=info,extract_runner=info,extract_scheduler=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let args = Args::parse();
    let config = ExtractConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        ExtractConfig::default()
    });

    // one SQLite file, one connection per subsystem
    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = open(&db_path)?;
    extract_scheduler::db::init_db(&db)?;
    extract_runner::db::init_db(&db)?;
    info!("database migrations complete");

    let tasks = Arc::new(TaskStore::new(open(&db_path)?));
    let audit = Arc::new(SqliteAuditLog::new(open(&db_path)?)?);
    let attempts: Arc<dyn AttemptTracker> = match config.attempts.backend {
        AttemptsBackend::Memory => Arc::new(MemoryAttemptTracker::new()),
        AttemptsBackend::Sqlite => Arc::new(SqliteAttemptTracker::new(open(&db_path)?)),
    };
    let runner = Arc::new(HttpTaskRunner::new(&config.runner)?);
    info!(runner = %config.runner.base_url, backend = ?config.attempts.backend, "execution wired");

    let coordinator = Arc::new(Coordinator::new(
        Arc::new(JobRegistry::new()),
        tasks,
        attempts,
        audit,
        runner,
        CoordinatorConfig::from_config(&config),
    ));

    // registry and open cycles must be settled before the first tick
    let engine = SchedulerEngine::new(
        Arc::clone(&coordinator),
        Duration::from_millis(config.scheduler.tick_interval_ms),
    )
    .with_reconcile_interval(Duration::from_secs(config.scheduler.reconcile_interval_secs));
    engine.bootstrap(chrono::Utc::now()).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, coordinator));
    let router = app::build_router(state);

    info!("Extract gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "ctrl-c handler failed");
            }
            info!("shutdown requested");
        })
        .await?;

    // stop ticking; runs already spawned are left to finish
    let _ = shutdown_tx.send(true);
    engine_task.await?;
    Ok(())
}

fn open(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
