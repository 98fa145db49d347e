use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use outreach_pool::config::{
    GatewayConfig, MonitorConfig, PoolConfig, TelegramNotifierConfig, parse_schedule,
};
use outreach_pool::console::Console;
use outreach_pool::monitor::{self, ErrorCounter, HealthMonitor, MonitorDeps};
use outreach_pool::notify::{FanoutNotifier, LogNotifier, Notifier, TelegramNotifier};
use outreach_pool::pool::{PoolDeps, PoolOrchestrator, spawn_pending_prune_task};
use outreach_pool::session::{HttpGateway, SessionFactory};
use outreach_pool::store::{AccountStore, LibSqlAccountStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit.
    let _log_guard = init_tracing();

    eprintln!("📇 Outreach pool v{}", env!("CARGO_PKG_VERSION"));

    let pool_config = PoolConfig::from_env();
    let monitor_config = MonitorConfig::from_env()?;
    let gateway_config = GatewayConfig::from_env()?;

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("POOL_DB_PATH").unwrap_or_else(|_| "./data/outreach-pool.db".to_string());
    let store: Arc<dyn AccountStore> =
        Arc::new(LibSqlAccountStore::new_local(std::path::Path::new(&db_path)).await?);
    eprintln!("   Database: {db_path}");

    // ── Sessions & notifications ────────────────────────────────────────
    let sessions: Arc<dyn SessionFactory> = Arc::new(HttpGateway::new(&gateway_config));
    eprintln!("   Gateway: {}", gateway_config.base_url);

    let mut fanout = FanoutNotifier::new().with(Arc::new(LogNotifier));
    if let Some(telegram) = TelegramNotifierConfig::from_env() {
        eprintln!("   Telegram notices: {} chat(s)", telegram.chat_ids.len());
        fanout = fanout.with(Arc::new(TelegramNotifier::new(telegram)));
    }
    let notifier: Arc<dyn Notifier> = Arc::new(fanout);

    // ── Pool & monitor ──────────────────────────────────────────────────
    let errors = Arc::new(ErrorCounter::new());
    let pool = Arc::new(PoolOrchestrator::new(
        pool_config.clone(),
        PoolDeps {
            store: Arc::clone(&store),
            sessions: Arc::clone(&sessions),
            notifier: Arc::clone(&notifier),
            errors: Arc::clone(&errors),
        },
    ));
    let health = Arc::new(HealthMonitor::new(
        monitor_config.clone(),
        MonitorDeps {
            store: Arc::clone(&store),
            sessions,
            notifier,
            errors,
        },
    ));
    eprintln!(
        "   Daily cap: {} per account, min spacing {}s",
        pool_config.daily_message_cap,
        pool_config.min_send_interval.as_secs()
    );

    // ── Background tasks ────────────────────────────────────────────────
    let sweep_schedule = parse_schedule("MONITOR_SWEEP_CRON", &monitor_config.sweep_schedule)?;
    let sweep_handle = monitor::spawn_sweep_task(
        Arc::clone(&health),
        sweep_schedule,
        monitor_config.max_start_jitter,
    );
    eprintln!("   Sweeps: {}", monitor_config.sweep_schedule);

    let reset_cron = std::env::var("POOL_DAILY_RESET_CRON")
        .unwrap_or_else(|_| "0 0 0 * * *".to_string());
    let reset_handle = spawn_daily_reset_task(
        Arc::clone(&store),
        parse_schedule("POOL_DAILY_RESET_CRON", &reset_cron)?,
    );
    eprintln!("   Daily reset: {reset_cron}");

    let prune_interval = (pool_config.authorization_ttl / 2).max(Duration::from_secs(1));
    let prune_handle = spawn_pending_prune_task(Arc::clone(&pool), prune_interval);

    eprintln!("   Type 'help' for commands.\n");

    let console = Console::new(Arc::clone(&pool), Arc::clone(&health), Arc::clone(&store));
    let result = console.run().await;

    sweep_handle.abort();
    reset_handle.abort();
    prune_handle.abort();
    pool.shutdown().await;
    tracing::info!("Outreach pool stopped");

    result
}

/// Stderr logging filtered by `RUST_LOG`, plus a daily rolling file when
/// `POOL_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("POOL_LOG_DIR").ok().map(PathBuf::from) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "outreach-pool.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

/// Zero every account's daily counter on `schedule`.
fn spawn_daily_reset_task(
    store: Arc<dyn AccountStore>,
    schedule: cron::Schedule,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(delay) = monitor::schedule::next_delay(&schedule, Duration::ZERO) {
            tokio::time::sleep(delay).await;
            match store.reset_daily_counts().await {
                Ok(reset) => tracing::info!(reset, "Daily message counters reset"),
                Err(e) => tracing::error!(error = %e, "Daily counter reset failed"),
            }
        }
    })
}
