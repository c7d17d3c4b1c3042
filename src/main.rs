use chrono::Utc;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use topup_ledger::application::lifecycle::LifecycleEngine;
use topup_ledger::application::notifier::NotificationDispatcher;
use topup_ledger::application::watcher::RefundWatcher;
use topup_ledger::config::{DEFAULT_AUTO_REFUND_MINUTES, Settings, SettingsHandle};
use topup_ledger::domain::ports::{ClockRef, DEFAULT_MAX_CAS_ATTEMPTS, Stores};
use topup_ledger::infrastructure::clock::SystemClock;
use topup_ledger::interfaces::csv::account_writer::AccountWriter;
use topup_ledger::interfaces::csv::event_reader::EventReader;
use topup_ledger::interfaces::replay::Replayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input events CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "TOPUP_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Minutes a pending order may wait before it is refunded.
    #[arg(long, env = "TOPUP_AUTO_REFUND_MINUTES", default_value_t = DEFAULT_AUTO_REFUND_MINUTES)]
    auto_refund_minutes: u32,

    /// Disable automatic refunds of stale orders.
    #[arg(long)]
    no_auto_refund: bool,

    /// Suppress success/failure notifications (operator notifications are still created).
    #[arg(long)]
    no_auto_notifications: bool,

    /// Refund watcher poll interval, used with --serve.
    #[arg(long, env = "TOPUP_POLL_INTERVAL_SECS", default_value_t = 10)]
    poll_interval_secs: u64,

    /// Retries for a conflicting balance update.
    #[arg(long, env = "TOPUP_MAX_CAS_ATTEMPTS", default_value_t = DEFAULT_MAX_CAS_ATTEMPTS)]
    max_cas_attempts: u32,

    /// After the replay, keep the refund watcher running on wall-clock time until Ctrl-C.
    #[arg(long)]
    serve: bool,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>, max_attempts: u32) -> Result<Stores> {
    match db_path {
        Some(path) => Stores::rocksdb(path, max_attempts).into_diagnostic(),
        None => Ok(Stores::in_memory_with_attempts(max_attempts)),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>, max_attempts: u32) -> Result<Stores> {
    if db_path.is_some() {
        eprintln!(
            "WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Stores::in_memory_with_attempts(max_attempts))
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the account snapshot; logs go to stderr.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .init();

    let cli = Cli::parse();
    let settings = SettingsHandle::new(Settings {
        auto_refund_enabled: !cli.no_auto_refund,
        auto_refund_timeout_minutes: cli.auto_refund_minutes,
        auto_notifications_enabled: !cli.no_auto_notifications,
    });
    let stores = open_stores(cli.db_path, cli.max_cas_attempts)?;

    let mut replayer = Replayer::new(stores.clone(), settings.clone(), Utc::now());
    let file = File::open(&cli.input).into_diagnostic()?;
    let (mut applied, mut rejected) = (0usize, 0usize);
    for event in EventReader::new(file).events() {
        match event {
            Ok(timed) => match replayer.apply(timed.at, timed.event).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(error = %e, "event rejected");
                    rejected += 1;
                }
            },
            Err(e) => {
                warn!(error = %e, "unreadable event");
                rejected += 1;
            }
        }
    }
    info!(applied, rejected, "replay finished");

    if cli.serve {
        let clock: ClockRef = Arc::new(SystemClock);
        let notifier =
            NotificationDispatcher::new(stores.notifications.clone(), settings.clone(), clock.clone());
        let engine = Arc::new(LifecycleEngine::new(stores.clone(), notifier, clock.clone()));
        let watcher = RefundWatcher::new(engine, settings, clock)
            .with_interval(Duration::from_secs(cli.poll_interval_secs.max(1)));
        let shutdown = watcher.shutdown_token();
        let handle = watcher.spawn();

        tokio::signal::ctrl_c().await.into_diagnostic()?;
        shutdown.cancel();
        handle.await.into_diagnostic()?;
    }

    let accounts = replayer.into_accounts().await.into_diagnostic()?;

    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(&accounts).into_diagnostic()?;

    Ok(())
}
