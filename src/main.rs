//! KTW - Krishna Trade Worker
//!
//! Option-chain paper trading worker for one index underlying:
//! - Dhan v2 option chain, S/R levels, PCR, max pain, OI deltas
//! - C1..C6 entry checks against buffer-shifted levels
//! - Paper exits, risk guard, circuit breaker
//! - SQLite journal and Telegram alerts

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ktw::comms::telegram::daily_summary_message;
use ktw::comms::Notifier;
use ktw::config::Config;
use ktw::core::session::ist_date;
use ktw::data::Journal;
use ktw::engine::{DayLoop, VERSION};
use ktw::feed::DhanProvider;
use ktw::instance::InstanceLock;
use ktw::status::WorkerStatus;
use ktw::trading::performance;

const SEP: &str = "===========================================================";

#[derive(Parser)]
#[command(name = "ktw", version, about = "Option-chain paper trading worker")]
struct Cli {
    /// Path to the TOML config
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Run the worker (default)
    Run,
    /// Print the last status written by the worker
    Status,
    /// Refresh once and print the C1..C6 report
    OcNow,
    /// Compute and journal today's performance
    Eod,
}

fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Failed to load {}: {:#}. Exiting.", cli.config.display(), e);
        std::process::exit(1);
    });
    init_logging(&cfg.system.log_level)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(cfg).await,
        Command::Status => status(&cfg),
        Command::OcNow => oc_now(cfg).await,
        Command::Eod => eod(cfg).await,
    }
}

async fn run(cfg: Config) -> Result<()> {
    info!("{}", SEP);
    info!("  {} v{} - Option-chain paper trading worker", cfg.system.name, VERSION);
    info!("{}", SEP);
    for line in cfg.startup_summary() {
        info!("[boot] {}", line);
    }

    let Some(_lock) = InstanceLock::acquire(Path::new(&cfg.journal.lock_dir), &cfg.telegram.bot_token)? else {
        bail!("another worker already runs with this bot token; stop it first (two pollers cause 409 Conflict)");
    };

    let journal = Journal::open(&cfg.journal.path)?;

    let notifier = Notifier::from_config(&cfg.telegram);
    if notifier.is_enabled() {
        info!("Telegram notifier started ({} chat(s))", cfg.telegram.chat_ids.len());
    } else {
        warn!("Telegram notifier disabled (no token, no chat ids, or disabled in config)");
    }

    let provider = Arc::new(DhanProvider::new(&cfg).context("option-chain provider")?);
    info!("Provider: dhan ({})", cfg.dhan.base_url);

    let now = Utc::now();
    let mut day = DayLoop::new(cfg, provider, journal, notifier, now);
    day.recover(now)?;
    day.announce_start().await;

    day.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Ctrl-C handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

fn status(cfg: &Config) -> Result<()> {
    println!("{}", WorkerStatus::load(&cfg.journal.status_file).render());

    if Path::new(&cfg.journal.path).exists() {
        let journal = Journal::open(&cfg.journal.path)?;
        if let Some((ts, state, msg)) = journal.last_status(&cfg.system.worker_id)? {
            println!("Journal:     {} {} {}", ts, state, msg);
        }
    }
    Ok(())
}

async fn oc_now(cfg: Config) -> Result<()> {
    let journal = Journal::open(&cfg.journal.path)?;
    let provider = Arc::new(DhanProvider::new(&cfg).context("option-chain provider")?);
    let now = Utc::now();
    let mut day = DayLoop::new(cfg, provider, journal, Notifier::disabled(), now);
    day.recover(now)?;
    println!("{}", day.oc_now(now).await?);
    Ok(())
}

async fn eod(cfg: Config) -> Result<()> {
    let journal = Journal::open(&cfg.journal.path)?;
    let today = ist_date(Utc::now());
    let pnls = journal.closed_pnls_on(today)?;
    let perf = performance::compute(today, &cfg.oc.symbol, &pnls);
    journal.record_performance(&perf, VERSION)?;

    let msg = daily_summary_message(&perf);
    Notifier::from_config(&cfg.telegram).notify(&msg).await;
    println!(
        "{} {}: {} trades (W {} / L {}), win rate {}%, net {}, max DD {}",
        perf.symbol, perf.date, perf.trades, perf.wins, perf.losses, perf.win_rate, perf.net_pnl, perf.max_drawdown
    );
    Ok(())
}
