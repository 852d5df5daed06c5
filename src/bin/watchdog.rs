//! KTW Watchdog
//!
//! Supervisor for the worker process. A crashed worker is restarted with
//! exponential backoff; more than five restarts inside an hour parks the
//! watchdog until the oldest one ages out. A clean exit ends supervision.

use anyhow::Result;
use clap::Parser;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{error, info, warn};
use tracing_subscriber::FmtSubscriber;

use ktw::comms::telegram::restart_message;
use ktw::comms::Notifier;
use ktw::config::Config;

const MAX_RESTARTS_PER_HOUR: usize = 5;
const INITIAL_BACKOFF: Duration = Duration::from_secs(3);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// A run this long counts as healthy and resets the backoff.
const STABLE_RUN: Duration = Duration::from_secs(600);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Parser)]
#[command(name = "watchdog", about = "Restarts the KTW worker when it crashes")]
struct Cli {
    /// Worker binary
    #[arg(long, default_value = "./target/release/ktw")]
    bin: PathBuf,

    /// Config passed through to the worker
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
enum Decision {
    Restart { delay: Duration, restarts: u32 },
    Cooldown(Duration),
}

struct RestartPolicy {
    recent: VecDeque<Instant>,
    backoff: Duration,
}

impl RestartPolicy {
    fn new() -> Self {
        Self { recent: VecDeque::new(), backoff: INITIAL_BACKOFF }
    }

    fn on_crash(&mut self, ran_for: Duration, now: Instant) -> Decision {
        if ran_for >= STABLE_RUN {
            self.backoff = INITIAL_BACKOFF;
        }
        while let Some(&first) = self.recent.front() {
            if now.duration_since(first) >= HOUR {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        if let Some(&oldest) = self.recent.front() {
            if self.recent.len() >= MAX_RESTARTS_PER_HOUR {
                return Decision::Cooldown(HOUR.saturating_sub(now.duration_since(oldest)));
            }
        }

        self.recent.push_back(now);
        let delay = self.backoff;
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);
        Decision::Restart { delay, restarts: self.recent.len() as u32 }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_target(false).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let notifier = match Config::load(&cli.config) {
        Ok(cfg) => Notifier::from_config(&cfg.telegram),
        Err(e) => {
            warn!("Config {} unreadable ({:#}); restart alerts disabled", cli.config.display(), e);
            Notifier::disabled()
        }
    };

    info!("===========================================================");
    info!("  KTW WATCHDOG - supervising {}", cli.bin.display());
    info!("===========================================================");

    let mut policy = RestartPolicy::new();
    loop {
        let started = Instant::now();
        let mut child = match Command::new(&cli.bin)
            .arg("--config")
            .arg(&cli.config)
            .arg("run")
            .kill_on_drop(true)
            .spawn()
        {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to start {}: {}", cli.bin.display(), e);
                if !wait_for_restart(&mut policy, &notifier, started, &format!("spawn failed: {}", e)).await {
                    return Ok(());
                }
                continue;
            }
        };
        info!("Worker started (PID: {:?})", child.id());

        let status = tokio::select! {
            s = child.wait() => s,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C: stopping worker");
                let _ = child.kill().await;
                return Ok(());
            }
        };

        let reason = match status {
            Ok(s) if s.success() => {
                info!("Worker exited normally; watchdog done");
                return Ok(());
            }
            Ok(s) => format!("worker crashed (exit {:?}) after {}s", s.code(), started.elapsed().as_secs()),
            Err(e) => format!("waiting on worker failed: {}", e),
        };
        warn!("{}", reason);
        if !wait_for_restart(&mut policy, &notifier, started, &reason).await {
            return Ok(());
        }
    }
}

/// Sleeps per the policy. False when interrupted by Ctrl-C.
async fn wait_for_restart(policy: &mut RestartPolicy, notifier: &Notifier, started: Instant, reason: &str) -> bool {
    loop {
        match policy.on_crash(started.elapsed(), Instant::now()) {
            Decision::Restart { delay, restarts } => {
                info!("Restarting in {}s (#{} this hour)", delay.as_secs(), restarts);
                notifier.notify(&restart_message(restarts, reason)).await;
                return sleep_or_interrupt(delay).await;
            }
            Decision::Cooldown(wait) => {
                error!("Too many restarts; pausing {}s", wait.as_secs());
                notifier
                    .notify(&format!("🚨 KTW watchdog: too many restarts, pausing {} min", wait.as_secs() / 60 + 1))
                    .await;
                if !sleep_or_interrupt(wait).await {
                    return false;
                }
            }
        }
    }
}

async fn sleep_or_interrupt(d: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(d) => true,
        _ = tokio::signal::ctrl_c() => false,
    }
}
