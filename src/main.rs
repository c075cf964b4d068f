//! slot-stress: stress-testing control plane for slot-style game back-ends.
//!
//! Usage:
//!   slot-stress [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Config file path (default: config/stress.toml)
//!   --http-addr <ADDR>      Control API bind address (overrides config)
//!   --log-level <LEVEL>     Log level (overrides config)

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use slot_stress::config::AppConfig;
use slot_stress::coordinator::Coordinator;
use slot_stress::data::{Data, StressRepo};
use slot_stress::executor::ExecutorDeps;
use slot_stress::game::{builtin, GameRegistry};
use slot_stress::notify::WebhookNotifier;
use slot_stress::player::{run_player_loader, PlayerPool};
use slot_stress::scheduler::{wake_channel, Scheduler};
use slot_stress::storage::{ArtifactStore, S3Store};
use slot_stress::task_pool::TaskPool;
use slot_stress::{server, ChartGenerator};

#[derive(Parser, Debug)]
#[command(name = "slot-stress")]
#[command(about = "Stress-testing control plane for slot-style game back-ends")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/stress.toml")]
    config: PathBuf,

    /// Control API bind address (overrides config)
    #[arg(long)]
    http_addr: Option<String>,

    /// Log level (overrides config)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    // .env is optional; only complain about real failures
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: failed to load .env: {e}");
        }
    }

    let args = Args::parse();

    let mut cfg = if args.config.exists() {
        AppConfig::from_file(&args.config)
            .with_context(|| format!("load config {:?}", args.config))?
    } else {
        eprintln!(
            "config file not found at {:?}, using defaults",
            args.config
        );
        AppConfig::default()
    };
    cfg.apply_env_overrides();
    if let Some(addr) = args.http_addr {
        cfg.http_addr = addr;
    }
    if let Some(level) = args.log_level {
        cfg.log_level = level;
    }
    cfg.validate().context("configuration validation failed")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(http_addr = %cfg.http_addr, "starting slot-stress");

    let cfg = Arc::new(cfg);
    let shutdown = CancellationToken::new();

    // data layer and game registry (stake sets are frozen at build)
    let data = Data::connect(&cfg).await.context("connect backing stores")?;
    let repo: Arc<dyn StressRepo> = Arc::new(data);

    let behaviors = builtin::all();
    let ids: Vec<i64> = behaviors.iter().map(|b| b.game_id()).collect();
    let stake_sets = repo
        .load_stake_sets(&ids)
        .await
        .context("load game stake sets")?;
    let games = Arc::new(GameRegistry::new(behaviors, stake_sets));
    info!(games = games.len(), "game registry built");

    let tasks = Arc::new(TaskPool::new());
    let players = Arc::new(PlayerPool::new());
    let (wake, wake_rx) = wake_channel();

    let notifier: Arc<dyn slot_stress::Notifier> =
        Arc::from(WebhookNotifier::from_config(&cfg.notify));
    let artifacts: Option<Arc<dyn ArtifactStore>> = if cfg.s3.enabled {
        Some(Arc::new(
            S3Store::new(&cfg.s3).context("build artifact store")?,
        ))
    } else {
        None
    };

    let deps = Arc::new(ExecutorDeps {
        repo: Arc::clone(&repo),
        players: Arc::clone(&players),
        notifier,
        artifacts,
        chart_gen: ChartGenerator::new(cfg.chart.output_dir.clone()),
        chart: cfg.chart.clone(),
        launch: cfg.launch.clone(),
        notify_enabled: cfg.notify.enabled,
        wake: wake.clone(),
    });

    let coordinator = Arc::new(Coordinator::new(
        Arc::clone(&cfg),
        Arc::clone(&games),
        Arc::clone(&tasks),
        Arc::clone(&players),
        Arc::clone(&repo),
        wake.clone(),
        shutdown.clone(),
    ));

    // leftovers from a previous run would skew every RTP figure
    coordinator.startup_clean().await;

    let scheduler = Scheduler::new(
        Arc::clone(&tasks),
        Arc::clone(&players),
        deps,
        cfg.scheduler.max_running,
        shutdown.clone(),
        wake_rx,
    );
    tokio::spawn(scheduler.run());

    tokio::spawn(Arc::clone(&tasks).run_auto_cleanup(
        shutdown.clone(),
        cfg.cleanup_interval(),
        cfg.cleanup_retention(),
    ));

    if cfg.players.auto_load {
        tokio::spawn(run_player_loader(
            shutdown.clone(),
            cfg.players.clone(),
            Arc::clone(&repo),
            Arc::clone(&players),
            wake.clone(),
        ));
    } else {
        warn!("player auto-load disabled; tasks admit only with manual pool fills");
    }

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        info!("shutdown requested");
        signal_shutdown.cancel();
    });

    server::serve(&cfg.http_addr, coordinator, shutdown.clone()).await?;
    shutdown.cancel();
    info!("bye");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = Args::try_parse_from(["slot-stress"]).unwrap();
        assert_eq!(args.config.to_str().unwrap(), "config/stress.toml");
        assert!(args.http_addr.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::try_parse_from([
            "slot-stress",
            "-c",
            "/etc/stress.toml",
            "--http-addr",
            "127.0.0.1:9000",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.config.to_str().unwrap(), "/etc/stress.toml");
        assert_eq!(args.http_addr.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}
