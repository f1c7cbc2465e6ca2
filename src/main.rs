//! dnslist - DNS reputation list checks for mail servers

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use dnslist_rust::codec::parse_ip;
use dnslist_rust::config::Config;
use dnslist_rust::health::ProbeState;
use dnslist_rust::metrics::MetricsListener;
use dnslist_rust::reload::{load_next, ConfigWatcher, DEFAULT_INTERVAL, DEFAULT_JITTER};
use dnslist_rust::server::{render, PolicyServer};
use dnslist_rust::{DnsList, Peer, SearchMode};
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Log timestamps in local time instead of UTC.
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "dnslist")]
#[command(about = "DNS reputation list checks for mail servers", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "dnslist.conf")]
    config: String,

    /// Overrides `main.search` (first | all)
    #[arg(long)]
    search: Option<SearchMode>,

    #[arg(long, default_value = "logs")]
    log_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe the zones, then evaluate each address
    Check {
        #[arg(required = true)]
        ips: Vec<String>,
    },
    /// Run the RFC 5782 self-test once and print per-zone state
    Probe,
    /// Run the policy service with periodic health checks and hot reload
    Serve {
        #[arg(long, default_value = "127.0.0.1:10040")]
        listen: String,
    },
}

fn main() -> Result<()> {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("dnslist-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cores))
}

async fn async_main(cores: usize) -> Result<()> {
    let args = Args::parse();

    std::fs::create_dir_all(&args.log_dir).unwrap_or_default();
    let file_appender = RollingFileAppender::new(
        format!("{}/dnslist.log", args.log_dir),
        RollingConditionBasic::new().daily(),
        30,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stderr).with_timer(LocalTimer))
        .init();

    info!("Starting dnslist version {} on {} worker threads", env!("CARGO_PKG_VERSION"), cores);

    let abs_path = std::fs::canonicalize(&args.config)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| args.config.clone());
    info!(">>> Locked configuration absolute path: {}", abs_path);

    match &args.command {
        Command::Check { ips } => check(&args, &abs_path, ips).await,
        Command::Probe => probe(&args, &abs_path).await,
        Command::Serve { listen } => serve(&args, &abs_path, listen).await,
    }
}

fn with_overrides(args: &Args, mut cfg: Config) -> Config {
    if let Some(search) = args.search {
        cfg.main.search = search;
    }
    info!("Loaded {} zone(s), search mode {:?}", cfg.zones.len(), cfg.main.search);
    cfg
}

fn load(args: &Args, path: &str) -> Result<Config> {
    Ok(with_overrides(args, Config::load(path)?))
}

async fn check(args: &Args, path: &str, ips: &[String]) -> Result<()> {
    let peers = ips.iter().map(|ip| parse_ip(ip).map(Peer::from)).collect::<dnslist_rust::Result<Vec<_>>>()?;
    let service = DnsList::from_config(load(args, path)?);
    service.probe_once().await;

    for peer in peers {
        let decision = service.enforce(service.decide(&peer).await);
        println!("{}\t{}", peer.ip, render(&decision));
    }
    Ok(())
}

async fn probe(args: &Args, path: &str) -> Result<()> {
    let service = DnsList::from_config(load(args, path)?);
    service.health.check_zones().await;

    for zone in service.registry.zones() {
        let state = service.health.state(&zone.name).unwrap_or(ProbeState::Untested);
        println!("{}\t{}\t{:?}", zone.name, zone.zone_type, state);
    }
    Ok(())
}

async fn serve(args: &Args, path: &str, listen: &str) -> Result<()> {
    // Created once so the metrics port stays bound across reloads.
    let mut metrics: Option<MetricsListener> = None;
    let mut cfg = load(args, path)?;

    loop {
        info!("--- Starting/Reloading dnslist configuration ---");
        if cfg.stats.enable && metrics.is_none() {
            metrics = Some(MetricsListener::spawn(&cfg.stats.listen)?);
        }

        let service = Arc::new(DnsList::from_config(cfg));
        let _health = service.start_health().await;

        // A broken edit keeps this generation serving until the next change.
        let next = loop {
            let (reload_tx, reload_rx) = watch::channel(false);
            let _watcher = ConfigWatcher::spawn(path.to_string(), DEFAULT_INTERVAL, DEFAULT_JITTER, reload_tx);

            if !PolicyServer::new(service.clone()).run(listen, reload_rx).await? {
                return Ok(());
            }
            if let Some(next) = load_next(path) {
                break with_overrides(args, next);
            }
        };

        info!("Hot reload triggered, rebuilding engine...");
        cfg = next;
    }
}
