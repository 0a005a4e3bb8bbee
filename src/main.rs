//! UCXSync - capture cluster file synchronization service
//!
//! Long-lived service that mirrors capture files from the worker fleet to
//! a local destination, with an HTTP surface for control and monitoring.
//! `mount`/`unmount`/`check` manage the CIFS layer the service reads from.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ucxsync::config;
use ucxsync::engine::{EngineOptions, SyncEngine};
use ucxsync::logging;
use ucxsync::monitor::Monitor;
use ucxsync::mount::{self, MountProvider};
use ucxsync::web::{self, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "ucxsync",
    version,
    about = "UCXSync - capture cluster file synchronization"
)]
struct Cli {
    /// Config file (default: ./ucxsync.toml, /etc/ucxsync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the synchronization service (default)
    Run(RunOpts),
    /// Mount all configured network shares
    Mount,
    /// Unmount all network shares
    Unmount,
    /// Check system requirements for mounting
    Check,
}

#[derive(clap::Args, Debug, Default)]
struct RunOpts {
    /// Project to sync at startup (overrides config)
    #[arg(long)]
    project: Option<String>,

    /// Destination directory (overrides config)
    #[arg(long)]
    dest: Option<String>,

    /// Web server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Max parallel file copies (overrides config)
    #[arg(long)]
    parallelism: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = config::load(cli.config.as_deref())?;
    if cli.debug {
        cfg.logging.level = "debug".to_string();
    }

    match cli.command.unwrap_or(Command::Run(RunOpts::default())) {
        Command::Run(opts) => run(cfg, opts).await,
        Command::Mount => {
            init_plain_logging(&cfg);
            mount::check_requirements()?;
            provider(&cfg).mount_all()
        }
        Command::Unmount => {
            init_plain_logging(&cfg);
            provider(&cfg).unmount_all()
        }
        Command::Check => {
            init_plain_logging(&cfg);
            mount::check_requirements()?;
            info!("all requirements satisfied");
            Ok(())
        }
    }
}

async fn run(mut cfg: config::Config, opts: RunOpts) -> Result<()> {
    if let Some(project) = opts.project {
        cfg.sync.project = project;
    }
    if let Some(dest) = opts.dest {
        cfg.sync.destination = dest;
    }
    if let Some(port) = opts.port {
        cfg.web.port = port;
    }
    if let Some(parallelism) = opts.parallelism {
        cfg.sync.max_parallelism = parallelism;
    }
    cfg.validate()?;

    let events = logging::channel();
    logging::init(&cfg.logging.level, events.clone());

    info!(version = env!("CARGO_PKG_VERSION"), "starting UCXSync");
    info!(
        nodes = cfg.nodes.len(),
        shares = cfg.shares.len(),
        parallelism = cfg.sync.max_parallelism,
        "configuration loaded"
    );

    // Bring the CIFS layer up before anything reads from it. Both steps
    // are best-effort: a share that fails to mount just stays an absent
    // source until an operator fixes it.
    if let Err(err) = mount::check_requirements() {
        warn!(error = %err, "mount requirements not met; shares may be unavailable");
    }
    if let Err(err) = provider(&cfg).mount_all() {
        warn!(error = %err, "some shares failed to mount");
    }

    let engine = SyncEngine::new(
        cfg.nodes.clone(),
        cfg.shares.clone(),
        cfg.base_mount_dir.clone(),
        EngineOptions::from(&cfg.sync),
    );
    let monitor = Monitor::new(cfg.monitoring.clone(), engine.clone());

    let shutdown = CancellationToken::new();
    let monitor_task = monitor.spawn(shutdown.clone());

    if !cfg.sync.project.is_empty() && !cfg.sync.destination.is_empty() {
        match engine.start(
            &cfg.sync.project,
            &cfg.sync.destination,
            cfg.sync.max_parallelism,
        ) {
            Ok(()) => {}
            Err(err) => warn!(error = %err, "auto-start failed; waiting for control surface"),
        }
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
            shutdown.cancel();
        });
    }

    let state = AppState {
        engine: engine.clone(),
        monitor,
        events,
        shutdown: shutdown.clone(),
        default_parallelism: cfg.sync.max_parallelism,
    };
    let served = web::serve(&cfg.web.host, cfg.web.port, state, shutdown.clone()).await;
    if let Err(err) = &served {
        error!(error = %err, "web server error");
        shutdown.cancel();
    }

    info!("shutting down");
    engine.stop().await;
    let _ = monitor_task.await;
    served
}

fn provider(cfg: &config::Config) -> MountProvider {
    MountProvider::new(
        cfg.nodes.clone(),
        cfg.shares.clone(),
        cfg.credentials.username.clone(),
        cfg.credentials.password.clone(),
        cfg.base_mount_dir.clone(),
    )
}

fn init_plain_logging(cfg: &config::Config) {
    logging::init(&cfg.logging.level, logging::channel());
}
