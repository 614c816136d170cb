use anyhow::Context;
use clap::Parser;
use nix::sys::resource::{getrlimit, setrlimit, Resource};
use server_common::diagnostic_logging::{DiagnosticFormat, LoggingConfig};
use server_common::start::StartConfig;
use std::path::PathBuf;
use tokio::sync::Mutex;

mod bgp_actor;
mod orchestrator;
mod signals;

use orchestrator::Orchestrator;

/// dnsbgpd: watches DNS answers for names on an allow-list and
/// announces host routes for their resolved addresses over BGP.
#[derive(Debug, Parser)]
#[command(about, version = version_info::version())]
struct Opt {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "/etc/dnsbgpd/dnsbgpd.toml")]
    config: PathBuf,

    /// Directory where diagnostic log files will be placed.
    ///
    /// If omitted, diagnostics are printed to stderr.
    #[arg(long)]
    diag_log_dir: Option<PathBuf>,

    /// How diagnostic logs render. full, compact and pretty are
    /// intended for human consumption; json is machine readable.
    #[arg(long, default_value = "full")]
    diag_format: DiagnosticFormat,
}

/// Holds the running daemon between `perform_init` building it and
/// `signal_shutdown` tearing it down, behind a lazily-initialized
/// static rather than threaded through as an argument.
static ORCHESTRATOR: std::sync::OnceLock<Mutex<Option<Orchestrator>>> = std::sync::OnceLock::new();

fn orchestrator_slot() -> &'static Mutex<Option<Orchestrator>> {
    ORCHESTRATOR.get_or_init(|| Mutex::new(None))
}

fn main() -> anyhow::Result<()> {
    let opts = Opt::parse();

    let (_no_file_soft, no_file_hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
    setrlimit(Resource::RLIMIT_NOFILE, no_file_hard, no_file_hard).context("setrlimit NOFILE")?;

    server_common::panic::register_panic_hook();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async move { run(opts).await })
}

async fn perform_init(config_path: PathBuf) -> anyhow::Result<()> {
    tracing::info!(version = version_info::version(), "starting dnsbgpd");
    let orchestrator = Orchestrator::start(&config_path)
        .await
        .with_context(|| format!("starting dnsbgpd from {}", config_path.display()))?;
    orchestrator_slot().lock().await.replace(orchestrator);
    Ok(())
}

async fn signal_shutdown() {
    tracing::info!("shutting down");
    if let Some(orchestrator) = orchestrator_slot().lock().await.take() {
        orchestrator.shutdown().await;
    }
}

async fn run(opts: Opt) -> anyhow::Result<()> {
    let config_path = opts.config.clone();

    StartConfig {
        logging: LoggingConfig {
            log_dir: opts.diag_log_dir.clone(),
            diag_format: opts.diag_format,
            filter_env_var: "DNSBGPD_LOG",
            default_filter: "dnsbgpd=info,server_common=info",
        },
    }
    .run(perform_init(config_path), signal_shutdown())
    .await
}
