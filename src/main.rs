// src/main.rs

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn, Level};

use activationd::config::{DaemonConfig, LoggingConfig};
use activationd::errors::ActivationResult;
use activationd::events::TracingSink;
use activationd::hardware::{compute_fingerprint, SysfsHardware};
use activationd::key_store::KeyStore;
use activationd::privilege::require_privileged;
use activationd::scheduler::{Scheduler, SchedulerSettings};
use activationd::verification::VerificationClient;

#[derive(Parser, Debug)]
#[command(name = "activationd", version)]
#[command(about = "Periodic activation verification daemon")]
#[command(
    subcommand_required = true,
    arg_required_else_help = true,
    disable_help_subcommand = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the activation scheduler until the process is stopped
    Daemon {
        /// Path to the TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Only `daemon` is a successful invocation; help and version included.
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::FAILURE,
                _ => ExitCode::from(2),
            };
        }
    };

    match cli.command {
        Command::Daemon { config } => match run_daemon(config.as_deref()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("activationd: {e}");
                ExitCode::FAILURE
            }
        },
    }
}

async fn run_daemon(config_path: Option<&Path>) -> ActivationResult<()> {
    // Nothing touches the filesystem before this.
    require_privileged()?;

    let config = DaemonConfig::load(config_path)?;
    init_logging(&config.logging);

    let settings = SchedulerSettings::from_config(&config)?;
    let store = KeyStore::from_config(&config.storage);
    store.ensure_initialized().await?;

    match compute_fingerprint() {
        Ok(fingerprint) => debug!(%fingerprint, "Hardware fingerprint"),
        Err(e) => warn!("Hardware fingerprint unavailable ({e}), checks will retry every tick"),
    }

    if let Some(installed) = store.install_time().await {
        info!(
            artifact = %store.artifact_path().display(),
            installed = %installed.to_rfc3339(),
            "Using grace period marker"
        );
    }

    let mut scheduler = Scheduler::new(
        settings,
        store,
        SysfsHardware::default(),
        VerificationClient::from_config(&config),
        TracingSink,
    );
    scheduler.run().await;

    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let level = logging.level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}
