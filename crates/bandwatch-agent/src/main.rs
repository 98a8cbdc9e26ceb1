//! bandwatch
//!
//! Finds the modem's AT-command port and reports which LTE band it is
//! camped on.
//!
//! - `detect`: discover the device, query the serving channel, print the band
//! - `run`: send one raw AT command and print the payload
//! - `locate`: discovery only
//! - `--simulate`: an in-memory Qualcomm modem instead of real device nodes

mod device;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use bandwatch_modem::config::BandwatchConfig;
use bandwatch_modem::modem::detect::BandDetector;
use bandwatch_modem::modem::session::ModemSession;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Modem band watcher.
#[derive(Parser, Debug)]
#[command(name = "bandwatch", about = "Detect the serving LTE band through the modem AT port")]
struct Cli {
    /// TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Device node to try before scanning (overrides `device.path`).
    #[arg(long, global = true)]
    device: Option<String>,

    /// Use a simulated modem instead of real device nodes.
    #[arg(long, global = true, default_value_t = false)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Discover the modem and print its serving band.
    Detect {
        /// Print the full detection as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Send a raw AT command.
    Run {
        /// Command text, e.g. `AT$QCRSRP?`.
        command: String,

        /// Response timeout in milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Do not resend the command while the device is silent.
        #[arg(long, default_value_t = false)]
        no_retry: bool,
    },
    /// Discover the modem and print its device path.
    Locate,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    tracing::info!(
        simulate = cli.simulate,
        elevation = %config.elevation,
        scan_dir = %config.device.locator.scan_dir.display(),
        "bandwatch starting"
    );

    let pending = ModemSession::spawn(device::session_parts(&config, cli.simulate))
        .context("failed to start device discovery")?;
    let session = pending.wait()?;

    match cli.command {
        Command::Locate => {
            let Some(path) = session.device_path() else {
                bail!("no modem device found ({})", session.status());
            };
            println!("{path}");
        }
        Command::Detect { json } => {
            if !session.is_ready() {
                bail!("no modem device found ({})", session.status());
            }
            let detection = BandDetector::new(&session).detect();
            if json {
                println!("{}", serde_json::to_string_pretty(&detection)?);
            } else {
                match (&detection.fallback, detection.earfcn) {
                    (None, Some(earfcn)) => println!("{} EARFCN {earfcn}", detection.band),
                    (Some(reason), _) => println!("{} ({reason})", detection.band),
                    (None, None) => println!("{}", detection.band),
                }
            }
        }
        Command::Run {
            command,
            timeout_ms,
            no_retry,
        } => {
            if !session.is_ready() {
                bail!("no modem device found ({})", session.status());
            }
            let mut spec = session.command_spec(command);
            if let Some(ms) = timeout_ms {
                spec = spec.with_timeout(Duration::from_millis(ms));
            }
            if no_retry {
                spec = spec.with_retry(false);
            }
            let out = session.run_command_with(&spec);
            for line in &out.lines {
                println!("{line}");
            }
            for fault in &out.faults {
                tracing::warn!(error = %fault, "transport fault");
            }
            if !out.succeeded() {
                bail!(
                    "command failed: {} ({:?}, {} resends)",
                    out.status,
                    out.failure,
                    out.resends
                );
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<BandwatchConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            BandwatchConfig::from_toml_str(&raw)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => BandwatchConfig::default(),
    };
    if let Some(device) = &cli.device {
        config.device.path = Some(device.clone());
    }
    Ok(config)
}
