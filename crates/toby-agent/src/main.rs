//! Toby LTE modem manager
//!
//! Daemon that keeps a cellular data session up on a u-blox TOBY modem.
//!
//! - Drives the modem's AT port over a serial line on a dedicated I/O thread
//! - Enforces persistent modem settings, restarting the modem when needed
//! - Provisions the PDP context and configures the host interface and resolver
//! - Probes the primary DNS server and re-provisions when it stops answering
//! - In debug mode (`-vv`) or with `--console`, accepts AT commands on stdin
//!
//! Exits 0 after a settings-driven modem restart so a supervisor relaunches
//! it against the fresh device; every fatal condition exits non-zero.

mod console;
mod ping;
mod serial;
mod system;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;

use toby_modem::device::DevicePath;
use toby_modem::pump::IoPump;
use toby_modem::queue::{ReceiveQueue, TransmitQueue};
use toby_modem::{
    Collaborators, ConnectionManager, Correlator, LinkState, ModemConfig, ModemError, Shutdown,
};

/// Toby LTE modem manager daemon.
#[derive(Parser, Debug)]
#[command(name = "toby-agent", about = "u-blox TOBY LTE modem manager")]
struct Cli {
    /// Serial port for the modem (/dev/ttyUSB0, etc).
    #[arg(short = 'd', long)]
    device: Option<String>,

    /// Baud rate [default: 115200].
    #[arg(short = 'b', long = "baud")]
    baud_rate: Option<u32>,

    /// APN (access point name) for the mobile provider.
    #[arg(short = 'a', long)]
    apn: Option<String>,

    /// Network interface to assign the IP to (wwan0, etc).
    #[arg(short = 'i', long)]
    interface: Option<String>,

    /// TOML configuration file; flags override its values.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Resolver file to write DNS servers to [default: /etc/resolv.conf].
    #[arg(long)]
    resolv_conf: Option<PathBuf>,

    /// Verbose output; repeat (-vv) for debug output with the console.
    #[arg(short = 'v', action = ArgAction::Count)]
    verbose: u8,

    /// Accept AT commands on stdin regardless of verbosity.
    #[arg(long, default_value_t = false)]
    console: bool,
}

impl Cli {
    fn console_enabled(&self) -> bool {
        self.console || self.verbose >= 2
    }

    fn log_filter(&self) -> EnvFilter {
        let level = match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    }

    /// The configuration file (if any) with flags layered on top.
    fn load_config(&self) -> anyhow::Result<ModemConfig> {
        let mut config = match &self.config {
            Some(path) => ModemConfig::load(path)?,
            None => ModemConfig::default(),
        };
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        if let Some(baud_rate) = self.baud_rate {
            config.baud_rate = baud_rate;
        }
        if let Some(apn) = &self.apn {
            config.apn = apn.clone();
        }
        if let Some(interface) = &self.interface {
            config.interface = interface.clone();
        }
        if let Some(resolv_conf) = &self.resolv_conf {
            config.resolv_conf = resolv_conf.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(cli.log_filter())
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.load_config()?;
    tracing::info!(
        device = %config.device,
        baud_rate = config.baud_rate,
        apn = %config.apn,
        interface = %config.interface,
        "toby-agent starting"
    );

    // ── I/O pump ─────────────────────────────────────────────────
    let port = serial::open(&config.device, config.baud_rate)?;
    let transmit = TransmitQueue::new();
    let receive = ReceiveQueue::new();
    let mut pump = IoPump::new(port, transmit.clone(), receive.clone())
        .watch_device(&config.device, Box::new(DevicePath::new(&config.device)))
        .with_idle(config.timings.poll_interval)
        .spawn()
        .context("failed to start I/O thread")?;

    let correlator = Arc::new(Correlator::new(transmit, receive, &config.timings));

    // ── Operator console ─────────────────────────────────────────
    if cli.console_enabled() {
        let console_correlator = correlator.clone();
        tokio::spawn(async move {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            if let Err(e) = console::run(console_correlator, stdin, tokio::io::stdout()).await {
                tracing::warn!(error = %e, "console stopped");
            }
        });
    }

    // ── Connectivity lifecycle ───────────────────────────────────
    let grace = config.timings.device_lost_grace;
    let collaborators = Collaborators {
        host: Box::new(system::SystemNetwork),
        prober: Box::new(ping::PingProber::new(&config.timings)),
        presence: Box::new(DevicePath::new(&config.device)),
    };
    let mut manager = ConnectionManager::new(config, correlator, collaborators);
    let states = manager.subscribe();
    let lifecycle = manager.run();
    tokio::pin!(lifecycle);

    // ── Shutdown handling ────────────────────────────────────────
    let pump_result = tokio::select! {
        result = &mut lifecycle => return finish(result),
        result = pump.finished() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
            return Ok(());
        }
    };

    let lost = match pump_result {
        Ok(()) => anyhow::anyhow!("I/O thread stopped"),
        Err(e) => anyhow::Error::new(e),
    };

    let restarting = *states.borrow() == LinkState::RestartWait;
    if restarting {
        tracing::info!("serial link dropped during modem restart, waiting for the modem");
        return finish(lifecycle.await);
    }

    tracing::warn!(error = %lost, grace = ?grace, "serial link lost");
    match tokio::time::timeout(grace, &mut lifecycle).await {
        Ok(result) => finish(result),
        Err(_) => Err(lost.context("modem disappeared")),
    }
}

fn finish(result: Result<Shutdown, ModemError>) -> anyhow::Result<()> {
    match result {
        Ok(Shutdown::DeviceRestarted) => {
            tracing::info!("modem restarted, exiting");
            Ok(())
        }
        Err(e) => Err(anyhow::Error::new(e).context("connectivity lifecycle gave up")),
    }
}
