//! Peershare simulator: entry point.
//!
//! Hosts one session and sends a crowd of joiners at it, all over the
//! in-memory transport, while a scripted operator approves or denies each
//! request.  Useful for watching the discovery and handshake logs end to end
//! without a browser.
//!
//! # Usage
//!
//! ```text
//! peershare-sim [OPTIONS]
//!
//! Options:
//!   --joiners <N>        Number of joiners [default: 3]
//!   --pin <PIN>          Host a private session with this PIN
//!   --joiner-pin <PIN>   PIN the joiners type when asked
//!   --deny-every <N>     Deny every N-th request, 0 approves all [default: 0]
//!   --host-name <NAME>   Display name shown in the session list
//!   --base-url <URL>     Base for the share link
//!   --config <PATH>      Configuration file
//!   --init-config        Write the effective configuration back to --config
//! ```
//!
//! Every flag can also be set through the matching `PEERSHARE_SIM_*`
//! variable; flags win when both are present.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use peershare_host::infrastructure::storage::config::{
    default_config_path, load_config, save_config, HostConfig,
};
use peershare_sim::scenario::DEFAULT_BASE_URL;
use peershare_sim::{run_scenario, JoinerOutcome, SimOptions};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Peershare simulator.
#[derive(Debug, Parser)]
#[command(
    name = "peershare-sim",
    about = "Runs a Peershare host and several joiners over an in-memory network",
    version
)]
struct Cli {
    /// How many joiners try to join.
    #[arg(long, default_value_t = 3, env = "PEERSHARE_SIM_JOINERS")]
    joiners: usize,

    /// Host a private session protected by this 4-6 digit PIN.
    #[arg(long, env = "PEERSHARE_SIM_PIN")]
    pin: Option<String>,

    /// PIN the joiners answer with.  Without it they cancel the prompt.
    #[arg(long, env = "PEERSHARE_SIM_JOINER_PIN")]
    joiner_pin: Option<String>,

    /// The operator denies every N-th request.
    #[arg(long, default_value_t = 0, env = "PEERSHARE_SIM_DENY_EVERY")]
    deny_every: usize,

    /// Display name for the hosted session.  Overrides `host.display_name`.
    #[arg(long, env = "PEERSHARE_SIM_HOST_NAME")]
    host_name: Option<String>,

    #[arg(long, default_value = DEFAULT_BASE_URL, env = "PEERSHARE_SIM_BASE_URL")]
    base_url: String,

    /// Configuration file.  Defaults to the platform config directory.
    #[arg(long, env = "PEERSHARE_SIM_CONFIG")]
    config: Option<PathBuf>,

    /// Save the effective configuration to the config path before running.
    #[arg(long)]
    init_config: bool,
}

impl Cli {
    fn config_path(&self) -> Option<PathBuf> {
        self.config
            .clone()
            .or_else(|| default_config_path().ok())
    }

    fn into_options(self) -> SimOptions {
        SimOptions {
            joiners: self.joiners,
            host_pin: self.pin,
            joiner_pin: self.joiner_pin,
            deny_every: self.deny_every,
            host_name: self.host_name,
            base_url: self.base_url,
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config_path();
    let config = match &path {
        Some(path) => load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => HostConfig::default(),
    };

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.host.log_level)),
        )
        .init();

    if cli.init_config {
        match &path {
            Some(path) => {
                save_config(path, &config)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "configuration written");
            }
            None => warn!("no configuration directory on this platform; pass --config"),
        }
    }

    let report = run_scenario(cli.into_options(), &config).await?;

    info!(
        code = %report.code,
        link = %report.share_link,
        listed = report.listed,
        admitted = report.admitted(),
        refused = report.refused(),
        "simulation finished"
    );
    for outcome in &report.outcomes {
        match outcome {
            JoinerOutcome::Admitted { name } => info!("{name}: admitted"),
            JoinerOutcome::Refused { name, reason } => info!("{name}: {reason}"),
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
