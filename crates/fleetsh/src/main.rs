//! fleetsh CLI
//!
//! Runs one shell command on many hosts over SSH and prints each host's
//! output as it finishes.

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::Parser;
use color_eyre::Result;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use fleetsh_exec::{Cluster, CredentialSet, Executor, Host, Orchestrator, Outcome};

mod config;
mod logging;
mod render;
mod signals;

use config::Config;
use render::Renderer;

/// Run a command on a cluster of SSH hosts
#[derive(Parser, Debug)]
#[command(name = "fleetsh", version, about, long_about = None)]
struct Cli {
    /// Command to run on every host
    command: String,

    /// Hosts as [user[:password]@]host[:port]
    #[arg(required = true, value_name = "HOST")]
    hosts: Vec<String>,

    /// Config file (defaults to $FLEETSH_CONFIG, ./fleetsh.toml, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds to wait after an interrupt before abandoning hosts
    #[arg(long, value_name = "SECS")]
    grace: Option<u64>,

    /// Cap captured output per host in bytes
    #[arg(long, value_name = "BYTES")]
    max_output: Option<usize>,

    /// Connection timeout in seconds
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// Command-line values override the config file
    fn apply(&self, config: &mut Config) {
        if let Some(secs) = self.grace {
            config.run.grace_period_secs = secs;
        }
        if let Some(bytes) = self.max_output {
            config.run.max_output_bytes = bytes;
        }
        if let Some(secs) = self.connect_timeout {
            config.run.connect_timeout_secs = secs;
        }
    }
}

fn parse_cluster(specs: &[String]) -> std::result::Result<Cluster, String> {
    specs
        .iter()
        .map(|spec| {
            spec.parse::<Host>()
                .map_err(|e| format!("invalid host '{spec}': {e}"))
        })
        .collect()
}

/// Read piped input; an interactive terminal contributes nothing
async fn read_input() -> Vec<u8> {
    if std::io::stdin().is_terminal() {
        return Vec::new();
    }
    let mut input = Vec::new();
    if let Err(e) = tokio::io::stdin().read_to_end(&mut input).await {
        warn!(error = %e, read = input.len(), "failed to read stdin");
    }
    input
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    cli.apply(&mut config);

    logging::init(&config.run.log_level, cli.verbose);

    let cluster = match parse_cluster(&cli.hosts) {
        Ok(cluster) => cluster,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(1);
        }
    };

    let input = read_input().await;
    let mut interrupts = signals::interrupt_requests()?;

    let credentials = CredentialSet::discover();
    info!(hosts = cluster.len(), keys = credentials.len(), "starting run");

    let executor = Executor::ssh(credentials).with_options(config.exec_options());
    let mut renderer = Renderer::new(std::io::stdout().lock());
    let outcome = Orchestrator::new(config.grace_period())
        .execute(
            &executor,
            &cluster,
            &cli.command,
            input,
            &mut interrupts,
            &mut renderer,
        )
        .await;

    if let Outcome::TimedOut { outstanding, .. } | Outcome::Disconnected { outstanding, .. } =
        outcome
    {
        eprintln!("gave up waiting for {outstanding} host(s)");
    }

    Ok(())
}
