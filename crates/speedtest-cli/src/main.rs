//! Speedtest command-line client
//!
//! - `speedtest run` drives a test run through the orchestrator, renders
//!   every published update and submits the result to the server
//! - `speedtest stats` logs into the server and prints the stats
//! - `--simulate` uses a built-in worker that makes no network traffic

mod config;
mod render;
mod submit;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use speedtest_common::models::TestPhase;
use speedtest_orchestrator::{
    Orchestrator, ProcessWorkerFactory, SimulatedWorkerFactory, TestRun, WorkerFactory,
};

use crate::config::ClientConfig;
use crate::submit::ServerClient;

/// How often the run loop checks that the worker is still alive.
const LIVENESS_CHECK: Duration = Duration::from_secs(1);

/// Speedtest client.
#[derive(Parser, Debug)]
#[command(name = "speedtest", about = "Run speed tests and read their stats")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one speed test.
    Run(RunArgs),
    /// Print the server's stats.
    Stats(StatsArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Use the built-in simulated worker.
    #[arg(long, default_value_t = false, conflicts_with = "worker_cmd")]
    simulate: bool,

    /// Measurement worker command line (program followed by its arguments).
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    worker_cmd: Vec<String>,

    /// Telemetry server base URL.
    #[arg(long)]
    server: Option<String>,

    /// Do not submit the result.
    #[arg(long, default_value_t = false)]
    no_submit: bool,

    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Status poll interval in milliseconds.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Number of samples kept in the run history.
    #[arg(long)]
    history_cap: Option<usize>,
}

#[derive(Args, Debug)]
struct StatsArgs {
    /// Telemetry server base URL.
    #[arg(long, default_value = config::DEFAULT_SERVER)]
    server: String,

    /// Stats password.
    #[arg(long, env = "SPEEDTEST_STATS_PASSWORD")]
    password: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Stats(args) => stats(args).await,
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ClientConfig> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    ClientConfig::from_toml_str(&text).map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    // Flags win over the config file.
    if let Some(server) = args.server {
        config.server = server.trim_end_matches('/').to_string();
    }
    if let Some(ms) = args.poll_interval_ms {
        anyhow::ensure!(ms > 0, "--poll-interval-ms must be greater than zero");
        config.orchestrator.poll_interval = Duration::from_millis(ms);
    }
    if let Some(cap) = args.history_cap {
        config.orchestrator.history_cap = cap.max(1);
    }
    if args.simulate {
        config.worker_cmd.clear();
    } else if !args.worker_cmd.is_empty() {
        config.worker_cmd = args.worker_cmd;
    }

    let factory: Arc<dyn WorkerFactory> = if config.worker_cmd.is_empty() {
        tracing::info!("using simulated measurement worker");
        Arc::new(SimulatedWorkerFactory::default())
    } else {
        tracing::info!(command = ?config.worker_cmd, "using external measurement worker");
        Arc::new(ProcessWorkerFactory::from_command_line(&config.worker_cmd)?)
    };

    let mut orchestrator = Orchestrator::new(factory, config.orchestrator.clone());
    let mut updates = orchestrator.subscribe();
    let run_id = orchestrator.start()?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut liveness = tokio::time::interval(LIVENESS_CHECK);

    let last: TestRun = loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("received SIGINT, aborting test");
                orchestrator.abort();
                println!("Test aborted.");
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break updates.borrow().clone();
                }
                let run = updates.borrow_and_update().clone();
                println!("{}", render::status_line(&run));
                if run.phase.is_terminal() {
                    break run;
                }
            }
            _ = liveness.tick() => {
                if !orchestrator.is_active() {
                    let run = orchestrator.snapshot();
                    if !run.phase.is_terminal() {
                        tracing::warn!(phase = %run.phase, "measurement worker stopped before finishing");
                    }
                    break run;
                }
            }
        }
    };

    match last.phase {
        TestPhase::Finished => {}
        TestPhase::Aborted => {
            println!("Test aborted by the worker.");
            return Ok(());
        }
        phase => anyhow::bail!("test ended unexpectedly in phase {phase}"),
    }

    println!("{}", render::summary(&last));

    if args.no_submit {
        return Ok(());
    }
    if !config.telemetry_enabled() {
        tracing::info!("telemetry disabled, result not submitted");
        return Ok(());
    }

    let client = ServerClient::new(&config.server);
    match client.submit(&submit::submission(&last, &run_id)).await {
        Ok(id) => println!("Result id: {id}"),
        Err(e) => tracing::warn!(server = %config.server, "could not submit result: {e:#}"),
    }
    Ok(())
}

async fn stats(args: StatsArgs) -> anyhow::Result<()> {
    let client = ServerClient::new(&args.server);
    let Some(token) = client.login(&args.password).await? else {
        println!("Login denied: invalid password.");
        return Ok(());
    };
    let stats = client.stats(&token).await?;
    println!("{}", render::stats_report(&stats));
    Ok(())
}
