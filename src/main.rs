//! Command-line interface for dbtester
//!
//! # Usage Examples
//!
//! ```bash
//! # Check a test configuration
//! dbtester validate --config dbtester.yaml
//!
//! # Print the requests each agent would receive for `start`
//! dbtester requests --config dbtester.yaml --operation start
//!
//! # Send `stop` to every agent of every configured database
//! dbtester agents stop --config dbtester.yaml
//!
//! # Run the enabled steps for one database without contacting its agents
//! dbtester stress --config dbtester.yaml --database etcd-v3-3 --dry-run
//!
//! # Same, speaking the etcd v2 protocol
//! dbtester stress --config dbtester.yaml --database etcd-v3-3 --protocol etcdv2 --dry-run
//! ```
//!
//! Set `RUST_LOG=info` to see progress logs.

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use dbtester_control::{
    send_request, Config, HttpAgentBroadcaster, LogOnlyBroadcaster, PhaseTarget,
};
use dbtester_core::{AgentOperation, BackendKind, DatabaseId};
use dbtester_stress::{AgentBroadcaster, ConnectionProvider, MemoryProvider};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "dbtester")]
#[command(about = "Distributed benchmark harness for etcd, ZooKeeper and Consul")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a test configuration
    Validate {
        /// Path to the YAML configuration
        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Print the agent requests derived from a configuration as JSON
    Requests {
        #[arg(long, value_name = "FILE")]
        config: PathBuf,

        #[arg(long, value_enum, default_value = "start")]
        operation: OperationArg,
    },

    /// Send an operation to every agent of every configured database
    Agents {
        #[arg(value_enum)]
        operation: OperationArg,

        #[arg(long, value_name = "FILE")]
        config: PathBuf,
    },

    /// Run the enabled benchmark steps for one database
    Stress(StressArgs),
}

#[derive(Args)]
struct StressArgs {
    #[arg(long, value_name = "FILE")]
    config: PathBuf,

    /// Database identity, e.g. etcd-v3-3 or zookeeper-r3-5-3-beta
    #[arg(long)]
    database: DatabaseId,

    /// Client protocol (etcdv2, etcdv3, zk, consul); defaults to the database's own
    #[arg(long)]
    protocol: Option<BackendKind>,

    /// Log agent operations instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Simulated latency per request of the in-process key space, in milliseconds
    #[arg(long, default_value = "0")]
    latency_ms: u64,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OperationArg {
    Start,
    Stop,
    Heartbeat,
}

impl From<OperationArg> for AgentOperation {
    fn from(op: OperationArg) -> Self {
        match op {
            OperationArg::Start => AgentOperation::Start,
            OperationArg::Stop => AgentOperation::Stop,
            OperationArg::Heartbeat => AgentOperation::Heartbeat,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { config } => {
            let cfg = load_config(&config)?;
            println!(
                "{}: {} database(s) configured",
                cfg.test_title,
                cfg.databases.len()
            );
            for (id, group) in &cfg.databases {
                println!(
                    "  {id} ({}): {} on {:?}",
                    group.database_tag, group.options.bench_type, group.database_endpoints
                );
            }
        }
        Commands::Requests { config, operation } => {
            let cfg = load_config(&config)?;
            let requests = cfg.requests_for(operation.into())?;
            println!("{}", serde_json::to_string_pretty(&requests)?);
        }
        Commands::Agents { operation, config } => {
            let cfg = load_config(&config)?;
            send_to_all_agents(&cfg, operation.into()).await?;
        }
        Commands::Stress(args) => run_stress(args).await?,
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::read(path).with_context(|| format!("Failed to load configuration from {path:?}"))
}

async fn send_to_all_agents(cfg: &Config, operation: AgentOperation) -> anyhow::Result<()> {
    for (id, group) in &cfg.databases {
        for (idx, endpoint) in group.agent_endpoints.iter().enumerate() {
            let req = cfg.to_request(*id, operation, idx)?;
            send_request(endpoint, &req)
                .await
                .with_context(|| format!("Failed to send {operation} to {id} agent {endpoint}"))?;
            info!("sent {} to {} agent {}", operation, id, endpoint);
        }
    }
    Ok(())
}

async fn run_stress(args: StressArgs) -> anyhow::Result<()> {
    let cfg = Arc::new(load_config(&args.config)?);
    let target = PhaseTarget::new(&cfg, args.database, args.protocol)?;

    let mut memory = MemoryProvider::new();
    if args.latency_ms > 0 {
        memory = memory.with_latency(Duration::from_millis(args.latency_ms));
    }
    let provider: Arc<dyn ConnectionProvider> = Arc::new(memory);

    let broadcaster: Box<dyn AgentBroadcaster> = if args.dry_run {
        Box::new(LogOnlyBroadcaster)
    } else {
        Box::new(HttpAgentBroadcaster::new(cfg.clone(), args.database))
    };

    let progress = progress_bar(target.options.request_number);
    let stats = dbtester_control::run_steps(
        &target,
        &cfg.client,
        provider,
        broadcaster.as_ref(),
        progress.clone(),
    )
    .await?;
    progress.finish_and_clear();

    if let Some(stats) = stats {
        println!("{}", dbtester_control::format_summary(&stats));
    }
    Ok(())
}

fn progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec})",
    ) {
        bar.set_style(style);
    }
    bar
}
