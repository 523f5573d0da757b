//! validator-node: runs Sieve validation cycles against a simulated world.
//!
//! - `run`: evaluate peers on the configured interval until Ctrl-C
//! - `replay`: run a fixed number of cycles and print each share table
//! - `config`: print the effective configuration

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, info};

use oracle::WeightSink;
use validator::CycleScheduler;
use validator_node::{build_validator, load_config, replay, JsonLinesSink, World};

#[derive(Parser)]
#[command(name = "validator-node")]
#[command(about = "Samples peer claims, verifies them and scores peers")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "validator.yaml", env = "SIEVE_CONFIG")]
    config: PathBuf,

    /// Where credibility state is loaded from and saved to
    #[arg(short, long, env = "SIEVE_STATE")]
    state: Option<PathBuf>,

    /// Minimum seconds between evaluations of one peer (overrides config)
    #[arg(long, env = "SIEVE_MIN_INTERVAL_SECS")]
    min_interval_secs: Option<u64>,

    /// Samples per peer per cycle (overrides config)
    #[arg(long)]
    samples_per_peer: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run cycles until interrupted
    Run {
        /// World file describing peers and ground truth
        #[arg(short, long)]
        world: PathBuf,

        /// Append each cycle's shares to this JSON-lines file
        #[arg(long)]
        shares_out: Option<PathBuf>,
    },
    /// Run a fixed number of cycles and print the shares
    Replay {
        #[arg(short, long)]
        world: PathBuf,

        #[arg(short = 'n', long, default_value_t = 1)]
        cycles: usize,
    },
    /// Print the effective configuration as YAML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("validator=info".parse()?)
                .add_directive("validator_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = load_config(&cli.config).await?;
    if let Some(secs) = cli.min_interval_secs {
        config.scheduler.min_interval_secs = secs;
    }
    if let Some(samples) = cli.samples_per_peer {
        config.sampling.samples_per_peer = samples;
    }
    config.validate()?;

    match cli.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
        Command::Replay { world, cycles } => {
            let world = World::load(&world).await?;
            let reports = replay(&world, config, cycles, cli.state.as_deref()).await?;
            for report in reports {
                println!("{}", serde_json::to_string(&report.scores.shares())?);
            }
        }
        Command::Run { world, shares_out } => {
            info!(world = %world.display(), "Starting validator-node");
            let world = World::load(&world).await?;
            let sink = shares_out.map(|path| Arc::new(JsonLinesSink::new(path)) as Arc<dyn WeightSink>);
            let validator = build_validator(&world, config, sink, cli.state.as_deref()).await?;

            let mut scheduler = CycleScheduler::new(validator);
            if let Some(path) = &cli.state {
                scheduler = scheduler.with_state_path(path);
            }
            let scheduler = Arc::new(scheduler);
            let shutdown = scheduler.shutdown_handle();

            let running = tokio::spawn({
                let scheduler = Arc::clone(&scheduler);
                async move { scheduler.run().await }
            });

            tokio::signal::ctrl_c().await?;
            info!("Interrupt received, finishing current cycle");
            let _ = shutdown.send(()).await;

            match running.await {
                Ok(Ok(())) => info!("validator-node stopped"),
                Ok(Err(e)) => error!(error = %e, "Scheduler failed"),
                Err(e) => error!(error = %e, "Scheduler task panicked"),
            }
        }
    }

    Ok(())
}
