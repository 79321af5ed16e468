use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use loading_cache::metrics;

mod config;
mod logging;
mod stresstest;
mod workloads;

use config::Config;
use stresstest::perform_stresstest;
use workloads::WorkloadsConfig;

/// Command line interface parser.
#[derive(Parser)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        logging::ensure_log_error(&error);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // parse configs
    let workloads_file =
        std::fs::File::open(cli.workloads).context("failed to open workloads file")?;
    let workloads: WorkloadsConfig =
        serde_yaml::from_reader(workloads_file).context("failed to parse workloads YAML")?;

    let config = Config::get(cli.config.as_deref())?;

    logging::init_logging(&config);

    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd,
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    tracing::info!(
        workloads = workloads.workloads.len(),
        duration = ?cli.duration,
        "Starting stresstest"
    );

    perform_stresstest(config.cache, workloads, cli.duration).await
}
