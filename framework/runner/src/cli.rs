use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use gust_plan::prelude::TestPlan;

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct GustCli {
    /// Path to the compiled plan (JSON)
    #[clap(short, long)]
    pub plan: PathBuf,

    /// The number of seconds to run for. Without a duration the run continues until stopped.
    #[clap(long)]
    pub duration: Option<u64>,

    /// Coordinator tick interval in milliseconds
    #[clap(long, default_value = "1000")]
    pub tick_interval_ms: u64,

    /// Upper bound on the overall spawn rate, users per second
    #[clap(long, default_value = "100")]
    pub max_spawn_rate: f64,

    /// Identifier for this worker, reported to the control plane
    #[clap(long, default_value = "worker-0")]
    pub worker_id: String,

    /// Seed for think-time and random-row sampling, for reproducible runs
    #[clap(long)]
    pub seed: Option<u64>,

    /// Do not show a progress bar on the CLI.
    ///
    /// Recommended for CI environments where the bar is just noise in the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,
}

/// Initialise logging and parse the command line.
pub fn init() -> GustCli {
    env_logger::init();

    GustCli::parse()
}

/// Loads and deserializes a compiled plan. Configuration-integrity problems surface here, at
/// startup, which is the only point where an error is allowed to stop the process.
pub fn load_plan(path: &Path) -> anyhow::Result<TestPlan> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file {}", path.display()))?;
    let plan: TestPlan = serde_json::from_str(&raw)
        .with_context(|| format!("Plan file {} is not a valid compiled plan", path.display()))?;
    anyhow::ensure!(
        !plan.scenarios.is_empty(),
        "Plan {} defines no scenarios",
        plan.name
    );
    Ok(plan)
}
