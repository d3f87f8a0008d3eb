//! Reina - review apps for pull requests
//!
//! The `reina` command provisions one Heroku app per configured project for a
//! pull request:
//!
//! ```text
//! reina <PR_NUMBER> [KEY#BRANCH ...]
//! ```
//!
//! Apps are named `{prefix}{key}-{pr}`. Apps left over from a previous run
//! are deleted after an interactive confirmation. The command exits non-zero
//! only when the run cannot start; individual project failures are reported
//! and the run carries on.

mod prompt;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use heroku_platform::HerokuPlatform;
use reina_core::{
    parse_branch_overrides, ExecutionOutcome, FsManifestReader, GitCli, Orchestrator,
    ReinaConfig, RunReport,
};
use tracing::{info, Level};

use crate::prompt::TerminalConfirm;

#[derive(Parser)]
#[command(name = "reina")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision review apps for a pull request", long_about = None)]
struct Cli {
    /// Pull request number
    #[arg(allow_negative_numbers = true)]
    pr_number: i64,

    /// Branch overrides, e.g. `api#feature/login`
    #[arg(value_name = "KEY#BRANCH")]
    branches: Vec<String>,

    /// Configuration file
    #[arg(short, long, env = "REINA_CONFIG", default_value = "reina.toml")]
    config: PathBuf,

    /// Maximum number of parallel jobs (overrides the config file)
    #[arg(long)]
    concurrency: Option<usize>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines and print the run report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    reina_core::init_tracing(cli.json, level);

    let mut config = ReinaConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
        config.validate()?;
    }

    let token = config.platform_token()?;
    let overrides = parse_branch_overrides(&cli.branches)?;

    let platform =
        HerokuPlatform::from_token(&token).context("Failed to create Platform API client")?;

    let orchestrator = Orchestrator::new(
        Arc::new(config),
        Arc::new(platform),
        Arc::new(GitCli),
        Arc::new(FsManifestReader),
        Arc::new(TerminalConfirm),
    );

    info!(pr = cli.pr_number, "starting run");
    let report = orchestrator.run(cli.pr_number, &overrides).await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    Ok(())
}

fn print_summary(report: &RunReport) {
    println!();
    for outcome in &report.outcomes {
        match &outcome.outcome {
            ExecutionOutcome::Succeeded => {
                println!("  ok      {} ({}ms)", outcome.app_name, outcome.duration_ms);
            }
            ExecutionOutcome::Failed { step, message } => {
                let step = step.map(|s| s.name()).unwrap_or("job");
                println!("  FAILED  {} at {step}: {message}", outcome.app_name);
            }
        }
    }
    println!(
        "\n{} succeeded, {} failed",
        report.succeeded_count(),
        report.failed_count()
    );
}
