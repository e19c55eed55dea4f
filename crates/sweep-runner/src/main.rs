//! Sweep Runner CLI.
//!
//! Commands:
//! - expand: expand a sweep file into its combinations and tags
//! - plan: print the per-combination job specs a sweep would submit
//! - simulate: run a sweep end to end against the scripted executor

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use restart_kernel::{JobSpec, OutputPolicy, RestartConfig};
use sweep_runner::sweep::duplicate_tags;
use sweep_runner::{SimulatedExecutor, SweepOrchestrator, SweepSpec};

/// Generate a timestamped output path from the given path.
/// e.g., "report.json" -> "report-20260829-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("report");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

fn load_job(path: &Path) -> Result<JobSpec> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("reading job file {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("parsing job file {}", path.display()))
}

#[derive(Parser)]
#[command(name = "sweep-runner")]
#[command(version)]
#[command(about = "Parameter sweeps over restart-controlled simulation jobs")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand a sweep file into its combinations and tags
    Expand {
        /// Sweep specification (JSON)
        sweep: PathBuf,
    },

    /// Print the per-combination job specs a sweep would submit
    Plan {
        /// Job template (JSON)
        job: PathBuf,

        /// Sweep specification (JSON)
        sweep: PathBuf,
    },

    /// Run a sweep against the scripted in-process executor
    Simulate {
        /// Job template (JSON)
        job: PathBuf,

        /// Sweep specification (JSON)
        sweep: PathBuf,

        /// Scripted walltime kills per job before it completes
        #[arg(long, default_value = "2")]
        walltime_hits: u32,

        /// Script an unrecoverable failure for jobs matching key=token
        #[arg(long)]
        fail_param: Option<String>,

        /// Maximum submissions per job before giving up
        #[arg(long, default_value = "3")]
        max_repeat: u32,

        /// Walltime budget of the first attempt, seconds
        #[arg(long, default_value = "3600")]
        init_walltime: u64,

        /// Walltime added on every restart, seconds
        #[arg(long, default_value = "1800")]
        walltime_increase: u64,

        /// Parameter tracking how many steps to run
        #[arg(long, default_value = "nstep")]
        restart_mode_key: String,

        /// Record every attempt handle, not just the final one
        #[arg(long)]
        all_attempts: bool,

        /// Output file for the sweep report
        #[arg(long, default_value = "report.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    match cli.command {
        Commands::Expand { sweep } => {
            let sweep = SweepSpec::load(&sweep)?;
            let combinations = sweep.combinations();

            println!("{} combinations:", combinations.len());
            for combo in &combinations {
                println!("  [{}] {}", combo.index, combo.tag());
            }
            let collisions = duplicate_tags(&combinations);
            if !collisions.is_empty() {
                println!("\nColliding tags (distinct raw values, same display tag):");
                for tag in collisions {
                    println!("  {tag}");
                }
            }
        }

        Commands::Plan { job, sweep } => {
            let template = load_job(&job)?;
            let sweep = SweepSpec::load(&sweep)?;

            for combo in sweep.combinations() {
                let spec = combo.apply_to(&template);
                println!("=== [{}] {} ===", combo.index, combo.tag());
                println!("{}", serde_json::to_string_pretty(&spec)?);
            }
        }

        Commands::Simulate {
            job,
            sweep,
            walltime_hits,
            fail_param,
            max_repeat,
            init_walltime,
            walltime_increase,
            restart_mode_key,
            all_attempts,
            output,
        } => {
            let template = load_job(&job)?;
            let sweep = SweepSpec::load(&sweep)?;

            let mut executor = SimulatedExecutor::new(walltime_hits, restart_mode_key.clone());
            if let Some(fail) = fail_param {
                let (key, token) = fail
                    .split_once('=')
                    .context("--fail-param expects key=token")?;
                executor = executor.fail_when(key, token);
            }

            let config = RestartConfig {
                max_repeat,
                init_walltime_secs: init_walltime,
                walltime_increase_secs: walltime_increase,
                restart_mode_key,
                output_policy: if all_attempts {
                    OutputPolicy::AllAttempts
                } else {
                    OutputPolicy::FinalAttempt
                },
            };

            let executor = Arc::new(executor);
            let orchestrator = SweepOrchestrator::new(executor.clone(), config);
            let report = orchestrator.run(&template, &sweep).await?;

            let output_path = timestamped_path(&output);
            report.save(&output_path)?;

            println!("\n=== Sweep Complete ===");
            println!("Report saved to: {}", output_path.display());
            println!("Submissions: {}", executor.submission_count());
            println!("\nCombinations:");
            for entry in &report.entries {
                println!(
                    "  [{}] {}: {:?} after {} iteration(s), final walltime {}s -> {}",
                    entry.index,
                    entry.tag,
                    entry.status,
                    entry.iterations,
                    entry.walltime_secs,
                    entry.handle
                );
            }
        }
    }

    Ok(())
}
