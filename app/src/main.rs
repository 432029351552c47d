use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use reconcile::cancel::{CancelToken, ProgressSink};
use reconcile::config::Config;
use reconcile::state_paths::StateLayout;

/// Crash-safe directory reconciliation engine.
#[derive(Parser)]
#[command(name = "reconcile", version = env!("CARGO_PKG_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override the default state root (journals/checkpoints/snapshots).
    #[arg(long, global = true)]
    state_root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every job in the config file, or a single named job.
    Run {
        /// Path to the TOML job configuration file.
        #[arg(long)]
        config: PathBuf,
        /// Run only the job with this name.
        #[arg(long)]
        job: Option<String>,
        /// Simulate the run: plan and report what would change, touch nothing.
        #[arg(long)]
        dry_run: bool,
    },
    /// Replay a persisted journal in reverse, undoing its mutations.
    Rollback {
        /// Path to the journal JSON file to roll back.
        journal: PathBuf,
    },
    /// List the jobs defined in a config file without running them.
    ListJobs {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    reconcile::panic_hook::install_panic_hook();
    reconcile::logging::init();

    let cli = Cli::parse();
    let layout = StateLayout::new(cli.state_root.unwrap_or_else(StateLayout::default_root));

    match cli.command {
        Commands::Run { config, job, dry_run } => run_command(&config, job.as_deref(), dry_run, &layout),
        Commands::Rollback { journal } => rollback_command(&journal),
        Commands::ListJobs { config } => list_jobs_command(&config),
    }
}

fn run_command(
    config_path: &PathBuf,
    job_filter: Option<&str>,
    dry_run: bool,
    layout: &StateLayout,
) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let cancel = CancelToken::new();

    let jobs: Vec<_> = config
        .jobs
        .into_iter()
        .filter(|j| match job_filter {
            Some(name) => name == j.name,
            None => true,
        })
        .collect();

    if jobs.is_empty() {
        anyhow::bail!("no matching job in {}", config_path.display());
    }

    for job_config in jobs {
        let mut job = job_config.into_job();
        if dry_run {
            job.dry_run = true;
        }
        tracing::info!(job = %job.name, mode = %job.mode, dry_run = job.dry_run, "starting run");

        let sink: ProgressSink = Arc::new(move |percent, done, total| {
            tracing::info!(percent, done, total, "progress");
        });

        let report = reconcile::orchestrator::run_job(&job, layout, cancel.clone(), sink)?;
        tracing::info!(
            job = %job.name,
            status = ?report.journal_status,
            created = report.stats.created_files,
            replaced = report.stats.replaced_files,
            deleted = report.stats.deleted_files,
            "run finished"
        );
    }

    Ok(())
}

fn rollback_command(journal_path: &PathBuf) -> anyhow::Result<()> {
    let report = reconcile::orchestrator::rollback_journal(journal_path)?;
    tracing::info!(applied = report.applied, skipped = report.skipped_unknown, "rollback complete");
    Ok(())
}

fn list_jobs_command(config_path: &PathBuf) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    for job in &config.jobs {
        println!("{}\t{}\t{} -> {}", job.name, job.mode, job.source.display(), job.destination.display());
    }
    Ok(())
}
