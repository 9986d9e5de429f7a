use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use log::{info, warn};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use slurm_throttle::job::collection::JobCollection;
use slurm_throttle::ledger::Ledger;
use slurm_throttle::slurm::command::SlurmQueue;
use slurm_throttle::slurm::script;
use slurm_throttle::submit;
use slurm_throttle::submit::scheduler::{Scheduler, SchedulerConfig};

#[derive(Parser, Debug)]
#[command(name = "slurm-throttle")]
#[command(version = "0.1")]
#[command(about = "Submit templated batch jobs to Slurm without flooding the queue")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Submit every job of a collection, keeping the queue below --max-queued
    Submit {
        /// Job collection (JSON)
        #[arg(long = "in")]
        input: PathBuf,
        /// Ledger of submitted jobs to write
        #[arg(long)]
        out: PathBuf,
        /// Only submit the jobs named in this rescue file
        #[arg(long)]
        rescue: Option<PathBuf>,
        /// Maximum number of your jobs in the queue at any time
        #[arg(long, default_value_t = SchedulerConfig::DEFAULT_MAX_QUEUED)]
        max_queued: usize,
        /// Seconds to wait before checking a full queue again
        #[arg(long, default_value_t = SchedulerConfig::DEFAULT_WAIT.as_secs())]
        wait: u64,
        #[arg(long)]
        partition: Option<String>,
        /// Owner of the queued jobs
        #[arg(long, env = "USER")]
        user: String,
    },
    /// Write the failed jobs of a ledger to a rescue file
    Rescue {
        /// Ledger written by `submit`
        #[arg(long = "in")]
        input: PathBuf,
        /// Rescue file to write
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the batch script of one job without submitting it
    Render {
        /// Job collection (JSON)
        #[arg(long = "in")]
        input: PathBuf,
        #[arg(long)]
        job: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::init();
    info!("terve! starting up :)");

    let args = Args::parse();
    match args.command {
        Commands::Submit {
            input,
            out,
            rescue,
            max_queued,
            wait,
            partition,
            user,
        } => {
            let config = SchedulerConfig {
                max_queued,
                wait: Duration::from_secs(wait),
                partition,
                user,
            };
            submit_collection(&input, &out, rescue.as_deref(), config).await
        }
        Commands::Rescue { input, out } => {
            let ledger = Ledger::load(&input)?;
            let report = submit::rescue::rescue(&SlurmQueue::default(), &ledger).await?;
            report.failed.save(&out)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Render { input, job } => {
            let collection = JobCollection::load(&input)?;
            let resolved = collection.resolve(base_dir(&input))?;
            let entry = resolved
                .get(job.as_str())
                .with_context(|| format!("no job `{job}` in {}", input.display()))?;
            let description = entry.template.expand(entry.macros)?;
            let script = script::render(&job, &description)
                .with_context(|| format!("rendering batch script of job `{job}`"))?;
            print!("{}", script.content);
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn submit_collection(
    input: &Path,
    out: &Path,
    rescue: Option<&Path>,
    config: SchedulerConfig,
) -> anyhow::Result<ExitCode> {
    let collection = JobCollection::load(input)?;
    let rescue = rescue
        .map(Ledger::load)
        .transpose()
        .context("reading rescue file")?;
    let jobs = submit::prepare(collection, base_dir(input), rescue.as_ref())?;

    let cancel = install_shutdown_handler().context("installing signal handlers")?;
    let queue = SlurmQueue::default();
    let scheduler = Scheduler::new(&queue, config);

    match scheduler.run(jobs, &cancel).await {
        Ok(report) => {
            report.ledger.save(out)?;
            if report.cancelled {
                warn!(
                    "Interrupted, {} submitted job(s) written to {}",
                    report.ledger.len(),
                    out.display()
                );
                return Ok(ExitCode::FAILURE);
            }
            info!(
                "Submitted {} job(s) in {} batch(es), waited {} time(s)",
                report.ledger.len(),
                report.batches,
                report.suspensions
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(aborted) => {
            aborted
                .ledger
                .save(out)
                .context("saving the partial ledger")?;
            Err(anyhow!(aborted))
        }
    }
}

/// Template references in a collection are relative to the collection file
fn base_dir(collection: &Path) -> &Path {
    collection
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
}

/// Cancel the returned token on SIGTERM or SIGINT
fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, stopping after the current submission"),
            _ = sigint.recv() => info!("Received SIGINT, stopping after the current submission"),
        }
        trigger.cancel();
    });

    Ok(token)
}
