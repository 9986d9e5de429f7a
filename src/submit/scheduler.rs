use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::RunAborted;
use crate::job::template::JobDescription;
use crate::ledger::Ledger;
use crate::slurm::queue::QueueAdapter;

/// Settings of a submission run
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of jobs the user may have queued at once. Zero submits nothing.
    pub max_queued: usize,
    /// Pause between checks of a full queue
    pub wait: Duration,
    pub partition: Option<String>,
    /// Owner of the queued jobs that count towards `max_queued`
    pub user: String,
}

impl SchedulerConfig {
    pub const DEFAULT_MAX_QUEUED: usize = 1000;
    pub const DEFAULT_WAIT: Duration = Duration::from_secs(120);

    pub fn new(user: impl Into<String>) -> Self {
        SchedulerConfig {
            max_queued: Self::DEFAULT_MAX_QUEUED,
            wait: Self::DEFAULT_WAIT,
            partition: None,
            user: user.into(),
        }
    }
}

/// Result of a submission run that was not aborted by an error
#[derive(Debug, Default)]
pub struct SubmissionReport {
    /// Every job the queue accepted
    pub ledger: Ledger,
    /// Number of headroom checks that submitted at least one job
    pub batches: usize,
    /// Number of times the run waited for the queue to drain
    pub suspensions: usize,
    /// The run was stopped by its cancellation token before all jobs were submitted
    pub cancelled: bool,
}

/// Throttled submission of a set of jobs
///
/// The scheduler keeps the number of the user's queued jobs at or below `max_queued`:
/// it asks the queue how many jobs are queued, submits as many jobs as there is room for,
/// and asks again. When there is no room it waits for `config.wait` before the next check.
pub struct Scheduler<'a, Q> {
    queue: &'a Q,
    config: SchedulerConfig,
}

impl<'a, Q: QueueAdapter> Scheduler<'a, Q> {
    pub fn new(queue: &'a Q, config: SchedulerConfig) -> Self {
        Scheduler { queue, config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Submit every job, blocking until all of them are in the queue
    ///
    /// Submitted jobs are moved from the pending set into the ledger one at a time. A failed
    /// queue query or submission stops the run; the error carries the ledger of the jobs
    /// accepted so far. Cancellation is checked before every headroom check and wakes up a
    /// pending wait, but never interrupts a submission.
    pub async fn run(
        &self,
        jobs: BTreeMap<String, JobDescription>,
        cancel: &CancellationToken,
    ) -> Result<SubmissionReport, RunAborted> {
        let partition = self.config.partition.as_deref();
        let mut remaining = jobs;
        let mut report = SubmissionReport::default();

        info!(
            "Submitting {} job(s) with at most {} queued job(s) for user {}",
            remaining.len(),
            self.config.max_queued,
            self.config.user
        );

        while !remaining.is_empty() {
            if cancel.is_cancelled() {
                warn!("Submission cancelled with {} job(s) left", remaining.len());
                report.cancelled = true;
                break;
            }

            let queued = match self.queue.queued_count(&self.config.user, partition).await {
                Ok(queued) => queued,
                Err(error) => return Err(abort(report, error)),
            };
            let admissible = self
                .config
                .max_queued
                .saturating_sub(queued)
                .min(remaining.len());

            if admissible > 0 {
                report.batches += 1;
                info!(
                    "Batch {}: {queued} job(s) queued, submitting {admissible} of {} remaining",
                    report.batches,
                    remaining.len()
                );
                for _ in 0..admissible {
                    let Some((name, job)) = remaining.pop_first() else {
                        break;
                    };
                    match self.queue.submit_one(&name, &job, partition).await {
                        Ok(id) => report.ledger.record(name, id),
                        Err(error) => return Err(abort(report, error)),
                    }
                }
                continue;
            }

            debug!(
                "{queued} job(s) queued, no room for more; checking again in {:?}",
                self.config.wait
            );
            report.suspensions += 1;
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.wait) => {}
            }
        }

        info!(
            "Submitted {} job(s) in {} batch(es)",
            report.ledger.len(),
            report.batches
        );
        Ok(report)
    }
}

fn abort(report: SubmissionReport, error: crate::error::Error) -> RunAborted {
    warn!(
        "Submission aborted after {} accepted job(s): {error}",
        report.ledger.len()
    );
    RunAborted {
        ledger: report.ledger,
        error,
    }
}
