use std::collections::HashMap;

use log::{info, warn};

use crate::error::Result;
use crate::ledger::Ledger;
use crate::slurm::queue::{JobId, QueueAdapter, TerminalState};

/// Outcome of checking a ledger for failed jobs
#[derive(Debug, Default, PartialEq)]
pub struct RescueReport {
    /// Jobs that ended in a failed state, to be submitted again
    pub failed: Ledger,
    /// Jobs without a terminal state yet; they are neither rescued nor counted as done
    pub pending: Vec<String>,
}

/// Ask the queue about every job in `ledger` and collect the failed ones
///
/// Rescue only makes sense once all jobs have left the queue. Jobs that are still pending
/// or running are reported in [`RescueReport::pending`] and logged as a warning.
pub async fn rescue<Q: QueueAdapter>(queue: &Q, ledger: &Ledger) -> Result<RescueReport> {
    info!("Checking the state of {} job(s)", ledger.len());
    let states = queue.status_of(&ledger.ids()).await?;
    let report = filter_failed(ledger, &states);

    if !report.pending.is_empty() {
        warn!(
            "{} job(s) have not finished yet and are left out of the rescue: {}",
            report.pending.len(),
            report.pending.join(", ")
        );
    }
    info!("{} of {} job(s) failed", report.failed.len(), ledger.len());
    Ok(report)
}

/// Split a ledger by a snapshot of job states
pub fn filter_failed(ledger: &Ledger, states: &HashMap<JobId, TerminalState>) -> RescueReport {
    let mut report = RescueReport::default();
    for (name, id) in ledger.iter() {
        match states.get(id) {
            Some(TerminalState::Failed) => report.failed.record(name.clone(), *id),
            Some(TerminalState::CompletedOk) => {}
            None => report.pending.push(name.clone()),
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::slurm::fake::FakeQueue;

    fn ledger() -> Ledger {
        [
            ("A".to_string(), JobId(1)),
            ("B".to_string(), JobId(2)),
            ("C".to_string(), JobId(3)),
        ]
        .into_iter()
        .collect()
    }

    #[tokio::test]
    async fn test_only_failed_jobs_are_rescued() {
        let queue = FakeQueue::new().with_states(&[
            (JobId(1), TerminalState::Failed),
            (JobId(2), TerminalState::CompletedOk),
        ]);

        let report = rescue(&queue, &ledger()).await.unwrap();

        let expected: Ledger = [("A".to_string(), JobId(1))].into_iter().collect();
        assert_eq!(report.failed, expected);
        assert_eq!(report.pending, ["C"]);
    }

    #[test]
    fn test_filter_is_deterministic() {
        let states: HashMap<JobId, TerminalState> = [
            (JobId(1), TerminalState::Failed),
            (JobId(3), TerminalState::Failed),
            (JobId(9), TerminalState::Failed),
        ]
        .into_iter()
        .collect();

        let first = filter_failed(&ledger(), &states);
        assert_eq!(first, filter_failed(&ledger(), &states));
        assert_eq!(first.failed.len(), 2);
        assert!(first.failed.contains("A") && first.failed.contains("C"));
        assert_eq!(first.pending, ["B"]);
    }

    #[test]
    fn test_empty_ledger() {
        let report = filter_failed(&Ledger::new(), &HashMap::new());
        assert!(report.failed.is_empty());
        assert!(report.pending.is_empty());
    }

    #[tokio::test]
    async fn test_query_failure_is_reported() {
        struct Broken;

        impl QueueAdapter for Broken {
            async fn queued_count(&self, _: &str, _: Option<&str>) -> Result<usize> {
                Ok(0)
            }
            async fn submit_one(
                &self,
                name: &str,
                _: &crate::job::template::JobDescription,
                _: Option<&str>,
            ) -> Result<JobId> {
                Err(Error::Submission {
                    job: name.to_string(),
                    detail: "unused".to_string(),
                })
            }
            async fn status_of(&self, _: &[JobId]) -> Result<HashMap<JobId, TerminalState>> {
                Err(Error::QueueQuery("sacct: error: slurmdbd unavailable".to_string()))
            }
        }

        assert!(matches!(
            rescue(&Broken, &ledger()).await,
            Err(Error::QueueQuery(_))
        ));
    }
}
