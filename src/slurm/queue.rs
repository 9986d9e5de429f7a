use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::job::template::JobDescription;

/// Job ID handed out by the queue on submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final state of a job that left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    CompletedOk,
    Failed,
}

/// A batch queue that jobs are submitted into.
///
/// The scheduler and the rescue filter only talk to the queue through this trait, so tests
/// can swap the Slurm commands for an in-memory queue.
#[allow(async_fn_in_trait)]
pub trait QueueAdapter {
    /// Number of jobs `user` currently has queued or running, optionally in one partition.
    /// Zero jobs is not an error.
    async fn queued_count(&self, user: &str, partition: Option<&str>) -> Result<usize>;

    /// Submit one job and return the ID the queue assigned to it.
    async fn submit_one(
        &self,
        name: &str,
        job: &JobDescription,
        partition: Option<&str>,
    ) -> Result<JobId>;

    /// Terminal states of the given jobs. Jobs that are still pending or running are left
    /// out of the result.
    async fn status_of(&self, ids: &[JobId]) -> Result<HashMap<JobId, TerminalState>>;
}
