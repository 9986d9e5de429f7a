use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};
use crate::job::template::JobDescription;
use crate::slurm::queue::{JobId, QueueAdapter, TerminalState};

/// In-memory queue for tests
///
/// `queued_count` answers from a scripted sequence (repeating the last value once the
/// sequence runs out). Every count query starts a new batch in `batches`, which records how
/// many submissions followed it.
#[derive(Default)]
pub struct FakeQueue {
    counts: RefCell<VecDeque<usize>>,
    last_count: Cell<usize>,
    pub batches: RefCell<Vec<usize>>,
    pub submitted: RefCell<Vec<(String, JobId)>>,
    pub partitions: RefCell<Vec<Option<String>>>,
    next_id: Cell<u64>,
    fail_submission_of: Option<String>,
    fail_count_query: Cell<Option<usize>>,
    states: HashMap<JobId, TerminalState>,
}

impl FakeQueue {
    pub fn new() -> Self {
        FakeQueue {
            next_id: Cell::new(1000),
            ..Default::default()
        }
    }

    pub fn with_counts(counts: &[usize]) -> Self {
        let queue = Self::new();
        queue.counts.replace(counts.iter().copied().collect());
        queue
    }

    pub fn failing_submission_of(mut self, name: &str) -> Self {
        self.fail_submission_of = Some(name.to_string());
        self
    }

    /// The n-th count query (starting at 0) fails
    pub fn failing_count_query(self, n: usize) -> Self {
        self.fail_count_query.set(Some(n));
        self
    }

    pub fn with_states(mut self, states: &[(JobId, TerminalState)]) -> Self {
        self.states = states.iter().copied().collect();
        self
    }

    pub fn submitted_names(&self) -> Vec<String> {
        self.submitted
            .borrow()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl QueueAdapter for FakeQueue {
    async fn queued_count(&self, _user: &str, _partition: Option<&str>) -> Result<usize> {
        let query = self.batches.borrow().len();
        if self.fail_count_query.get() == Some(query) {
            return Err(Error::QueueQuery("squeue: error: slurm_load_jobs".to_string()));
        }
        self.batches.borrow_mut().push(0);

        if let Some(count) = self.counts.borrow_mut().pop_front() {
            self.last_count.set(count);
        }
        Ok(self.last_count.get())
    }

    async fn submit_one(
        &self,
        name: &str,
        _job: &JobDescription,
        partition: Option<&str>,
    ) -> Result<JobId> {
        if self.fail_submission_of.as_deref() == Some(name) {
            return Err(Error::Submission {
                job: name.to_string(),
                detail: "sbatch: error: Batch job submission failed".to_string(),
            });
        }

        let id = JobId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.submitted.borrow_mut().push((name.to_string(), id));
        self.partitions
            .borrow_mut()
            .push(partition.map(str::to_string));
        if let Some(batch) = self.batches.borrow_mut().last_mut() {
            *batch += 1;
        }
        Ok(id)
    }

    async fn status_of(&self, ids: &[JobId]) -> Result<HashMap<JobId, TerminalState>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.states.get(id).map(|state| (*id, *state)))
            .collect())
    }
}
