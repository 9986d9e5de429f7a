//! Submission runs: throttled submission of a job collection and rescue of failed jobs

use std::collections::BTreeMap;
use std::path::Path;

use log::info;

use crate::error::Result;
use crate::job::collection::JobCollection;
use crate::job::template::JobDescription;
use crate::ledger::Ledger;

/// Keep the queue below a maximum number of jobs while submitting
pub mod scheduler;

/// Find the failed jobs of an earlier run
pub mod rescue;

/// Turn a collection into the jobs a run will submit
///
/// With a rescue ledger only the jobs named in it are kept. Every remaining job is expanded
/// before anything is submitted, so a broken template or a missing macro stops the run with
/// zero jobs in the queue.
pub fn prepare(
    mut collection: JobCollection,
    base_dir: &Path,
    rescue: Option<&Ledger>,
) -> Result<BTreeMap<String, JobDescription>> {
    if let Some(rescue) = rescue {
        collection.retain_rescued(rescue);
    }
    let jobs = collection.expand(base_dir)?;
    info!("Expanded {} job(s)", jobs.len());
    Ok(jobs)
}
