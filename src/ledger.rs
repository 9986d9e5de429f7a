//! Record of submitted jobs: job name -> Slurm job ID
//!
//! The same file format is used for the output of a submission run and for rescue files,
//! a pretty printed JSON object sorted by job name:
//!
//! ```json
//! {
//!   "job_0": 4242001,
//!   "job_1": 4242002
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::slurm::queue::JobId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Ledger {
    jobs: BTreeMap<String, JobId>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an accepted job, replacing an earlier ID for the same name
    pub fn record(&mut self, name: String, id: JobId) {
        self.jobs.insert(name, id);
    }

    pub fn get(&self, name: &str) -> Option<JobId> {
        self.jobs.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobId)> {
        self.jobs.iter()
    }

    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Write the ledger to `path`
    ///
    /// The file is written next to its destination first and then renamed into place, so an
    /// interrupted save never leaves a truncated ledger behind.
    pub fn save(&self, path: &Path) -> Result<()> {
        info!("Writing {} job(s) to {}", self.len(), path.display());
        let json = serde_json::to_string_pretty(self).map_err(|err| Error::ledger_io(path, err))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file =
            tempfile::NamedTempFile::new_in(dir).map_err(|err| Error::ledger_io(path, err))?;
        file.write_all(json.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .map_err(|err| Error::ledger_io(path, err))?;
        file.persist(path).map_err(|err| Error::ledger_io(path, err.error))?;
        Ok(())
    }

    /// Read a ledger written by [`Ledger::save`]
    ///
    /// A missing or malformed file is an error; nothing is returned from a file that does
    /// not parse completely.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Reading job ledger {}", path.display());
        let json = fs::read_to_string(path).map_err(|err| Error::ledger_io(path, err))?;
        let ledger: Ledger =
            serde_json::from_str(&json).map_err(|err| Error::ledger_io(path, err))?;
        info!("Ledger holds {} job(s)", ledger.len());
        Ok(ledger)
    }
}

impl FromIterator<(String, JobId)> for Ledger {
    fn from_iter<T: IntoIterator<Item = (String, JobId)>>(iter: T) -> Self {
        Ledger {
            jobs: iter.into_iter().collect(),
        }
    }
}
