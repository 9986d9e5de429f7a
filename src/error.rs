use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unresolved macro `{name}` in {field}")]
    UnresolvedMacro { name: String, field: String },

    #[error("malformed placeholder in {field} ({text:?}): {reason}")]
    MalformedPlaceholder {
        field: String,
        text: String,
        reason: String,
    },

    #[error("malformed job collection: {reason}")]
    MalformedCollection { reason: String },

    #[error("duplicate job name `{0}` in job collection")]
    DuplicateJobName(String),

    #[error("job `{job}` references missing template {}: {reason}", .path.display())]
    MissingTemplate {
        job: String,
        path: PathBuf,
        reason: String,
    },

    #[error("queue query failed: {0}")]
    QueueQuery(String),

    #[error("submission of job `{job}` failed: {detail}")]
    Submission { job: String, detail: String },

    #[error("ledger {}: {reason}", .path.display())]
    LedgerIo { path: PathBuf, reason: String },
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedCollection {
            reason: reason.into(),
        }
    }

    pub(crate) fn ledger_io(path: &std::path::Path, reason: impl ToString) -> Self {
        Error::LedgerIo {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A submission run that stopped on a fatal error.
///
/// Carries every job that the queue accepted before the failure so the caller can still
/// persist them.
#[derive(Debug, Error)]
#[error("submission aborted after {} accepted job(s): {error}", .ledger.len())]
pub struct RunAborted {
    pub ledger: crate::ledger::Ledger,
    #[source]
    pub error: Error,
}
