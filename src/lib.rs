//! Throttled submission of templated batch jobs to Slurm
//!
//! A job collection names a set of jobs, each a job template plus the macros that fill its
//! placeholders. Every job is expanded up front, then submitted without ever letting the
//! user's queue grow past a configured size. The accepted jobs are recorded in a ledger,
//! which is later checked for failed jobs so that only those are submitted again.

pub mod error;
pub mod job;
pub mod ledger;
pub mod slurm;
pub mod submit;
