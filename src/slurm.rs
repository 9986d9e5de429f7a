//! Talking to the Slurm workload manager

/// The queue interface used by the scheduler and the rescue filter
pub mod queue;

/// Render job descriptions into batch scripts
pub mod script;

/// Queue implementation that runs sbatch, squeue and sacct
pub mod command;

#[cfg(test)]
pub mod fake;
