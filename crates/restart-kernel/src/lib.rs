//! Restart Kernel: walltime-bounded execution of checkpoint-capable jobs.
//!
//! Long-running simulation jobs are killed by the scheduler when they hit
//! their wall-clock budget. This crate owns the logic that keeps such a job
//! moving: classify the outcome of each attempt, rebuild a continuation job
//! from the last saved checkpoint, grow the walltime budget, and resubmit
//! until the job finishes or the retry cap is exhausted.
//!
//! The crate deliberately does not execute anything itself. Submission,
//! outcome classification and checkpoint retrieval go through the
//! [`JobExecutor`] seam.

pub mod checkpoint;
pub mod controller;
pub mod error;
pub mod executor;
pub mod jobspec;

pub use checkpoint::{build_continuation, CheckpointRecord, CheckpointTable, Continuation};
pub use controller::{
    FinalStatus, OutputPolicy, RestartConfig, RestartController, RestartReport,
};
pub use error::KernelError;
pub use executor::{JobExecutor, JobHandle, RunOutcome};
pub use jobspec::{JobSpec, ParamBlock, Resources, Section, SectionContent};
