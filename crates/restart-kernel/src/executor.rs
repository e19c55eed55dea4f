//! The seam to whatever actually runs jobs.
//!
//! The kernel never launches a simulation binary itself. An implementation
//! of [`JobExecutor`] owns submission, outcome classification and
//! checkpoint retrieval; the controller only consumes the results.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checkpoint::CheckpointTable;
use crate::error::KernelError;
use crate::jobspec::JobSpec;

/// Opaque identifier for one submitted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(Uuid);

impl JobHandle {
    /// Mint a fresh handle.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Classified result of one execution attempt.
///
/// Classification rule (owned by the executor): an attempt is `Completed`
/// when the designated success marker appears in the job log,
/// `WalltimeExceeded` when the walltime exit signal was raised instead,
/// and `Failed` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    /// The simulation ran to completion
    Completed,
    /// Killed by the wall-clock budget; a checkpoint should be available
    WalltimeExceeded,
    /// Unrecoverable failure; the controller treats this as fatal
    Failed { reason: String },
}

/// External job executor and outcome classifier.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Submit a job for execution. Returns immediately with a handle.
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, KernelError>;

    /// Wait for an attempt to terminate and classify its outcome. This is
    /// the controller's only suspension point.
    async fn wait(&self, handle: &JobHandle) -> Result<RunOutcome, KernelError>;

    /// Fetch the most recent partial-state table saved by an attempt.
    ///
    /// Fails with [`KernelError::CheckpointNotFound`] when the attempt
    /// produced no checkpoint array.
    async fn fetch_checkpoint(&self, handle: &JobHandle) -> Result<CheckpointTable, KernelError>;
}
