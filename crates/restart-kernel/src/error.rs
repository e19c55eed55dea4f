//! Error kinds surfaced by the restart kernel.
//!
//! Only `WalltimeExceeded` outcomes are locally recoverable (via restart);
//! every kind here bypasses the retry loop and surfaces to the caller.

use thiserror::Error;

use crate::executor::JobHandle;

/// Errors raised by the checkpoint codec, the executor seam and the
/// restart controller.
#[derive(Debug, Error)]
pub enum KernelError {
    /// The checkpoint table cannot produce a valid continuation: empty
    /// table, missing/unparseable step-count parameter, or no steps left.
    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    /// The attempt produced no checkpoint array to restart from.
    #[error("no checkpoint found for attempt {0}")]
    CheckpointNotFound(JobHandle),

    /// Unrecoverable outcome from the external executor. Never retried and
    /// never counted against the retry cap.
    #[error("executor failure: {0}")]
    ExecutorFailure(String),

    /// The run was cancelled before reaching a terminal state.
    #[error("run cancelled")]
    Cancelled,
}
