//! A scripted in-process executor.
//!
//! Stands in for the real cluster executor in the `simulate` CLI command
//! and the integration tests: each job lineage hits the walltime a
//! configured number of times (handing back a synthesized checkpoint
//! table each time) before completing, and selected parameter values can
//! be scripted to fail outright. Every submission is recorded for
//! inspection.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use restart_kernel::checkpoint::RESTART_FILE_KEY;
use restart_kernel::{
    CheckpointRecord, CheckpointTable, JobExecutor, JobHandle, JobSpec, KernelError, RunOutcome,
};

struct JobRecord {
    outcome: RunOutcome,
    checkpoint: Option<CheckpointTable>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobHandle, JobRecord>,
    submissions: Vec<JobSpec>,
}

/// Deterministic executor replaying a simple script.
pub struct SimulatedExecutor {
    /// Walltime kills per job lineage before it completes
    walltime_hits: u32,
    /// Parameter tracking the step count (read to synthesize checkpoints)
    step_key: String,
    /// Fail any job whose parameter `key` has first token `token`
    fail_when: Option<(String, String)>,
    inner: Mutex<Inner>,
}

impl SimulatedExecutor {
    pub fn new(walltime_hits: u32, step_key: impl Into<String>) -> Self {
        Self {
            walltime_hits,
            step_key: step_key.into(),
            fail_when: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Script an unrecoverable failure for jobs whose parameter `key` has
    /// first token `token`.
    pub fn fail_when(mut self, key: impl Into<String>, token: impl Into<String>) -> Self {
        self.fail_when = Some((key.into(), token.into()));
        self
    }

    /// Every spec submitted so far, in submission order.
    pub fn submissions(&self) -> Vec<JobSpec> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn submission_count(&self) -> usize {
        self.inner.lock().unwrap().submissions.len()
    }
}

/// Which restart of its lineage a spec is: 0 for a fresh submission,
/// k + 1 for a continuation carrying payload `walltime_restart_<k>`.
fn attempt_index(spec: &JobSpec) -> u32 {
    spec.params()
        .and_then(|p| p.first_token(RESTART_FILE_KEY))
        .and_then(|name| name.strip_prefix("walltime_restart_"))
        .and_then(|k| k.parse::<u32>().ok())
        .map(|k| k + 1)
        .unwrap_or(0)
}

fn synthesized_checkpoint(completed: u64) -> CheckpointTable {
    let records = (1..=3)
        .map(|entity| CheckpointRecord {
            iteration: completed,
            entity,
            magnitude: 1.0,
            vx: 0.0,
            vy: 0.0,
            vz: 1.0,
        })
        .collect();
    CheckpointTable::new(records)
}

#[async_trait]
impl JobExecutor for SimulatedExecutor {
    async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, KernelError> {
        let params = spec
            .params()
            .ok_or_else(|| KernelError::ExecutorFailure("job has no parameter block".into()))?;

        let record = match &self.fail_when {
            Some((key, token)) if params.first_token(key) == Some(token.as_str()) => JobRecord {
                outcome: RunOutcome::Failed {
                    reason: format!("scripted failure for {key}={token}"),
                },
                checkpoint: None,
            },
            _ if attempt_index(spec) < self.walltime_hits => {
                let target: u64 = params
                    .first_token(&self.step_key)
                    .and_then(|t| t.parse().ok())
                    .ok_or_else(|| {
                        KernelError::ExecutorFailure(format!(
                            "missing or invalid step parameter '{}'",
                            self.step_key
                        ))
                    })?;
                // half the remaining steps land in the checkpoint
                let completed = if target > 1 { target / 2 } else { 0 };
                JobRecord {
                    outcome: RunOutcome::WalltimeExceeded,
                    checkpoint: Some(synthesized_checkpoint(completed)),
                }
            }
            _ => JobRecord {
                outcome: RunOutcome::Completed,
                checkpoint: None,
            },
        };

        let handle = JobHandle::new();
        let mut inner = self.inner.lock().unwrap();
        inner.submissions.push(spec.clone());
        inner.jobs.insert(handle, record);
        Ok(handle)
    }

    async fn wait(&self, handle: &JobHandle) -> Result<RunOutcome, KernelError> {
        // yield once so concurrently submitted jobs interleave
        tokio::task::yield_now().await;
        let inner = self.inner.lock().unwrap();
        inner
            .jobs
            .get(handle)
            .map(|r| r.outcome.clone())
            .ok_or_else(|| KernelError::ExecutorFailure(format!("unknown handle {handle}")))
    }

    async fn fetch_checkpoint(&self, handle: &JobHandle) -> Result<CheckpointTable, KernelError> {
        let inner = self.inner.lock().unwrap();
        inner
            .jobs
            .get(handle)
            .and_then(|r| r.checkpoint.clone())
            .ok_or(KernelError::CheckpointNotFound(*handle))
    }
}
