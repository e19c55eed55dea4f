//! The restart controller: a per-job state machine around the executor.
//!
//! One controller run owns one top-level submission. It drives the loop
//! `Init -> Running -> Evaluating -> {Done | RestartPrep |
//! FailedMaxIterations}` with `RestartPrep -> Running` closing the cycle:
//! submit the current spec, wait for the classified outcome, and either
//! finish, rebuild a continuation from the checkpoint, or give up once the
//! retry cap is hit. The only suspension point is the wait on the
//! executor; cancellation is observed there.
//!
//! Attempts within one run are totally ordered by iteration number, and
//! each attempt's spec is derived from (never shared with) its
//! predecessor, so step k+1 cannot start before step k's checkpoint
//! exists.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::build_continuation;
use crate::error::KernelError;
use crate::executor::{JobExecutor, JobHandle, RunOutcome};
use crate::jobspec::JobSpec;

/// What the report retains about non-final attempts.
///
/// Only the final attempt's output is ever exposed; intermediate attempts'
/// outputs are not merged or concatenated. If an attempt's output matters
/// in full, allocate a walltime budget large enough to avoid intermediate
/// restarts. `AllAttempts` records every attempt handle so callers can
/// fetch intermediate outputs themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputPolicy {
    /// Report only the final attempt's handle (default)
    FinalAttempt,
    /// Additionally record every attempt handle in submission order
    AllAttempts,
}

/// Configuration for one restart-controlled run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartConfig {
    /// Maximum number of submissions before giving up on walltime errors
    pub max_repeat: u32,
    /// Walltime budget of the first attempt, in seconds
    pub init_walltime_secs: u64,
    /// Walltime added on every restart, in seconds
    pub walltime_increase_secs: u64,
    /// Parameter tracking how many steps to run (read and overwritten on
    /// restart)
    pub restart_mode_key: String,
    /// Retention of non-final attempt handles
    pub output_policy: OutputPolicy,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            max_repeat: 3,
            init_walltime_secs: 3600,
            walltime_increase_secs: 1800,
            restart_mode_key: "nstep".to_string(),
            output_policy: OutputPolicy::FinalAttempt,
        }
    }
}

/// Terminal status of a run. Running out of retries is reported, not
/// raised: callers must branch on it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalStatus {
    /// The simulation completed
    Done,
    /// The retry cap was exhausted on walltime errors
    MaxIterationsExceeded,
}

/// Terminal report of one restart-controlled run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartReport {
    /// Handle of the final attempt; the only attempt whose output is
    /// exposed
    pub handle: JobHandle,
    pub status: FinalStatus,
    /// Submissions performed
    pub iterations: u32,
    /// Walltime budget of the final attempt
    pub walltime_secs: u64,
    /// Every attempt handle in submission order, when the output policy
    /// is `AllAttempts`; otherwise empty
    pub attempt_handles: Vec<JobHandle>,
}

/// Controller states. Terminal states carry the last attempt's handle.
enum State {
    Init(JobSpec),
    Running(JobSpec),
    Evaluating {
        spec: JobSpec,
        handle: JobHandle,
        outcome: RunOutcome,
    },
    RestartPrep {
        spec: JobSpec,
        handle: JobHandle,
    },
    Done(JobHandle),
    FailedMaxIterations(JobHandle),
}

/// Drives one job to a terminal state through the executor seam.
pub struct RestartController {
    executor: Arc<dyn JobExecutor>,
    config: RestartConfig,
}

impl RestartController {
    pub fn new(executor: Arc<dyn JobExecutor>, config: RestartConfig) -> Self {
        Self { executor, config }
    }

    /// Run a job to a terminal state.
    pub async fn run(&self, spec: JobSpec) -> Result<RestartReport, KernelError> {
        self.run_with_cancellation(spec, CancellationToken::new())
            .await
    }

    /// Run a job to a terminal state, aborting with
    /// [`KernelError::Cancelled`] when the token fires. Cancellation is
    /// observed at the executor wait; an attempt already submitted is left
    /// to the executor.
    pub async fn run_with_cancellation(
        &self,
        spec: JobSpec,
        cancel: CancellationToken,
    ) -> Result<RestartReport, KernelError> {
        let label = spec.label.clone();
        let mut iteration: u32 = 0;
        let mut attempts: Vec<JobHandle> = Vec::new();
        let mut current_walltime = self.config.init_walltime_secs;
        let mut state = State::Init(spec);

        loop {
            state = match state {
                State::Init(mut spec) => {
                    spec.resources.walltime_secs = self.config.init_walltime_secs;
                    State::Running(spec)
                }

                State::Running(spec) => {
                    if cancel.is_cancelled() {
                        return Err(KernelError::Cancelled);
                    }
                    current_walltime = spec.resources.walltime_secs;
                    let handle = self.executor.submit(&spec).await?;
                    iteration += 1;
                    attempts.push(handle);
                    debug!(
                        label = %label,
                        iteration = iteration,
                        walltime_secs = current_walltime,
                        handle = %handle,
                        "Submitted attempt"
                    );

                    let outcome = tokio::select! {
                        _ = cancel.cancelled() => return Err(KernelError::Cancelled),
                        res = self.executor.wait(&handle) => res?,
                    };
                    State::Evaluating {
                        spec,
                        handle,
                        outcome,
                    }
                }

                State::Evaluating {
                    spec,
                    handle,
                    outcome,
                } => match outcome {
                    RunOutcome::Completed => State::Done(handle),
                    RunOutcome::Failed { reason } => {
                        // fatal regardless of the retry budget
                        return Err(KernelError::ExecutorFailure(reason));
                    }
                    RunOutcome::WalltimeExceeded if iteration < self.config.max_repeat => {
                        State::RestartPrep { spec, handle }
                    }
                    RunOutcome::WalltimeExceeded => State::FailedMaxIterations(handle),
                },

                State::RestartPrep { spec, handle } => {
                    let table = self.executor.fetch_checkpoint(&handle).await?;
                    let cont = build_continuation(
                        &spec,
                        &table,
                        &self.config.restart_mode_key,
                        self.config.walltime_increase_secs,
                        iteration - 1,
                    )?;
                    info!(
                        label = %label,
                        iteration = iteration,
                        completed_steps = cont.completed_steps,
                        remaining_steps = cont.remaining_steps,
                        walltime_secs = cont.spec.resources.walltime_secs,
                        "Restarting from checkpoint"
                    );
                    State::Running(cont.spec)
                }

                State::Done(handle) => {
                    info!(
                        label = %label,
                        iterations = iteration,
                        handle = %handle,
                        "Run completed"
                    );
                    return Ok(self.report(handle, FinalStatus::Done, iteration, current_walltime, attempts));
                }

                State::FailedMaxIterations(handle) => {
                    warn!(
                        label = %label,
                        max_repeat = self.config.max_repeat,
                        last_handle = %handle,
                        "Reached the maximum number of walltime restarts"
                    );
                    return Ok(self.report(
                        handle,
                        FinalStatus::MaxIterationsExceeded,
                        iteration,
                        current_walltime,
                        attempts,
                    ));
                }
            };
        }
    }

    fn report(
        &self,
        handle: JobHandle,
        status: FinalStatus,
        iterations: u32,
        walltime_secs: u64,
        attempts: Vec<JobHandle>,
    ) -> RestartReport {
        let attempt_handles = match self.config.output_policy {
            OutputPolicy::AllAttempts => attempts,
            OutputPolicy::FinalAttempt => Vec::new(),
        };
        RestartReport {
            handle,
            status,
            iterations,
            walltime_secs,
            attempt_handles,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::checkpoint::{CheckpointRecord, CheckpointTable};

    /// Executor that replays a fixed script of outcomes and records every
    /// submitted spec.
    struct ScriptedExecutor {
        outcomes: Mutex<VecDeque<RunOutcome>>,
        submissions: Mutex<Vec<JobSpec>>,
        checkpoint_at: u64,
    }

    impl ScriptedExecutor {
        fn new(outcomes: Vec<RunOutcome>, checkpoint_at: u64) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                submissions: Mutex::new(Vec::new()),
                checkpoint_at,
            }
        }

        fn submitted_walltimes(&self) -> Vec<u64> {
            self.submissions
                .lock()
                .unwrap()
                .iter()
                .map(|s| s.resources.walltime_secs)
                .collect()
        }
    }

    #[async_trait]
    impl JobExecutor for ScriptedExecutor {
        async fn submit(&self, spec: &JobSpec) -> Result<JobHandle, KernelError> {
            self.submissions.lock().unwrap().push(spec.clone());
            Ok(JobHandle::new())
        }

        async fn wait(&self, _handle: &JobHandle) -> Result<RunOutcome, KernelError> {
            let next = self.outcomes.lock().unwrap().pop_front();
            match next {
                Some(outcome) => Ok(outcome),
                None => std::future::pending().await,
            }
        }

        async fn fetch_checkpoint(
            &self,
            _handle: &JobHandle,
        ) -> Result<CheckpointTable, KernelError> {
            Ok(CheckpointTable::new(vec![CheckpointRecord {
                iteration: self.checkpoint_at,
                entity: 1,
                magnitude: 1.0,
                vx: 0.0,
                vy: 0.0,
                vz: 1.0,
            }]))
        }
    }

    fn test_spec(steps: u64) -> JobSpec {
        let mut spec = JobSpec::new("controller-test", "scripted run");
        spec.params_mut()
            .unwrap()
            .set("nstep", vec![steps.to_string()]);
        spec
    }

    fn test_config(max_repeat: u32) -> RestartConfig {
        RestartConfig {
            max_repeat,
            init_walltime_secs: 1000,
            walltime_increase_secs: 500,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_completed_first_attempt_submits_once() {
        let exec = Arc::new(ScriptedExecutor::new(vec![RunOutcome::Completed], 100));
        let controller = RestartController::new(exec.clone(), test_config(3));

        let report = controller.run(test_spec(10_000)).await.unwrap();
        assert_eq!(report.status, FinalStatus::Done);
        assert_eq!(report.iterations, 1);
        assert_eq!(report.walltime_secs, 1000);
        assert_eq!(exec.submitted_walltimes(), vec![1000]);
    }

    #[tokio::test]
    async fn test_retry_cap_submits_exactly_max_repeat() {
        let exec = Arc::new(ScriptedExecutor::new(
            vec![
                RunOutcome::WalltimeExceeded,
                RunOutcome::WalltimeExceeded,
                RunOutcome::WalltimeExceeded,
                // a 4th submission would hang in wait(); it must not happen
            ],
            100,
        ));
        let controller = RestartController::new(exec.clone(), test_config(3));

        let report = controller.run(test_spec(10_000)).await.unwrap();
        assert_eq!(report.status, FinalStatus::MaxIterationsExceeded);
        assert_eq!(report.iterations, 3);
        assert_eq!(exec.submissions.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_walltime_budget_grows_by_increment_per_restart() {
        let exec = Arc::new(ScriptedExecutor::new(
            vec![
                RunOutcome::WalltimeExceeded,
                RunOutcome::WalltimeExceeded,
                RunOutcome::Completed,
            ],
            1_000,
        ));
        let controller = RestartController::new(exec.clone(), test_config(5));

        let report = controller.run(test_spec(10_000)).await.unwrap();
        assert_eq!(report.status, FinalStatus::Done);
        assert_eq!(report.iterations, 3);
        // attempt k runs with init + k * increase
        assert_eq!(exec.submitted_walltimes(), vec![1000, 1500, 2000]);
        assert_eq!(report.walltime_secs, 2000);
    }

    #[tokio::test]
    async fn test_executor_failure_is_fatal_and_never_retried() {
        let exec = Arc::new(ScriptedExecutor::new(
            vec![RunOutcome::Failed {
                reason: "segfault".to_string(),
            }],
            100,
        ));
        let controller = RestartController::new(exec.clone(), test_config(3));

        let err = controller.run(test_spec(10_000)).await.unwrap_err();
        assert!(matches!(err, KernelError::ExecutorFailure(_)));
        assert_eq!(exec.submissions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_rewrites_step_count_and_resume_flags() {
        let exec = Arc::new(ScriptedExecutor::new(
            vec![RunOutcome::WalltimeExceeded, RunOutcome::Completed],
            4_000,
        ));
        let controller = RestartController::new(exec.clone(), test_config(3));

        controller.run(test_spec(10_000)).await.unwrap();

        let submissions = exec.submissions.lock().unwrap();
        let second = submissions[1].params().unwrap();
        assert_eq!(second.first_token("nstep"), Some("6000"));
        assert_eq!(second.first_token(crate::checkpoint::INIT_MODE_KEY), Some("4"));
        assert_eq!(
            second.first_token(crate::checkpoint::RESTART_FILE_KEY),
            Some("walltime_restart_0")
        );
    }

    #[tokio::test]
    async fn test_all_attempts_policy_records_every_handle() {
        let exec = Arc::new(ScriptedExecutor::new(
            vec![RunOutcome::WalltimeExceeded, RunOutcome::Completed],
            2_000,
        ));
        let config = RestartConfig {
            output_policy: OutputPolicy::AllAttempts,
            ..test_config(3)
        };
        let controller = RestartController::new(exec, config);

        let report = controller.run(test_spec(10_000)).await.unwrap();
        assert_eq!(report.attempt_handles.len(), 2);
        assert_eq!(*report.attempt_handles.last().unwrap(), report.handle);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_the_wait() {
        // no scripted outcome: wait() hangs until cancelled
        let exec = Arc::new(ScriptedExecutor::new(vec![], 100));
        let controller = RestartController::new(exec, test_config(3));

        let token = CancellationToken::new();
        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = controller
            .run_with_cancellation(test_spec(10_000), token)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::Cancelled));
    }
}
