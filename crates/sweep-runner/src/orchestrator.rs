//! The sweep orchestrator: concurrent fan-out, join-all, aggregate.
//!
//! Every combination becomes one restart-controlled run, spawned as its
//! own task before any is awaited; combinations have no data dependency
//! on each other. The orchestrator suspends at a single join barrier
//! until every child reaches a terminal state, then scans the results in
//! generation order: the first combination that did not finish
//! successfully is reported as the sweep failure, regardless of
//! real-world completion order. Only on full success is the report
//! returned.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use restart_kernel::{
    FinalStatus, JobExecutor, JobSpec, RestartConfig, RestartController, RestartReport,
};

use crate::results::{SweepEntry, SweepReport};
use crate::sweep::{duplicate_tags, Combination, SweepSpec};

/// Sweep-level failures.
///
/// `SubRunFailed` names one representative failing combination, the first
/// in generation order; other failures that also occurred are not listed.
/// Callers needing full diagnostics must inspect per-combination handles
/// themselves.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("job template has no parameter block")]
    MissingParamBlock,

    #[error("sweep combination '{tag}' (index {index}) failed: {reason}")]
    SubRunFailed {
        index: usize,
        tag: String,
        reason: String,
    },
}

/// Fans a sweep out over restart-controlled runs and aggregates the
/// terminal results.
pub struct SweepOrchestrator {
    executor: Arc<dyn JobExecutor>,
    config: RestartConfig,
}

impl SweepOrchestrator {
    pub fn new(executor: Arc<dyn JobExecutor>, config: RestartConfig) -> Self {
        Self { executor, config }
    }

    /// Run every combination of the sweep against the template.
    pub async fn run(
        &self,
        template: &JobSpec,
        sweep: &SweepSpec,
    ) -> Result<SweepReport, SweepError> {
        self.run_with_cancellation(template, sweep, CancellationToken::new())
            .await
    }

    /// Run the sweep, propagating cancellation to every unfinished child
    /// controller when the token fires.
    pub async fn run_with_cancellation(
        &self,
        template: &JobSpec,
        sweep: &SweepSpec,
        cancel: CancellationToken,
    ) -> Result<SweepReport, SweepError> {
        if template.params().is_none() {
            return Err(SweepError::MissingParamBlock);
        }

        let started_at = Utc::now();
        let combinations = sweep.combinations();
        for tag in duplicate_tags(&combinations) {
            warn!(
                tag = %tag,
                "Display tags collide after sanitization; results stay keyed by raw values"
            );
        }

        info!(
            combinations = combinations.len(),
            label = %template.label,
            "Submitting sweep"
        );

        // Fan out: every child spawned before any is awaited.
        let mut tasks = Vec::with_capacity(combinations.len());
        for combo in &combinations {
            let spec = combo.apply_to(template);
            let controller = RestartController::new(self.executor.clone(), self.config.clone());
            let child_cancel = cancel.child_token();
            let tag = combo.tag();
            tasks.push(tokio::spawn(async move {
                let result = controller.run_with_cancellation(spec, child_cancel).await;
                (tag, result)
            }));
        }

        // Join barrier: every child runs to termination, even when
        // siblings have already failed.
        let joined = join_all(tasks).await;

        let mut entries = Vec::with_capacity(combinations.len());
        let mut first_failure: Option<SweepError> = None;
        for (combo, join_result) in combinations.iter().zip(joined) {
            let failure_reason = match join_result {
                Ok((tag, Ok(report))) => match report.status {
                    FinalStatus::Done => {
                        entries.push(entry_for(combo, tag, &report));
                        continue;
                    }
                    FinalStatus::MaxIterationsExceeded => {
                        "maximum walltime restarts exceeded".to_string()
                    }
                },
                Ok((_, Err(e))) => e.to_string(),
                Err(e) => format!("run task panicked: {e}"),
            };

            warn!(
                index = combo.index,
                tag = %combo.tag(),
                reason = %failure_reason,
                "Sweep combination did not finish successfully"
            );
            if first_failure.is_none() {
                first_failure = Some(SweepError::SubRunFailed {
                    index: combo.index,
                    tag: combo.tag(),
                    reason: failure_reason,
                });
            }
        }

        if let Some(failure) = first_failure {
            return Err(failure);
        }

        let report = SweepReport {
            started_at,
            ended_at: Utc::now(),
            entries,
        };
        info!(
            combinations = report.entries.len(),
            total_iterations = report.total_iterations(),
            "Sweep completed"
        );
        Ok(report)
    }
}

fn entry_for(combo: &Combination, tag: String, report: &RestartReport) -> SweepEntry {
    SweepEntry {
        index: combo.index,
        tag,
        key: combo.key(),
        handle: report.handle,
        status: report.status,
        iterations: report.iterations,
        walltime_secs: report.walltime_secs,
    }
}
