//! The checkpoint codec: partial-state table in, continuation spec out.
//!
//! An attempt killed on walltime leaves behind a table of per-entity state
//! rows. The codec turns that table plus the previous [`JobSpec`] into a
//! brand new spec that resumes from the saved state: it recomputes how
//! many steps remain, emits the restart payload the simulation code reads
//! back, flips the init mode to resume-from-file, and grows the walltime
//! budget. The previous spec is never touched.

use serde::{Deserialize, Serialize};

use crate::error::KernelError;
use crate::jobspec::{JobSpec, SectionContent};

/// Parameter flipped to [`RESUME_FROM_FILE`] on restart.
pub const INIT_MODE_KEY: &str = "initmag";

/// Init-mode value meaning "resume from the restart file".
pub const RESUME_FROM_FILE: &str = "4";

/// Parameter naming the restart payload section.
pub const RESTART_FILE_KEY: &str = "restartfile";

/// Fixed descriptive header of every emitted restart payload.
const PAYLOAD_HEADER: &str = "\
################################################################################
# File type: auto-generated walltime restart file
# Entities and ensembles: according to the parent job
################################################################################
#  iterens    iatom            |Mom|             M_x             M_y             M_z";

/// One saved state row: iteration count, entity index, magnitude and a
/// three-component vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub iteration: u64,
    pub entity: u64,
    pub magnitude: f64,
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

/// Ordered sequence of saved state rows from one interrupted attempt.
/// Read-only: the codec only transforms it, never mutates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointTable {
    pub records: Vec<CheckpointRecord>,
}

impl CheckpointTable {
    pub fn new(records: Vec<CheckpointRecord>) -> Self {
        Self { records }
    }

    /// Steps already completed when the checkpoint was written, taken from
    /// the first record.
    pub fn completed_steps(&self) -> Option<u64> {
        self.records.first().map(|r| r.iteration)
    }
}

/// A continuation produced by the codec: the new spec plus the step
/// bookkeeping that derived it.
#[derive(Debug, Clone)]
pub struct Continuation {
    /// The new, independent spec that resumes the simulation
    pub spec: JobSpec,
    /// Steps the interrupted attempt completed
    pub completed_steps: u64,
    /// Steps the continuation still has to run
    pub remaining_steps: u64,
    /// Logical name of the attached restart payload section
    pub payload_name: String,
}

/// Build a continuation spec from an interrupted attempt.
///
/// `restart_mode_key` is the parameter tracking how many steps to run; it
/// is read to recover the original target and overwritten with the
/// remaining count. `attempt` numbers the interrupted attempt and keeps
/// payload names unique across restarts of the same run.
pub fn build_continuation(
    prev: &JobSpec,
    table: &CheckpointTable,
    restart_mode_key: &str,
    walltime_increase_secs: u64,
    attempt: u32,
) -> Result<Continuation, KernelError> {
    let completed = table
        .completed_steps()
        .ok_or_else(|| KernelError::InvalidCheckpoint("empty checkpoint table".to_string()))?;

    let params = prev
        .params()
        .ok_or_else(|| KernelError::InvalidCheckpoint("spec has no parameter block".to_string()))?;
    let target: u64 = params
        .first_token(restart_mode_key)
        .ok_or_else(|| {
            KernelError::InvalidCheckpoint(format!(
                "missing step-count parameter '{restart_mode_key}'"
            ))
        })?
        .parse()
        .map_err(|_| {
            KernelError::InvalidCheckpoint(format!(
                "step-count parameter '{restart_mode_key}' is not an integer"
            ))
        })?;

    if completed >= target {
        return Err(KernelError::InvalidCheckpoint(format!(
            "no steps remaining: completed {completed} of {target}"
        )));
    }
    let remaining = target - completed;

    let payload_name = format!("walltime_restart_{attempt}");
    let payload = render_payload(table);

    let mut spec = prev.clone();
    {
        // params() is Some, checked above
        let params = spec.params_mut().expect("parameter block present");
        params.set(INIT_MODE_KEY, vec![RESUME_FROM_FILE.to_string()]);
        params.set(RESTART_FILE_KEY, vec![payload_name.clone()]);
        params.set(restart_mode_key, vec![remaining.to_string()]);
    }
    spec.replace_section(payload_name.clone(), SectionContent::Text(payload));
    spec.resources.walltime_secs += walltime_increase_secs;

    Ok(Continuation {
        spec,
        completed_steps: completed,
        remaining_steps: remaining,
        payload_name,
    })
}

/// Render the restart payload: the fixed header, then one row per record
/// with the iteration and entity columns as integers.
fn render_payload(table: &CheckpointTable) -> String {
    let mut out = String::from(PAYLOAD_HEADER);
    for r in &table.records {
        out.push('\n');
        out.push_str(&format!(
            "{:>10} {:>8} {:>16.8} {:>16.8} {:>16.8} {:>16.8}",
            r.iteration, r.entity, r.magnitude, r.vx, r.vy, r.vz
        ));
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_steps(target: u64) -> JobSpec {
        let mut spec = JobSpec::new("job", "codec test");
        spec.params_mut()
            .unwrap()
            .set("nstep", vec![target.to_string()]);
        spec
    }

    fn table_at(iteration: u64) -> CheckpointTable {
        CheckpointTable::new(vec![
            CheckpointRecord {
                iteration,
                entity: 1,
                magnitude: 1.0,
                vx: 0.0,
                vy: 0.0,
                vz: 1.0,
            },
            CheckpointRecord {
                iteration,
                entity: 2,
                magnitude: 1.0,
                vx: 0.5,
                vy: 0.5,
                vz: 0.0,
            },
        ])
    }

    #[test]
    fn test_remaining_plus_completed_equals_target() {
        let spec = spec_with_steps(10_000);
        let cont = build_continuation(&spec, &table_at(4_000), "nstep", 600, 0).unwrap();
        assert_eq!(cont.completed_steps + cont.remaining_steps, 10_000);
        assert_eq!(
            cont.spec.params().unwrap().first_token("nstep"),
            Some("6000")
        );
    }

    #[test]
    fn test_empty_table_is_invalid() {
        let spec = spec_with_steps(10_000);
        let err = build_continuation(&spec, &CheckpointTable::default(), "nstep", 600, 0)
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidCheckpoint(_)));
    }

    #[test]
    fn test_completed_at_or_past_target_is_invalid() {
        let spec = spec_with_steps(5_000);
        for iteration in [5_000, 6_000] {
            let err =
                build_continuation(&spec, &table_at(iteration), "nstep", 600, 0).unwrap_err();
            assert!(matches!(err, KernelError::InvalidCheckpoint(_)));
        }
    }

    #[test]
    fn test_walltime_grows_by_increment_and_prev_untouched() {
        let mut spec = spec_with_steps(10_000);
        spec.resources.walltime_secs = 3_600;
        let cont = build_continuation(&spec, &table_at(1_000), "nstep", 600, 0).unwrap();
        assert_eq!(cont.spec.resources.walltime_secs, 4_200);
        assert_eq!(spec.resources.walltime_secs, 3_600);
        assert_eq!(spec.params().unwrap().first_token("nstep"), Some("10000"));
    }

    #[test]
    fn test_resume_flags_and_payload_attached() {
        let spec = spec_with_steps(10_000);
        let cont = build_continuation(&spec, &table_at(2_500), "nstep", 600, 3).unwrap();

        let params = cont.spec.params().unwrap();
        assert_eq!(params.first_token(INIT_MODE_KEY), Some(RESUME_FROM_FILE));
        assert_eq!(
            params.first_token(RESTART_FILE_KEY),
            Some("walltime_restart_3")
        );

        let section = cont.spec.section("walltime_restart_3").unwrap();
        let SectionContent::Text(payload) = &section.content else {
            panic!("payload section should be text");
        };
        assert!(payload.starts_with('#'));
        // one header block plus one row per record
        let rows: Vec<&str> = payload
            .lines()
            .filter(|l| !l.trim_start().starts_with('#') && !l.trim().is_empty())
            .collect();
        assert_eq!(rows.len(), 2);
        let first: Vec<&str> = rows[0].split_whitespace().collect();
        assert_eq!(first[0], "2500");
        assert_eq!(first[1], "1");
    }
}
