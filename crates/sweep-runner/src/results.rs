//! Sweep result collection and persistence.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use restart_kernel::{FinalStatus, JobHandle};

use crate::sweep::CombinationKey;

/// Terminal record of one combination's restart-controlled run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepEntry {
    /// Position in combination generation order
    pub index: usize,
    /// Display tag (lossy; see [`crate::sweep::Combination::tag`])
    pub tag: String,
    /// Structural aggregation key: the raw value tuples
    pub key: CombinationKey,
    /// Handle of the run's final attempt
    pub handle: JobHandle,
    pub status: FinalStatus,
    /// Submissions the run needed
    pub iterations: u32,
    /// Walltime budget of the final attempt
    pub walltime_secs: u64,
}

/// Aggregate result of one sweep: every combination's terminal run, in
/// generation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub entries: Vec<SweepEntry>,
}

impl SweepReport {
    /// Tag to final-attempt handle. Display convenience only: colliding
    /// tags collapse here, while `entries` keeps every combination.
    pub fn by_tag(&self) -> HashMap<String, JobHandle> {
        self.entries
            .iter()
            .map(|e| (e.tag.clone(), e.handle))
            .collect()
    }

    /// Total submissions across all combinations.
    pub fn total_iterations(&self) -> u32 {
        self.entries.iter().map(|e| e.iterations).sum()
    }

    /// Save the report to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
