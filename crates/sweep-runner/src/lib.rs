//! Sweep Runner: parameter sweeps over restart-controlled jobs.
//!
//! A sweep declares a set of parameter axes; this crate expands them into
//! every combination, launches one walltime-restart-controlled run per
//! combination concurrently, joins them all, and aggregates the terminal
//! results into a single report (or the first failure, in combination
//! order).

pub mod orchestrator;
pub mod results;
pub mod sim;
pub mod sweep;

pub use orchestrator::{SweepError, SweepOrchestrator};
pub use results::{SweepEntry, SweepReport};
pub use sim::SimulatedExecutor;
pub use sweep::{AxisChoice, AxisTarget, Combination, CombinationKey, SweepAxis, SweepSpec};
