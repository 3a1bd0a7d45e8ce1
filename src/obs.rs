//! Observability helpers for relay stages.
//!
//! # Feature Flags
//!
//! - Spans named `session_relay.stage` carrying `stage` and `op` fields are always emitted through
//!   `tracing`.
//! - Enable `metrics` to increment the `session_relay_stage_total` counter for every
//!   attempt/success/failure, labeled by `stage` + `outcome`.

mod metrics;
mod span;

pub use metrics::*;
pub use span::*;

// self
use crate::_prelude::*;

/// Pipeline stages observed by the relay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RelayStage {
	/// Rate limiter admission check.
	Admission,
	/// Access-token refresh.
	Refresh,
	/// Outbound backend call.
	Dispatch,
	/// Background purge of expired rate records.
	Sweep,
}
impl RelayStage {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RelayStage::Admission => "admission",
			RelayStage::Refresh => "refresh",
			RelayStage::Dispatch => "dispatch",
			RelayStage::Sweep => "sweep",
		}
	}
}
impl Display for RelayStage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageOutcome {
	/// Entry to a stage.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure or rejection.
	Failure,
}
impl StageOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			StageOutcome::Attempt => "attempt",
			StageOutcome::Success => "success",
			StageOutcome::Failure => "failure",
		}
	}
}
impl Display for StageOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
