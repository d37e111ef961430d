//! Observability helpers for policy managers and discovery.
//!
//! # Feature Flags
//!
//! - Spans named `ratelimit.policy` carry the `policy` and `stage` (call site) fields; every
//!   manager actor and discovery probe runs inside one.
//! - Enable `metrics` to increment the `ratelimit_request_total` counter for every
//!   scheduled request transition, labeled by `policy` + `outcome`.

mod metrics;
mod tracing;

pub use self::metrics::*;
pub use self::tracing::*;

// self
use crate::_prelude::*;

/// Request transitions recorded per policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
	/// Handed to the transport.
	Sent,
	/// Resolved successfully for the caller.
	Delivered,
	/// Resolved with an error for the caller.
	Failed,
	/// Rejected with HTTP 429 and rescheduled.
	Violation,
	/// Dropped because the caller stopped waiting.
	Abandoned,
	/// Discovery probe sent on first contact with an endpoint.
	Probe,
}
impl RequestOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RequestOutcome::Sent => "sent",
			RequestOutcome::Delivered => "delivered",
			RequestOutcome::Failed => "failed",
			RequestOutcome::Violation => "violation",
			RequestOutcome::Abandoned => "abandoned",
			RequestOutcome::Probe => "probe",
		}
	}
}
impl Display for RequestOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
