//! Outbound notifications for status bars and diagnostic tables.
//!
//! Events fan out over a [`tokio::sync::broadcast`] channel obtained from
//! [`RateLimiter::subscribe`](crate::RateLimiter::subscribe). Slow subscribers miss events
//! rather than stall managers.

// self
use crate::{_prelude::*, id::PolicyName, policy::Policy};

/// Consolidated "waiting for rate limit" status across every policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PauseStatus {
	/// Whole seconds until the furthest scheduled send (rounded up).
	pub seconds_remaining: u64,
	/// Policy holding that send.
	pub policy: PolicyName,
}
impl Display for PauseStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(
			f,
			"Paused for {} seconds due to rate limiting ({}).",
			self.seconds_remaining, self.policy
		)
	}
}

/// Notification emitted by managers and the limiter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitEvent {
	/// A policy was created, updated from a reply, or refreshed on request.
	PolicyUpdated(Policy),
	/// A manager's queue length changed.
	QueueUpdated {
		/// Policy owning the queue.
		policy: PolicyName,
		/// Requests still waiting behind the active one.
		queued: usize,
	},
	/// A manager scheduled its next send in the future.
	Paused {
		/// Policy that paused.
		policy: PolicyName,
		/// Scheduled send time.
		until: OffsetDateTime,
	},
	/// Periodic aggregated pause status.
	Status(PauseStatus),
	/// The server rejected a request with HTTP 429; it will be resent automatically.
	Violation {
		/// Policy that was violated.
		policy: PolicyName,
		/// Violations observed by this limiter so far.
		total: u64,
	},
	/// The server's policy headers could not be interpreted and the manager suspended itself.
	Diagnostic {
		/// Affected policy.
		policy: PolicyName,
		/// Human-readable description.
		message: String,
	},
}
impl RateLimitEvent {
	/// Policy the event concerns.
	pub fn policy(&self) -> &PolicyName {
		match self {
			Self::PolicyUpdated(policy) => policy.name(),
			Self::Status(status) => &status.policy,
			Self::QueueUpdated { policy, .. }
			| Self::Paused { policy, .. }
			| Self::Violation { policy, .. }
			| Self::Diagnostic { policy, .. } => policy,
		}
	}
}
