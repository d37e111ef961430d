//! Clock abstractions so scheduling can run against paused time in tests.
//!
//! Managers compute send times as wall-clock instants (server `Date` headers are wall-clock)
//! and then sleep on tokio's timer for the remaining gap. [`TokioClock`] ties the two together
//! so `tokio::time::pause` drives both.

// crates.io
use tokio::time::Instant;
// self
use crate::_prelude::*;

/// Source of the current wall-clock time.
pub trait Clock
where
	Self: Send + Sync + Debug,
{
	/// Current time in UTC.
	fn now(&self) -> OffsetDateTime;
}

/// Wall clock backed by [`OffsetDateTime::now_utc`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Wall-clock origin advanced by tokio's (possibly paused) clock.
#[derive(Clone, Copy, Debug)]
pub struct TokioClock {
	origin: OffsetDateTime,
	anchor: Instant,
}
impl TokioClock {
	/// Anchors the clock at the current wall-clock time.
	pub fn new() -> Self {
		Self::starting_at(OffsetDateTime::now_utc())
	}

	/// Anchors the clock at `origin`; must be called inside a tokio runtime when time is paused.
	pub fn starting_at(origin: OffsetDateTime) -> Self {
		Self { origin, anchor: Instant::now() }
	}
}
impl Default for TokioClock {
	fn default() -> Self {
		Self::new()
	}
}
impl Clock for TokioClock {
	fn now(&self) -> OffsetDateTime {
		self.origin + self.anchor.elapsed()
	}
}

/// Converts a signed wall-clock gap into a sleepable duration, clamping negatives to zero.
pub(crate) fn until(now: OffsetDateTime, at: OffsetDateTime) -> StdDuration {
	let gap = at - now;

	if gap.is_positive() {
		StdDuration::try_from(gap).unwrap_or(StdDuration::ZERO)
	} else {
		StdDuration::ZERO
	}
}
