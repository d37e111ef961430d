//! Aggregated pause status for display.

// std
use std::sync::Weak;
// crates.io
use tokio::{
	sync::Notify,
	time::{self as tokio_time, MissedTickBehavior},
};
// self
use crate::{
	_prelude::*,
	clock,
	event::{PauseStatus, RateLimitEvent},
	limiter::LimiterInner,
	manager::ManagerStatus,
};

/// Emits [`RateLimitEvent::Status`] every `interval` while any manager is waiting, then sleeps
/// until a manager pauses again.
pub(super) async fn run(inner: Weak<LimiterInner>, pause: Arc<Notify>, interval: StdDuration) {
	loop {
		pause.notified().await;

		let mut ticker = tokio_time::interval(interval);

		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			ticker.tick().await;

			let Some(limiter) = inner.upgrade() else {
				return;
			};
			let Some(status) = limiter.pause_status() else {
				break;
			};

			tracing::trace!(%status, "Pause status.");

			limiter.context.emit(RateLimitEvent::Status(status));
		}
	}
}

/// Longest wait among `statuses`, rounded up to whole seconds.
pub(super) fn longest_pause(
	now: OffsetDateTime,
	statuses: impl Iterator<Item = ManagerStatus>,
) -> Option<PauseStatus> {
	statuses
		.filter_map(|status| {
			let at = status.next_send.filter(|at| *at > now)?;

			Some((at, status.policy.name().clone()))
		})
		.max_by_key(|(at, _)| *at)
		.map(|(at, policy)| {
			let gap = clock::until(now, at);

			let seconds_remaining = gap.as_secs() + u64::from(gap.subsec_nanos() > 0);

			PauseStatus { seconds_remaining, policy }
		})
}
