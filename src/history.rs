//! Reply-time history and the safe-send calculator.
//!
//! Only server-reported reply timestamps (the `Date` header) are recorded, never the local
//! clock, so latency and clock skew cannot bias the window arithmetic. Capacity tracks the
//! policy's largest hit ceiling and only ever grows: a larger buffer can never under-estimate
//! the wait a window requires.

// self
use crate::{
	_prelude::*,
	policy::{Policy, RuleItem},
};

/// Capacity-bounded, newest-first record of reply timestamps for one policy.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestHistory {
	entries: VecDeque<OffsetDateTime>,
	capacity: usize,
}
impl RequestHistory {
	/// Creates an empty history with the given capacity.
	pub fn with_capacity(capacity: usize) -> Self {
		Self { entries: VecDeque::with_capacity(capacity), capacity }
	}

	/// Records a reply timestamp, evicting the oldest entry once full.
	///
	/// Entries stay time-ordered even if a stamp arrives out of order.
	pub fn push(&mut self, timestamp: OffsetDateTime) {
		if self.capacity == 0 {
			return;
		}

		let position =
			self.entries.iter().position(|entry| *entry <= timestamp).unwrap_or(self.entries.len());

		if position == self.capacity {
			return;
		}

		self.entries.insert(position, timestamp);
		self.entries.truncate(self.capacity);
	}

	/// Raises the capacity, preserving every existing entry. Smaller values are ignored.
	pub fn grow(&mut self, capacity: usize) -> bool {
		if capacity <= self.capacity {
			return false;
		}

		self.entries.reserve(capacity - self.entries.len());
		self.capacity = capacity;

		true
	}

	/// Maximum number of retained timestamps.
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	/// Number of retained timestamps.
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	/// Returns `true` when nothing has been recorded.
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	/// Most recent timestamp.
	pub fn latest(&self) -> Option<OffsetDateTime> {
		self.entries.front().copied()
	}

	/// Timestamps from newest to oldest.
	pub fn iter(&self) -> impl Iterator<Item = &OffsetDateTime> {
		self.entries.iter()
	}

	/// Earliest instant at which one more send keeps every item of `policy` within its limit.
	///
	/// For an item allowing `H` hits per `P` seconds, the history constrains nothing while fewer
	/// than `H` entries fall inside the window ending at `now`; otherwise the next send must wait
	/// until the `H`-th most recent entry leaves the window. An item whose state reports an
	/// active restriction additionally holds sends until that restriction lapses. The result is
	/// the latest constraint across all items, or `now`.
	pub fn next_safe_send(&self, policy: &Policy, now: OffsetDateTime) -> OffsetDateTime {
		policy
			.items()
			.filter_map(|(_, item)| self.item_constraint(item, now))
			.fold(now, Ord::max)
	}

	fn item_constraint(&self, item: &RuleItem, now: OffsetDateTime) -> Option<OffsetDateTime> {
		let limit = item.limit();
		let period = limit.period();
		let window_start = now - period;
		let hits = usize::try_from(limit.hits).unwrap_or(usize::MAX);
		let window_constraint = if hits == 0 {
			// Nothing fits; the best we can offer is one full window from now.
			Some(now + period)
		} else {
			self.entries
				.iter()
				.take_while(|entry| **entry > window_start)
				.nth(hits - 1)
				.map(|entry| *entry + period)
		};
		let restriction_constraint = match item.state().restriction_s {
			0 => None,
			_ => Some(self.latest().unwrap_or(now) + item.state().restriction()),
		};

		window_constraint.max(restriction_constraint)
	}
}
