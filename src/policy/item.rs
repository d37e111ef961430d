// self
use crate::{
	_prelude::*,
	policy::{BORDERLINE_BUFFER, PolicyError, PolicyStatus},
};

/// One `hits:period:restriction` triple as declared (limit) or reported (state) by the server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Window {
	/// Hit count: the ceiling for a limit, current usage for a state.
	pub hits: u32,
	/// Window length in seconds.
	pub period_s: u32,
	/// Violation timeout in seconds (limit), or the remaining active restriction (state).
	pub restriction_s: u32,
}
impl Window {
	/// Creates a window from its three components.
	pub const fn new(hits: u32, period_s: u32, restriction_s: u32) -> Self {
		Self { hits, period_s, restriction_s }
	}

	/// Window length as a [`Duration`].
	pub fn period(&self) -> Duration {
		Duration::seconds(self.period_s.into())
	}

	/// Restriction as a [`Duration`].
	pub fn restriction(&self) -> Duration {
		Duration::seconds(self.restriction_s.into())
	}
}
impl Display for Window {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "{}:{}:{}", self.hits, self.period_s, self.restriction_s)
	}
}
impl FromStr for Window {
	type Err = PolicyError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || PolicyError::InvalidItem { fragment: s.to_owned() };
		let mut parts = s.trim().split(':').map(|part| part.trim().parse::<u32>());
		let (Some(Ok(hits)), Some(Ok(period_s)), Some(Ok(restriction_s)), None) =
			(parts.next(), parts.next(), parts.next(), parts.next())
		else {
			return Err(invalid());
		};

		Ok(Self { hits, period_s, restriction_s })
	}
}

/// A single limit window paired with the server's current usage of it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RuleItem {
	limit: Window,
	state: Window,
	status: PolicyStatus,
}
impl RuleItem {
	/// Pairs a limit with its state and classifies the result.
	pub fn new(limit: Window, state: Window) -> Self {
		Self { limit, state, status: classify(&limit, &state) }
	}

	/// Server-declared ceiling.
	pub fn limit(&self) -> &Window {
		&self.limit
	}

	/// Server-reported usage.
	pub fn state(&self) -> &Window {
		&self.state
	}

	/// Local classification of this item.
	pub fn status(&self) -> PolicyStatus {
		self.status
	}

	/// Rough time needed to push `request_count` requests through this window, assuming
	/// `minimum_delay` between sends while budget remains.
	pub fn estimate_duration(&self, request_count: u32, minimum_delay: StdDuration) -> StdDuration {
		if self.limit.hits == 0 {
			return StdDuration::ZERO;
		}

		let mut duration = StdDuration::ZERO;

		if self.state.hits > self.limit.hits {
			duration += StdDuration::from_secs(self.limit.restriction_s.into());
		}

		let initial_burst = self.limit.hits.saturating_sub(self.state.hits).min(request_count);
		let remaining = request_count - initial_burst;
		let full_periods = remaining / self.limit.hits;
		let final_burst = remaining % self.limit.hits;

		duration += minimum_delay * initial_burst;
		duration += StdDuration::from_secs(u64::from(full_periods) * u64::from(self.limit.period_s));
		duration += minimum_delay * final_burst;

		duration
	}
}

/// Classifies one limit/state pair.
///
/// A state whose period disagrees with its limit is [`PolicyStatus::Invalid`]; otherwise the
/// item is a violation once usage reaches the ceiling and borderline while the remaining
/// headroom is at most [`BORDERLINE_BUFFER`].
pub fn classify(limit: &Window, state: &Window) -> PolicyStatus {
	if state.period_s != limit.period_s {
		PolicyStatus::Invalid
	} else if state.hits >= limit.hits {
		PolicyStatus::Violation
	} else if limit.hits - state.hits <= BORDERLINE_BUFFER {
		PolicyStatus::Borderline
	} else {
		PolicyStatus::Ok
	}
}
