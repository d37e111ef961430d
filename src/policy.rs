//! Server-declared rate limit policies parsed from reply headers.
//!
//! Every reply from a rate limited endpoint names the policy that governs it
//! (`X-Rate-Limit-Policy`), the rules in force (`X-Rate-Limit-Rules`), and for each rule
//! `R` a limit header (`X-Rate-Limit-R`) plus a state header (`X-Rate-Limit-R-State`). Both
//! carry comma-separated `hits:period:restriction` items matched by position.
//!
//! Policies are immutable snapshots: managers replace theirs with a freshly parsed one on
//! every reply and log the [`PolicyChange`]s between the two.

mod change;
mod header;
mod item;
mod rule;

pub use change::*;
pub use header::*;
pub use item::*;
pub use rule::*;

// self
use crate::{
	_prelude::*,
	id::{IdentifierError, PolicyName},
};

/// Remaining headroom (in hits) at or below which an item is considered borderline.
pub const BORDERLINE_BUFFER: u32 = 2;

/// Classification of a policy, rule, or item, ordered by severity.
#[derive(
	Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PolicyStatus {
	/// No reply has been seen yet.
	Unknown,
	/// Comfortably within every limit.
	Ok,
	/// Close enough to a limit that sends get extra spacing.
	Borderline,
	/// At or over a limit.
	Violation,
	/// The server's headers could not be interpreted.
	Invalid,
}
impl PolicyStatus {
	/// Returns a stable label suitable for logs and tables.
	pub const fn as_str(self) -> &'static str {
		match self {
			PolicyStatus::Unknown => "unknown",
			PolicyStatus::Ok => "ok",
			PolicyStatus::Borderline => "borderline",
			PolicyStatus::Violation => "violation",
			PolicyStatus::Invalid => "invalid",
		}
	}
}
impl Display for PolicyStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Failures raised while reading rate limit headers.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum PolicyError {
	/// A required header was absent.
	#[error("Missing rate limit header `{name}`.")]
	MissingHeader {
		/// Lowercase header name.
		name: String,
	},
	/// A header value was not visible ASCII.
	#[error("Rate limit header `{name}` is not valid text.")]
	NonTextHeader {
		/// Lowercase header name.
		name: String,
	},
	/// An item was not a `hits:period:restriction` triple of integers.
	#[error("Rate limit item `{fragment}` is not a hits:period:restriction triple.")]
	InvalidItem {
		/// Offending fragment.
		fragment: String,
	},
	/// A rule's limit and state headers disagree on the number of items.
	#[error("Rule `{rule}` has {limits} limit items but {states} state items.")]
	ItemCountMismatch {
		/// Rule name.
		rule: String,
		/// Number of limit items.
		limits: usize,
		/// Number of state items.
		states: usize,
	},
	/// A state item tracks a different window than the limit it is paired with.
	#[error("Rule `{rule}` item {index} pairs limit `{limit}` with state `{state}`.")]
	PeriodMismatch {
		/// Rule name.
		rule: String,
		/// Zero-based item position.
		index: usize,
		/// Declared limit.
		limit: Window,
		/// Reported state.
		state: Window,
	},
	/// The rules header listed no rules.
	#[error("Rate limit policy lists no rules.")]
	NoRules,
	/// The policy name is not a valid identifier.
	#[error("Rate limit policy name is invalid.")]
	InvalidName(#[source] IdentifierError),
}

/// A named rate limit contract and the server's view of current usage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Policy {
	name: PolicyName,
	rules: Vec<Rule>,
	status: PolicyStatus,
	maximum_hits: u32,
}
impl Policy {
	/// Builds a policy from parsed rules, deriving status and maximum hits.
	pub fn new(name: PolicyName, rules: Vec<Rule>) -> Self {
		let status = rules.iter().map(Rule::status).max().unwrap_or(PolicyStatus::Unknown);
		let maximum_hits = rules.iter().map(Rule::maximum_hits).max().unwrap_or(0);

		Self { name, rules, status, maximum_hits }
	}

	/// Placeholder for a policy that has not been observed yet.
	pub fn unknown(name: PolicyName) -> Self {
		Self { name, rules: Vec::new(), status: PolicyStatus::Unknown, maximum_hits: 0 }
	}

	/// Parses the policy advertised by a reply.
	pub fn from_headers(headers: &HeaderMap) -> Result<Self, PolicyError> {
		let name = header::policy_name(headers)
			.ok_or_else(|| PolicyError::MissingHeader { name: POLICY_HEADER.to_owned() })?;
		let name = PolicyName::new(name).map_err(PolicyError::InvalidName)?;
		let rules = header::split_list(header::required(headers, RULES_HEADER)?)
			.map(|rule| Rule::from_headers(rule, headers))
			.collect::<Result<Vec<_>, _>>()?;

		if rules.is_empty() {
			return Err(PolicyError::NoRules);
		}

		Ok(Self::new(name, rules))
	}

	/// Rejects a policy whose items pair a state with a limit of a different period.
	///
	/// [`Policy::from_headers`] still returns such a policy (flagged
	/// [`PolicyStatus::Invalid`]) so it can be inspected; schedulers must not route on it.
	pub fn ensure_consistent(self) -> Result<Self, PolicyError> {
		let mismatch = self.rules.iter().find_map(|rule| {
			rule.items().iter().enumerate().find_map(|(index, item)| {
				(item.limit().period_s != item.state().period_s).then(|| {
					PolicyError::PeriodMismatch {
						rule: rule.name().to_owned(),
						index,
						limit: *item.limit(),
						state: *item.state(),
					}
				})
			})
		});

		match mismatch {
			Some(e) => Err(e),
			None => Ok(self),
		}
	}

	/// Re-serializes the policy into the header set it was parsed from.
	pub fn to_headers(&self) -> HeaderMap {
		let mut headers = HeaderMap::new();
		let mut put = |name: &str, value: &str| {
			if let (Ok(name), Ok(value)) =
				(HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
			{
				headers.insert(name, value);
			}
		};
		let rule_names = self.rules.iter().map(Rule::name).collect::<Vec<_>>().join(",");

		put(POLICY_HEADER, self.name.as_str());
		put(RULES_HEADER, &rule_names);

		for rule in &self.rules {
			put(&header::limit_header_name(rule.name()), &rule.limit_header_value());
			put(&header::state_header_name(rule.name()), &rule.state_header_value());
		}

		headers
	}

	/// Copy of this policy flagged [`PolicyStatus::Invalid`], keeping the last known rules so
	/// scheduling stays conservative.
	pub fn invalidated(&self) -> Self {
		Self { status: PolicyStatus::Invalid, ..self.clone() }
	}

	/// Policy name.
	pub fn name(&self) -> &PolicyName {
		&self.name
	}

	/// Rules in header order.
	pub fn rules(&self) -> &[Rule] {
		&self.rules
	}

	/// Most severe status across every rule.
	pub fn status(&self) -> PolicyStatus {
		self.status
	}

	/// Largest `limit.hits` across every item of every rule.
	pub fn maximum_hits(&self) -> u32 {
		self.maximum_hits
	}

	/// Every item of every rule, paired with its rule.
	pub fn items(&self) -> impl Iterator<Item = (&Rule, &RuleItem)> {
		self.rules.iter().flat_map(|rule| rule.items().iter().map(move |item| (rule, item)))
	}

	/// Longest restriction among violated items, preferring the server-reported remaining
	/// restriction over the declared one.
	pub fn violation_restriction(&self) -> Option<Duration> {
		self.items()
			.filter(|(_, item)| item.status() == PolicyStatus::Violation)
			.map(|(_, item)| match item.state().restriction_s {
				0 => item.limit().restriction(),
				_ => item.state().restriction(),
			})
			.max()
	}

	/// Changes between `previous` and this policy.
	pub fn changes_from(&self, previous: &Policy) -> Vec<PolicyChange> {
		change::diff(previous, self)
	}

	/// Rough time needed to push `request_count` requests through the tightest window.
	pub fn estimate_duration(&self, request_count: u32, minimum_delay: StdDuration) -> StdDuration {
		self.items()
			.map(|(_, item)| item.estimate_duration(request_count, minimum_delay))
			.max()
			.unwrap_or(StdDuration::ZERO)
	}
}
