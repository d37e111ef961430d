// self
use crate::{
	_prelude::*,
	policy::{PolicyError, PolicyStatus, RuleItem, Window, header},
};

/// A named group of limit windows (e.g. a short and a long window under `Account`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Rule {
	name: String,
	items: Vec<RuleItem>,
	status: PolicyStatus,
	maximum_hits: u32,
}
impl Rule {
	/// Builds a rule from already-paired items.
	pub fn new(name: impl Into<String>, items: Vec<RuleItem>) -> Self {
		let status = items.iter().map(RuleItem::status).max().unwrap_or(PolicyStatus::Unknown);
		let maximum_hits = items.iter().map(|item| item.limit().hits).max().unwrap_or(0);

		Self { name: name.into(), items, status, maximum_hits }
	}

	/// Reads the rule's limit and state headers, pairing items by position.
	pub fn from_headers(name: &str, headers: &HeaderMap) -> Result<Self, PolicyError> {
		let limit_name = header::limit_header_name(name);
		let state_name = header::state_header_name(name);
		let limits = header::split_list(header::required(headers, &limit_name)?)
			.map(str::parse::<Window>)
			.collect::<Result<Vec<_>, _>>()?;
		let states = header::split_list(header::required(headers, &state_name)?)
			.map(str::parse::<Window>)
			.collect::<Result<Vec<_>, _>>()?;

		if limits.len() != states.len() || limits.is_empty() {
			return Err(PolicyError::ItemCountMismatch {
				rule: name.to_owned(),
				limits: limits.len(),
				states: states.len(),
			});
		}

		let items = limits.into_iter().zip(states).map(|(limit, state)| RuleItem::new(limit, state));

		Ok(Self::new(name, items.collect()))
	}

	/// Rule name as advertised by the server.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Items in header order.
	pub fn items(&self) -> &[RuleItem] {
		&self.items
	}

	/// Most severe status among the items.
	pub fn status(&self) -> PolicyStatus {
		self.status
	}

	/// Largest `limit.hits` among the items.
	pub fn maximum_hits(&self) -> u32 {
		self.maximum_hits
	}

	pub(crate) fn limit_header_value(&self) -> String {
		self.items.iter().map(|item| item.limit().to_string()).collect::<Vec<_>>().join(",")
	}

	pub(crate) fn state_header_value(&self) -> String {
		self.items.iter().map(|item| item.state().to_string()).collect::<Vec<_>>().join(",")
	}
}
