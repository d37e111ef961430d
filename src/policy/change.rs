// self
use crate::{
	_prelude::*,
	policy::{Policy, Window},
};

/// A difference between two successive versions of the same policy.
///
/// The server may tighten or relax its contract between any two replies; managers log every
/// change they observe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PolicyChange {
	/// The policy name changed.
	Renamed {
		/// Previous name.
		from: String,
		/// New name.
		to: String,
	},
	/// The number of rules changed.
	RuleCount {
		/// Previous rule count.
		from: usize,
		/// New rule count.
		to: usize,
	},
	/// A rule at the same position now has a different name.
	RuleRenamed {
		/// Previous rule name.
		from: String,
		/// New rule name.
		to: String,
	},
	/// A rule now has a different number of items.
	ItemCount {
		/// Rule name.
		rule: String,
		/// Previous item count.
		from: usize,
		/// New item count.
		to: usize,
	},
	/// A limit window changed.
	Limit {
		/// Rule name.
		rule: String,
		/// Item position within the rule.
		index: usize,
		/// Previous limit.
		from: Window,
		/// New limit.
		to: Window,
	},
}
impl Display for PolicyChange {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Renamed { from, to } => write!(f, "policy renamed from `{from}` to `{to}`"),
			Self::RuleCount { from, to } => write!(f, "rule count went from {from} to {to}"),
			Self::RuleRenamed { from, to } => write!(f, "rule `{from}` renamed to `{to}`"),
			Self::ItemCount { rule, from, to } =>
				write!(f, "rule `{rule}` went from {from} to {to} items"),
			Self::Limit { rule, index, from, to } =>
				write!(f, "rule `{rule}` item #{index} limit changed from {from} to {to}"),
		}
	}
}

pub(crate) fn diff(previous: &Policy, current: &Policy) -> Vec<PolicyChange> {
	let mut changes = Vec::new();

	if previous.name() != current.name() {
		changes.push(PolicyChange::Renamed {
			from: previous.name().to_string(),
			to: current.name().to_string(),
		});
	}
	if previous.rules().len() != current.rules().len() {
		changes.push(PolicyChange::RuleCount {
			from: previous.rules().len(),
			to: current.rules().len(),
		});

		return changes;
	}

	for (old_rule, new_rule) in previous.rules().iter().zip(current.rules()) {
		if old_rule.name() != new_rule.name() {
			changes.push(PolicyChange::RuleRenamed {
				from: old_rule.name().to_owned(),
				to: new_rule.name().to_owned(),
			});
		}
		if old_rule.items().len() != new_rule.items().len() {
			changes.push(PolicyChange::ItemCount {
				rule: new_rule.name().to_owned(),
				from: old_rule.items().len(),
				to: new_rule.items().len(),
			});

			continue;
		}

		for (index, (old_item, new_item)) in old_rule.items().iter().zip(new_rule.items()).enumerate()
		{
			if old_item.limit() != new_item.limit() {
				changes.push(PolicyChange::Limit {
					rule: new_rule.name().to_owned(),
					index,
					from: *old_item.limit(),
					to: *new_item.limit(),
				});
			}
		}
	}

	changes
}
