//! Header names and raw accessors for the `X-Rate-Limit-*` reply contract.

// self
use crate::{_prelude::*, policy::PolicyError};

/// Header naming the policy that governs the endpoint.
pub const POLICY_HEADER: &str = "x-rate-limit-policy";
/// Header listing the rule names active for the policy.
pub const RULES_HEADER: &str = "x-rate-limit-rules";
/// Common prefix of every rate limit header.
pub const HEADER_PREFIX: &str = "x-rate-limit-";
/// Suffix distinguishing a rule's state header from its limit header.
pub const STATE_SUFFIX: &str = "-state";

/// Name of the header carrying a rule's limit items.
pub fn limit_header_name(rule: &str) -> String {
	format!("{HEADER_PREFIX}{}", rule.to_ascii_lowercase())
}

/// Name of the header carrying a rule's state items.
pub fn state_header_name(rule: &str) -> String {
	format!("{HEADER_PREFIX}{}{STATE_SUFFIX}", rule.to_ascii_lowercase())
}

/// Returns the policy name advertised by the reply, if any.
pub fn policy_name(headers: &HeaderMap) -> Option<&str> {
	headers.get(POLICY_HEADER)?.to_str().ok().map(str::trim).filter(|name| !name.is_empty())
}

/// Returns `true` when the reply advertises a rate limit policy.
pub fn has_policy_header(headers: &HeaderMap) -> bool {
	policy_name(headers).is_some()
}

/// Collects every `X-Rate-Limit-*` header for diagnostics.
pub fn rate_limit_headers(headers: &HeaderMap) -> Vec<(String, String)> {
	headers
		.iter()
		.filter(|(name, _)| name.as_str().starts_with(HEADER_PREFIX))
		.map(|(name, value)| {
			(name.as_str().to_owned(), String::from_utf8_lossy(value.as_bytes()).into_owned())
		})
		.collect()
}

pub(crate) fn required<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, PolicyError> {
	let value =
		headers.get(name).ok_or_else(|| PolicyError::MissingHeader { name: name.to_owned() })?;

	value.to_str().map(str::trim).map_err(|_| PolicyError::NonTextHeader { name: name.to_owned() })
}

pub(crate) fn split_list(value: &str) -> impl Iterator<Item = &str> {
	value.split(',').map(str::trim).filter(|part| !part.is_empty())
}
