//! Scheduler timing knobs.
//!
//! Every field is optional in serialized form; missing fields fall back to the defaults
//! below, which mirror the spacing the live trade API tolerates.

// self
use crate::{_prelude::*, error::ConfigError};

/// Timing, timeout, and identification settings shared by every policy manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
	/// Added to the safe send time while the policy is comfortably within its limits.
	pub normal_buffer_ms: u64,
	/// Added to the safe send time once the policy is borderline (or worse).
	pub borderline_buffer_ms: u64,
	/// Minimum spacing between two sends scheduled by the same manager.
	pub minimum_interval_ms: u64,
	/// Added on top of `Retry-After` before resending a violated request.
	pub violation_buffer_ms: u64,
	/// Wait applied to a 429 that carries neither `Retry-After` nor a usable restriction.
	pub default_retry_after_s: u64,
	/// Watchdog for every in-flight request and discovery probe.
	pub request_timeout_ms: u64,
	/// How long a manager holds its queue after receiving malformed policy headers.
	pub invalid_policy_backoff_ms: u64,
	/// Period of the aggregated pause-status notification.
	pub status_interval_ms: u64,
	/// Capacity of the notification broadcast channel.
	pub event_capacity: usize,
	/// `User-Agent` applied to requests that do not carry one.
	pub user_agent: Option<String>,
}
impl SchedulerConfig {
	/// Parses a JSON document, reporting the path of the first offending field.
	pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(json);
		let config: Self = serde_path_to_error::deserialize(&mut de)?;

		config.validate()?;

		Ok(config)
	}

	/// Overrides the `User-Agent` header value.
	pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = Some(user_agent.into());

		self
	}

	/// Overrides the watchdog applied to in-flight requests.
	pub fn with_request_timeout(mut self, timeout: StdDuration) -> Self {
		self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

		self
	}

	/// Checks the invariants the scheduler relies on.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.request_timeout_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "request_timeout_ms",
				reason: "the watchdog must be positive",
			});
		}
		if self.status_interval_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "status_interval_ms",
				reason: "the status tick must be positive",
			});
		}
		if self.event_capacity == 0 {
			return Err(ConfigError::Invalid {
				field: "event_capacity",
				reason: "the notification channel needs room for at least one event",
			});
		}
		if self.invalid_policy_backoff_ms == 0 {
			return Err(ConfigError::Invalid {
				field: "invalid_policy_backoff_ms",
				reason: "a malformed policy must suspend the queue for a positive duration",
			});
		}
		if self.user_agent.as_deref().is_some_and(|ua| HeaderValue::from_str(ua).is_err()) {
			return Err(ConfigError::Invalid {
				field: "user_agent",
				reason: "the value is not a valid header value",
			});
		}

		Ok(())
	}

	/// Buffer added while the policy is within its limits.
	pub fn normal_buffer(&self) -> StdDuration {
		StdDuration::from_millis(self.normal_buffer_ms)
	}

	/// Buffer added once the policy is borderline or worse.
	pub fn borderline_buffer(&self) -> StdDuration {
		StdDuration::from_millis(self.borderline_buffer_ms)
	}

	/// Minimum spacing between scheduled sends.
	pub fn minimum_interval(&self) -> StdDuration {
		StdDuration::from_millis(self.minimum_interval_ms)
	}

	/// Buffer added to `Retry-After`.
	pub fn violation_buffer(&self) -> StdDuration {
		StdDuration::from_millis(self.violation_buffer_ms)
	}

	/// Fallback 429 wait.
	pub fn default_retry_after(&self) -> StdDuration {
		StdDuration::from_secs(self.default_retry_after_s)
	}

	/// In-flight watchdog.
	pub fn request_timeout(&self) -> StdDuration {
		StdDuration::from_millis(self.request_timeout_ms)
	}

	/// Suspension after malformed policy headers.
	pub fn invalid_policy_backoff(&self) -> StdDuration {
		StdDuration::from_millis(self.invalid_policy_backoff_ms)
	}

	/// Aggregated status period.
	pub fn status_interval(&self) -> StdDuration {
		StdDuration::from_millis(self.status_interval_ms)
	}
}
impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			normal_buffer_ms: 250,
			borderline_buffer_ms: 2_000,
			minimum_interval_ms: 500,
			violation_buffer_ms: 5_200,
			default_retry_after_s: 60,
			request_timeout_ms: 60_000,
			invalid_policy_backoff_ms: 60_000,
			status_interval_ms: 1_000,
			event_capacity: 256,
			user_agent: None,
		}
	}
}
