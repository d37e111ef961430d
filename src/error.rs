//! Scheduler-level error types surfaced to callers awaiting rate limited requests.

// self
use crate::{_prelude::*, id::IdentifierError, policy::PolicyError};

/// Scheduler-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical scheduler error exposed by public APIs.
///
/// Rate limit violations never appear here: they are retried internally and only show up
/// as added latency plus a [`RateLimitEvent::Violation`](crate::event::RateLimitEvent)
/// notification.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// First contact with an endpoint failed to reveal its policy.
	#[error(transparent)]
	Discovery(#[from] DiscoveryError),
	/// Transport failure (DNS, TCP, TLS, watchdog timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Rate limit headers were present but could not be interpreted.
	#[error("Rate limit policy headers are malformed.")]
	MalformedPolicy(#[from] PolicyError),
	/// Identifier validation failed.
	#[error(transparent)]
	Identifier(#[from] IdentifierError),

	/// The injected authorizer refused to sign the request.
	#[error("Request authorization failed.")]
	Authorization {
		/// Authorizer-specific failure.
		#[source]
		source: BoxError,
	},
	/// A reply on a rate limited route carried no policy headers.
	#[error("Reply for policy `{policy}` (HTTP {status}) carried no rate limit headers.")]
	MissingPolicyHeaders {
		/// Policy the request was scheduled under.
		policy: String,
		/// HTTP status of the reply.
		status: u16,
	},
	/// The endpoint answered with a non-success status other than 429.
	#[error("Endpoint governed by `{policy}` responded with HTTP {status}.")]
	UnexpectedStatus {
		/// Policy the request was scheduled under.
		policy: String,
		/// HTTP status of the reply.
		status: u16,
	},
	/// The rate limiter shut down before the request was resolved.
	#[error("The rate limiter shut down before the request completed.")]
	Shutdown,
}
impl Error {
	/// Wraps an authorizer failure inside [`Error`].
	pub fn authorization(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Authorization { source: Box::new(src) }
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Configuration document could not be parsed.
	#[error("Scheduler configuration is not valid JSON at `{path}`.")]
	Parse {
		/// JSON path where parsing failed.
		path: String,
		/// Structured parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// A configuration value failed validation.
	#[error("Scheduler configuration field `{field}` is invalid: {reason}.")]
	Invalid {
		/// Offending field.
		field: &'static str,
		/// Validation failure summary.
		reason: &'static str,
	},
}
impl From<serde_path_to_error::Error<serde_json::Error>> for ConfigError {
	fn from(e: serde_path_to_error::Error<serde_json::Error>) -> Self {
		let path = e.path().to_string();

		Self::Parse { path, source: e.into_inner() }
	}
}

/// Failures raised while probing an endpoint for its rate limit policy.
#[derive(Debug, ThisError)]
pub enum DiscoveryError {
	/// The probe succeeded but the reply named no policy.
	#[error("Probe for endpoint `{endpoint}` returned no rate limit policy.")]
	MissingPolicy {
		/// Endpoint being discovered.
		endpoint: String,
	},
	/// The probe was answered with a non-success status.
	#[error("Probe for endpoint `{endpoint}` returned HTTP {status}.")]
	UnexpectedStatus {
		/// Endpoint being discovered.
		endpoint: String,
		/// HTTP status of the probe reply.
		status: u16,
	},
}

/// Transport-level failures (network, IO, watchdog).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling a rate limited endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The in-flight request outlived the watchdog.
	#[error("Request did not complete within {after:?}.")]
	TimedOut {
		/// Watchdog duration that elapsed.
		after: StdDuration,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling a rate limited endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
