// self
use crate::obs::RequestOutcome;

/// Records a request transition via the global metrics recorder (when enabled).
pub fn record_request_outcome(policy: &str, outcome: RequestOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"ratelimit_request_total",
			"policy" => policy.to_owned(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (policy, outcome);
	}
}
