//! First-contact policy discovery.

// self
use crate::{
	_prelude::*,
	error::{DiscoveryError, TransportError},
	http::{RedactedHeaders, RequestDescriptor},
	id::Endpoint,
	limiter::{LimiterInner, Route},
	manager::ManagerHandle,
	obs::{self, PolicySpan, RequestOutcome},
	policy::{self, Policy},
};

/// Probes `endpoint` until it is registered or nobody is left waiting for it.
///
/// A failed probe fails the submission that triggered it; later submissions that queued up
/// behind it get a probe of their own.
pub(super) async fn run(
	inner: Arc<LimiterInner>,
	endpoint: Endpoint,
	mut probe: RequestDescriptor,
) {
	let span = PolicySpan::new(endpoint.as_str(), "discovery");

	loop {
		let outcome = span.instrument(probe_policy(&inner, &endpoint, probe)).await;

		match settle(&inner, &endpoint, outcome) {
			Some(next) => probe = next,
			None => break,
		}
	}
}

async fn probe_policy(
	inner: &LimiterInner,
	endpoint: &Endpoint,
	probe: RequestDescriptor,
) -> Result<Arc<ManagerHandle>> {
	let context = &inner.context;
	let probe = context.authorizer.authorize(probe)?;
	let request_headers = probe.headers.clone();
	let timeout = context.config.request_timeout();

	tracing::debug!(method = %probe.method, url = %probe.url, "Probing for the rate limit policy.");

	let reply = match tokio::time::timeout(timeout, context.transport.transmit(probe)).await {
		Ok(reply) => reply?,
		Err(_) => return Err(TransportError::TimedOut { after: timeout }.into()),
	};

	obs::record_request_outcome(
		policy::policy_name(&reply.headers).unwrap_or(endpoint.as_str()),
		RequestOutcome::Probe,
	);

	for (name, value) in policy::rate_limit_headers(&reply.headers) {
		tracing::debug!(%name, %value, "Rate limit header.");
	}

	if !reply.is_success() && !reply.is_violation() {
		tracing::warn!(
			status = reply.status,
			request_headers = ?RedactedHeaders(&request_headers),
			"Probe was rejected."
		);

		return Err(DiscoveryError::UnexpectedStatus {
			endpoint: endpoint.to_string(),
			status: reply.status,
		}
		.into());
	}
	if !policy::has_policy_header(&reply.headers) {
		tracing::error!(
			status = reply.status,
			request_headers = ?RedactedHeaders(&request_headers),
			"Probe reply named no rate limit policy."
		);

		return Err(DiscoveryError::MissingPolicy { endpoint: endpoint.to_string() }.into());
	}

	let policy = Policy::from_headers(&reply.headers)
		.and_then(Policy::ensure_consistent)
		.inspect_err(|e| {
			tracing::error!(error = %e, "Probe reply carried malformed rate limit headers.");
		})?;
	let manager = inner.manager_for_policy(policy.name());

	manager.seed(reply);

	Ok(manager)
}

/// Resolves the endpoint's waiters; returns the next probe when some are left unserved.
fn settle(
	inner: &LimiterInner,
	endpoint: &Endpoint,
	outcome: Result<Arc<ManagerHandle>>,
) -> Option<RequestDescriptor> {
	let mut registry = inner.registry.lock();
	let waiting = match registry.endpoints.remove(endpoint) {
		Some(Route::Discovering(waiting)) => waiting,
		Some(route @ Route::Ready(_)) => {
			registry.endpoints.insert(endpoint.clone(), route);

			return None;
		},
		// Drained by shutdown.
		None => return None,
	};

	if inner.is_closed() {
		for pending in waiting {
			pending.resolve(Err(Error::Shutdown));
		}

		return None;
	}

	match outcome {
		Ok(manager) => {
			tracing::info!(
				%endpoint,
				policy = %manager.name(),
				waiting = waiting.len(),
				"Endpoint registered."
			);

			for pending in waiting {
				manager.queue(pending);
			}

			registry.endpoints.insert(endpoint.clone(), Route::Ready(manager));

			None
		},
		Err(e) => {
			tracing::warn!(%endpoint, error = %e, "Discovery failed.");

			let mut waiting = waiting.into_iter();

			if let Some(first) = waiting.next() {
				first.resolve(Err(e));
			}

			let rest = waiting.filter(|pending| !pending.is_abandoned()).collect::<Vec<_>>();
			let next = rest.first()?.request().probe();

			registry.endpoints.insert(endpoint.clone(), Route::Discovering(rest));

			Some(next)
		},
	}
}
