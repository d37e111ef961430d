mod common;

// std
use std::time::Duration as StdDuration;
// self
use common::*;
use ratelimit_scheduler::{
	RateLimiter,
	config::SchedulerConfig,
	error::{DiscoveryError, Error, TransportError},
	ext::BearerToken,
	http::RequestDescriptor,
	http_types::header,
	policy::PolicyError,
};

#[tokio::test(start_paused = true)]
async fn unknown_routes_fail_discovery() {
	let api = trade_api();
	let limiter = limiter(&api);
	let err = limiter
		.execute(endpoint("/missing"), request("/missing", 0))
		.await
		.expect_err("A 404 probe should fail discovery.");

	assert!(matches!(err, Error::Discovery(DiscoveryError::UnexpectedStatus { status: 404, .. })));
	assert!(limiter.policy_for(&endpoint("/missing")).is_none());
	assert!(api.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn routes_without_a_policy_fail_discovery() {
	let api = trade_api().with_unlimited_route("/leagues");
	let limiter = limiter(&api);
	let err = limiter
		.execute(endpoint("/leagues"), request("/leagues", 0))
		.await
		.expect_err("A probe without a policy header should fail discovery.");

	assert!(matches!(err, Error::Discovery(DiscoveryError::MissingPolicy { .. })));
	assert!(limiter.policies().is_empty());
}

#[tokio::test(start_paused = true)]
async fn malformed_probes_leave_the_endpoint_unregistered() {
	let api = trade_api();
	let limiter = limiter(&api);

	api.script_probe("/stash", Scripted::Malformed);

	let err = limiter
		.execute(endpoint("/stash"), request("/stash", 0))
		.await
		.expect_err("Malformed probe headers should fail discovery.");

	assert!(matches!(err, Error::MalformedPolicy(_)));
	assert!(limiter.policy_for(&endpoint("/stash")).is_none());

	limiter
		.execute(endpoint("/stash"), request("/stash", 1))
		.await
		.expect("The next submission should probe again and succeed.");

	assert_eq!(api.probes().len(), 2);
	assert_eq!(api.request_sequence(), vec![1]);
}

#[tokio::test(start_paused = true)]
async fn mismatched_state_periods_fail_discovery() {
	let api = trade_api();
	let limiter = limiter(&api);

	api.script_probe("/stash", Scripted::Inconsistent);

	let err = limiter
		.execute(endpoint("/stash"), request("/stash", 0))
		.await
		.expect_err("A state tracking the wrong window should fail discovery.");

	assert!(matches!(err, Error::MalformedPolicy(PolicyError::PeriodMismatch { index: 0, .. })));
	assert!(limiter.policy_for(&endpoint("/stash")).is_none());
	assert!(api.requests().is_empty());
}

#[tokio::test(start_paused = true)]
async fn waiters_behind_a_failed_probe_get_their_own() {
	let api = trade_api();
	let limiter = limiter(&api);

	api.script_probe("/stash", Scripted::Bare(503));

	let first = limiter.submit(endpoint("/stash"), request("/stash", 0));
	let second = limiter.submit(endpoint("/stash"), request("/stash", 1));
	let third = limiter.submit(endpoint("/stash"), request("/stash", 2));
	let err = first.await.expect_err("The request that triggered the probe shares its failure.");

	assert!(matches!(err, Error::Discovery(DiscoveryError::UnexpectedStatus { status: 503, .. })));

	second.await.expect("A fresh probe should register the endpoint.");
	third.await.expect("Later waiters ride on the fresh probe.");

	assert_eq!(api.probes().len(), 2);
	assert_eq!(api.request_sequence(), vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn rejected_probes_still_register_the_policy() {
	let api = trade_api();
	let limiter = limiter(&api);

	api.script_probe("/stash", Scripted::Violation { retry_after: 3 });

	limiter
		.execute(endpoint("/stash"), request("/stash", 0))
		.await
		.expect("The request should wait out the restriction and succeed.");

	let requests = api.requests();

	assert_eq!(limiter.violation_count(), 1);
	assert_eq!(api.rejected(), 0);
	assert!(requests[0].at - api.probes()[0].at >= millis(8_200));
}

#[tokio::test(start_paused = true)]
async fn probes_time_out() {
	let api = trade_api();
	let limiter = limiter_with(
		&api,
		SchedulerConfig::default().with_request_timeout(StdDuration::from_secs(5)),
	);

	api.script_probe("/stash", Scripted::Hang);

	let err = limiter
		.execute(endpoint("/stash"), request("/stash", 0))
		.await
		.expect_err("A hung probe should hit the watchdog.");

	assert!(matches!(err, Error::Transport(TransportError::TimedOut { .. })));
}

#[tokio::test(start_paused = true)]
async fn user_agent_and_credentials_reach_every_request() {
	let api = trade_api();
	let limiter = RateLimiter::builder(api.clone())
		.clock(api.clock())
		.config(SchedulerConfig::default().with_user_agent("acquisition-tests/1.0"))
		.authorizer(BearerToken::new("session-token"))
		.build()
		.expect("Limiter should build.");

	for seq in 0..2 {
		limiter
			.execute(endpoint("/stash"), request("/stash", seq))
			.await
			.expect("Request should complete.");
	}

	let received = api.received();

	assert_eq!(received.len(), 3);

	for request in received {
		assert_eq!(request.headers[header::USER_AGENT], "acquisition-tests/1.0");
		assert_eq!(request.headers[header::AUTHORIZATION], "Bearer session-token");
	}
}

#[tokio::test(start_paused = true)]
async fn authorizer_failures_surface_before_sending() {
	let api = trade_api();
	let limiter = RateLimiter::builder(api.clone())
		.clock(api.clock())
		.authorizer(|request: RequestDescriptor| {
			if request.url.query().is_some_and(|query| query.contains("seq=1")) {
				Err(Error::authorization(std::io::Error::other("session expired")))
			} else {
				Ok(request)
			}
		})
		.build()
		.expect("Limiter should build.");
	let first = limiter.submit(endpoint("/stash"), request("/stash", 0));
	let second = limiter.submit(endpoint("/stash"), request("/stash", 1));
	let third = limiter.submit(endpoint("/stash"), request("/stash", 2));

	first.await.expect("Authorized request should complete.");

	let err = second.await.expect_err("Authorizer failure should reach the caller.");

	assert!(matches!(err, Error::Authorization { .. }));

	third.await.expect("The queue should continue after an authorization failure.");

	assert_eq!(api.request_sequence(), vec![0, 2]);
}

#[test]
fn invalid_configuration_is_rejected_at_build_time() {
	let api_config = SchedulerConfig { event_capacity: 0, ..SchedulerConfig::default() };
	let err = RateLimiter::builder(NeverCalled)
		.config(api_config)
		.build()
		.expect_err("Zero event capacity should be rejected.");

	assert!(matches!(err, Error::Config(_)));
}

struct NeverCalled;
impl ratelimit_scheduler::http::Transport for NeverCalled {
	fn transmit(&self, _: RequestDescriptor) -> ratelimit_scheduler::http::TransportFuture<'_> {
		Box::pin(async { Err(TransportError::network(std::io::Error::other("unreachable"))) })
	}
}
