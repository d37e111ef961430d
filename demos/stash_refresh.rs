//! Demonstrates refreshing a handful of stash tabs through the default reqwest transport.
//!
//! The mock server advertises a `stash-api` policy of 4 hits per 5 seconds. The first request
//! probes the endpoint, then every tab is fetched in submission order with the spacing the
//! policy requires while pause notifications are printed as they arrive.

// crates.io
use color_eyre::Result;
use httpmock::{Method::HEAD, prelude::*};
use url::Url;
// self
use ratelimit_scheduler::{
	RateLimiter,
	event::RateLimitEvent,
	http::{ReqwestTransport, RequestDescriptor},
	id::Endpoint,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let policy_headers = [
		("x-rate-limit-policy", "stash-api"),
		("x-rate-limit-rules", "Account"),
		("x-rate-limit-account", "4:5:30"),
		("x-rate-limit-account-state", "1:5:0"),
	];
	let probe_mock = server
		.mock_async(|when, then| {
			when.method(HEAD).path("/character-window/get-stash-items");

			let mut then = then.status(200);

			for (name, value) in policy_headers {
				then = then.header(name, value);
			}
		})
		.await;
	let stash_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/character-window/get-stash-items");

			let mut then = then.status(200).body("{\"items\":[]}");

			for (name, value) in policy_headers {
				then = then.header(name, value);
			}
		})
		.await;
	let limiter = RateLimiter::builder(ReqwestTransport::default()).build()?;
	let mut events = limiter.subscribe();
	let endpoint = Endpoint::new("get-stash-items")?;
	let pending = (0..6)
		.map(|tab| -> Result<_> {
			let url = Url::parse(&server.url(format!(
				"/character-window/get-stash-items?league=Standard&tabIndex={tab}"
			)))?;

			Ok(limiter.submit(endpoint.clone(), RequestDescriptor::get(url)))
		})
		.collect::<Result<Vec<_>>>()?;
	let printer = tokio::spawn(async move {
		while let Ok(event) = events.recv().await {
			match event {
				RateLimitEvent::Status(status) => println!("{status}"),
				RateLimitEvent::Violation { policy, total } => {
					println!("Policy {policy} was violated ({total} so far).")
				},
				_ => {},
			}
		}
	});

	for (tab, reply) in pending.into_iter().enumerate() {
		let reply = reply.await?;

		println!("Tab {tab}: HTTP {} with {} bytes.", reply.status, reply.body.len());
	}

	probe_mock.assert_async().await;
	stash_mock.assert_hits_async(6).await;
	limiter.shutdown();
	printer.abort();

	Ok(())
}
