//! Demonstrates plugging a custom [`Transport`] into the rate limiter.
//!
//! 1. Implement [`Transport::transmit`] so every reply carries the `X-Rate-Limit-*` headers and
//!    a server-side `date`.
//! 2. Hand the transport to [`RateLimiter::builder`].
//! 3. Watch the limiter pace requests so the in-memory server never rejects one.

// std
use std::sync::{
	Arc,
	atomic::{AtomicUsize, Ordering},
};
// crates.io
use color_eyre::Result;
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
use url::Url;
// self
use ratelimit_scheduler::{
	RateLimiter,
	config::SchedulerConfig,
	error::TransportError,
	http::{ReplyDescriptor, RequestDescriptor, Transport, TransportFuture},
	http_types::{HeaderMap, HeaderName, HeaderValue, header},
	id::Endpoint,
	policy::{self, Window},
};

const LIMIT: Window = Window::new(3, 2, 10);

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = InMemoryServer::default();
	let limiter = RateLimiter::builder(server.clone())
		.config(SchedulerConfig::default().with_user_agent("custom-transport-demo/0.1"))
		.build()?;
	let endpoint = Endpoint::new("public-stash-tabs")?;
	let started = OffsetDateTime::now_utc();
	let mut pending = Vec::new();

	for page in 0..8 {
		let url = Url::parse(&format!("https://api.example.com/public-stash-tabs?id={page}"))?;

		pending.push(limiter.submit(endpoint.clone(), RequestDescriptor::get(url)));
	}
	for (page, reply) in pending.into_iter().enumerate() {
		let reply = reply.await?;
		let elapsed = reply.date - started;

		println!(
			"Page {page}: HTTP {} after {:.2}s ({}).",
			reply.status,
			elapsed.as_seconds_f64(),
			policy::policy_name(&reply.headers).unwrap_or("unlimited")
		);
	}

	println!(
		"Rejected by the server: {}; violations seen by the limiter: {}.",
		server.rejected.load(Ordering::Relaxed),
		limiter.violation_count()
	);

	Ok(())
}

#[derive(Clone, Default)]
struct InMemoryServer {
	hits: Arc<Mutex<Vec<OffsetDateTime>>>,
	rejected: Arc<AtomicUsize>,
}
impl InMemoryServer {
	fn reply(&self) -> ReplyDescriptor {
		let now = OffsetDateTime::now_utc();
		let mut hits = self.hits.lock();
		let window_start = now - Duration::seconds(LIMIT.period_s.into());

		hits.retain(|hit| *hit > window_start);

		let accepted = hits.len() < LIMIT.hits as usize;

		if accepted {
			hits.push(now);
		} else {
			self.rejected.fetch_add(1, Ordering::Relaxed);
		}

		let state = Window::new(hits.len() as u32, LIMIT.period_s, 0);
		let mut headers = HeaderMap::new();

		for (name, value) in [
			(policy::POLICY_HEADER.to_owned(), "public-stash".to_owned()),
			(policy::RULES_HEADER.to_owned(), "Ip".to_owned()),
			(policy::limit_header_name("Ip"), LIMIT.to_string()),
			(policy::state_header_name("Ip"), state.to_string()),
		] {
			if let (Ok(name), Ok(value)) =
				(HeaderName::try_from(name), HeaderValue::try_from(value))
			{
				headers.insert(name, value);
			}
		}

		if accepted {
			ReplyDescriptor::new(200, now).with_headers(headers)
		} else {
			ReplyDescriptor::new(429, now)
				.with_headers(headers)
				.with_header(header::RETRY_AFTER, HeaderValue::from(LIMIT.restriction_s))
		}
	}
}
impl Transport for InMemoryServer {
	fn transmit(&self, _: RequestDescriptor) -> TransportFuture<'_> {
		Box::pin(async move {
			tokio::time::sleep(std::time::Duration::from_millis(40)).await;

			Ok::<_, TransportError>(self.reply())
		})
	}
}
