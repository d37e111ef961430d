//! In-process rate limited API shared by the integration tests.
//!
//! Routes map request paths to named policies. Every accepted hit is recorded against the
//! policy's sliding windows; a hit that would overflow any window is rejected with HTTP 429
//! and starts that window's restriction. Replies are dated with the simulated clock so the
//! scheduler sees exactly what the server counted.

#![allow(dead_code)]

// std
use std::{
	collections::{HashMap, VecDeque},
	io::{Error as IoError, ErrorKind},
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration as StdDuration,
};
// crates.io
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime, macros::datetime};
use tokio::sync::broadcast;
// self
use ratelimit_scheduler::{
	RateLimiter,
	clock::{Clock, TokioClock},
	config::SchedulerConfig,
	error::TransportError,
	event::RateLimitEvent,
	http::{ReplyDescriptor, RequestDescriptor, Transport, TransportFuture},
	http_types::{HeaderMap, HeaderName, HeaderValue, Method, header},
	id::Endpoint,
	policy::{self, Window},
	url::Url,
};

/// Simulated wall-clock origin.
pub const EPOCH: OffsetDateTime = datetime!(2025-06-01 12:00:00 UTC);
/// Base URL of the simulated API.
pub const BASE: &str = "https://api.example.com";

/// One request as observed by the server.
#[derive(Clone, Debug)]
pub struct Received {
	pub method: Method,
	pub path: String,
	pub seq: Option<u32>,
	pub at: OffsetDateTime,
	pub status: Option<u16>,
	pub headers: HeaderMap,
}
impl Received {
	pub fn is_probe(&self) -> bool {
		self.method == Method::HEAD
	}
}

/// Canned behavior for the next request to a path, taking precedence over the windows.
#[derive(Clone, Debug)]
pub enum Scripted {
	/// HTTP 429 with `Retry-After` and a matching restriction.
	Violation { retry_after: u32 },
	/// The given status with regular policy headers; the hit is counted.
	Status(u16),
	/// HTTP 200 whose rule items cannot be parsed; the hit is counted.
	Malformed,
	/// HTTP 200 whose state items track a window three times the declared period; the hit is
	/// counted.
	Inconsistent,
	/// The given status without any rate limit header.
	Bare(u16),
	/// Connection reset before a reply.
	Disconnect,
	/// Never replies.
	Hang,
}

enum Route {
	Limited(String),
	Unlimited,
}

struct PolicyState {
	rules: Vec<(String, Vec<Window>)>,
	hits: Vec<OffsetDateTime>,
	restricted_until: Option<OffsetDateTime>,
}
impl PolicyState {
	fn count(&self, window: &Window, now: OffsetDateTime) -> u32 {
		let start = now - window.period();

		self.hits.iter().filter(|hit| **hit > start).count() as u32
	}

	fn restriction_left(&self, now: OffsetDateTime) -> Option<Duration> {
		self.restricted_until.map(|until| until - now).filter(|left| left.is_positive())
	}

	fn headers(&self, name: &str, now: OffsetDateTime) -> HeaderMap {
		let restriction = self.restriction_left(now).map_or(0, ceil_secs);
		let mut headers = HeaderMap::new();

		put(&mut headers, policy::POLICY_HEADER, name);
		put(
			&mut headers,
			policy::RULES_HEADER,
			&self.rules.iter().map(|(rule, _)| rule.as_str()).collect::<Vec<_>>().join(","),
		);

		for (rule, windows) in &self.rules {
			let limits = windows.iter().map(Window::to_string).collect::<Vec<_>>().join(",");
			let states = windows
				.iter()
				.map(|window| {
					Window::new(self.count(window, now), window.period_s, restriction.try_into().unwrap()).to_string()
				})
				.collect::<Vec<_>>()
				.join(",");

			put(&mut headers, &policy::limit_header_name(rule), &limits);
			put(&mut headers, &policy::state_header_name(rule), &states);
		}

		headers
	}
}

#[derive(Default)]
struct State {
	routes: HashMap<String, Route>,
	policies: HashMap<String, PolicyState>,
	scripts: HashMap<(String, bool), VecDeque<Scripted>>,
	received: Vec<Received>,
	rejected: usize,
}

enum Response {
	Reply(ReplyDescriptor),
	Fail(TransportError),
	Hang,
}

struct InFlight<'a>(&'a AtomicUsize);
impl Drop for InFlight<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

/// Cheaply cloneable handle to the simulated server.
#[derive(Clone)]
pub struct SimulatedApi {
	clock: TokioClock,
	latency: StdDuration,
	state: Arc<Mutex<State>>,
	in_flight: Arc<AtomicUsize>,
	max_in_flight: Arc<AtomicUsize>,
}
impl SimulatedApi {
	/// Must be called inside a runtime with paused time.
	pub fn new() -> Self {
		Self {
			clock: TokioClock::starting_at(EPOCH),
			latency: StdDuration::ZERO,
			state: Arc::default(),
			in_flight: Arc::default(),
			max_in_flight: Arc::default(),
		}
	}

	pub fn with_latency(mut self, latency: StdDuration) -> Self {
		self.latency = latency;

		self
	}

	/// Declares a policy governed by a single rule.
	pub fn with_policy(self, name: &str, rule: &str, windows: &[Window]) -> Self {
		self.state.lock().policies.insert(
			name.to_owned(),
			PolicyState {
				rules: vec![(rule.to_owned(), windows.to_vec())],
				hits: Vec::new(),
				restricted_until: None,
			},
		);

		self
	}

	/// Adds another rule to a declared policy.
	pub fn with_rule(self, name: &str, rule: &str, windows: &[Window]) -> Self {
		self.state
			.lock()
			.policies
			.get_mut(name)
			.expect("Policy should be declared before adding rules.")
			.rules
			.push((rule.to_owned(), windows.to_vec()));

		self
	}

	/// Routes `path` to the policy `name`.
	pub fn with_route(self, path: &str, name: &str) -> Self {
		self.state.lock().routes.insert(path.to_owned(), Route::Limited(name.to_owned()));

		self
	}

	/// Serves `path` without any rate limit headers.
	pub fn with_unlimited_route(self, path: &str) -> Self {
		self.state.lock().routes.insert(path.to_owned(), Route::Unlimited);

		self
	}

	/// Replaces the windows of one rule, keeping every recorded hit.
	pub fn set_windows(&self, name: &str, rule: &str, windows: &[Window]) {
		let mut state = self.state.lock();
		let policy =
			state.policies.get_mut(name).expect("Policy should be declared before it changes.");

		for (existing, current) in &mut policy.rules {
			if existing.as_str() == rule {
				*current = windows.to_vec();
			}
		}
	}

	/// Queues a canned reply for the next regular request to `path`.
	pub fn script(&self, path: &str, scripted: Scripted) {
		self.state.lock().scripts.entry((path.to_owned(), false)).or_default().push_back(scripted);
	}

	/// Queues a canned reply for the next discovery probe to `path`.
	pub fn script_probe(&self, path: &str, scripted: Scripted) {
		self.state.lock().scripts.entry((path.to_owned(), true)).or_default().push_back(scripted);
	}

	pub fn clock(&self) -> TokioClock {
		self.clock
	}

	pub fn now(&self) -> OffsetDateTime {
		self.clock.now()
	}

	/// Everything the server received, in arrival order.
	pub fn received(&self) -> Vec<Received> {
		self.state.lock().received.clone()
	}

	/// Regular (non-probe) requests, in arrival order.
	pub fn requests(&self) -> Vec<Received> {
		self.received().into_iter().filter(|received| !received.is_probe()).collect()
	}

	/// Discovery probes, in arrival order.
	pub fn probes(&self) -> Vec<Received> {
		self.received().into_iter().filter(Received::is_probe).collect()
	}

	/// `seq` query values of regular requests, in arrival order.
	pub fn request_sequence(&self) -> Vec<u32> {
		self.requests().into_iter().filter_map(|received| received.seq).collect()
	}

	/// Requests the windows themselves rejected with HTTP 429 (scripted violations excluded).
	pub fn rejected(&self) -> usize {
		self.state.lock().rejected
	}

	/// Highest number of regular requests the server ever had in flight at once.
	pub fn max_in_flight(&self) -> usize {
		self.max_in_flight.load(Ordering::SeqCst)
	}

	fn respond(&self, request: &RequestDescriptor) -> Response {
		let now = self.clock.now();
		let path = request.url.path().to_owned();
		let probe = request.method == Method::HEAD;
		let mut state = self.state.lock();
		let scripted =
			state.scripts.get_mut(&(path.clone(), probe)).and_then(VecDeque::pop_front);
		let response = match scripted {
			Some(Scripted::Disconnect) => Response::Fail(TransportError::Io(IoError::new(
				ErrorKind::ConnectionReset,
				"connection reset by peer",
			))),
			Some(Scripted::Hang) => Response::Hang,
			Some(Scripted::Bare(status)) => Response::Reply(ReplyDescriptor::new(status, now)),
			Some(scripted) => Response::Reply(state.scripted(&path, scripted, now)),
			None => Response::Reply(state.evaluate(&path, now)),
		};

		state.received.push(Received {
			method: request.method.clone(),
			path,
			seq: request
				.url
				.query_pairs()
				.find(|(key, _)| key == "seq")
				.and_then(|(_, value)| value.parse().ok()),
			at: now,
			status: match &response {
				Response::Reply(reply) => Some(reply.status),
				Response::Fail(_) | Response::Hang => None,
			},
			headers: request.headers.clone(),
		});

		response
	}
}
impl Transport for SimulatedApi {
	fn transmit(&self, request: RequestDescriptor) -> TransportFuture<'_> {
		Box::pin(async move {
			let _in_flight = (request.method != Method::HEAD).then(|| {
				let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;

				self.max_in_flight.fetch_max(current, Ordering::SeqCst);

				InFlight(&self.in_flight)
			});
			let response = self.respond(&request);

			if !self.latency.is_zero() {
				tokio::time::sleep(self.latency).await;
			}

			match response {
				Response::Reply(reply) => Ok(reply),
				Response::Fail(e) => Err(e),
				Response::Hang => std::future::pending().await,
			}
		})
	}
}
impl State {
	fn evaluate(&mut self, path: &str, now: OffsetDateTime) -> ReplyDescriptor {
		let name = match self.routes.get(path) {
			Some(Route::Limited(name)) => name.clone(),
			Some(Route::Unlimited) => return ReplyDescriptor::new(200, now),
			None => return ReplyDescriptor::new(404, now),
		};
		let policy = self.policies.get_mut(&name).expect("Routes should point at declared policies.");

		if let Some(left) = policy.restriction_left(now) {
			self.rejected += 1;

			return violation(policy.headers(&name, now), ceil_secs(left), now);
		}

		let overflow = policy
			.rules
			.iter()
			.flat_map(|(_, windows)| windows.iter())
			.find(|window| policy.count(window, now) >= window.hits)
			.copied();

		if let Some(window) = overflow {
			self.rejected += 1;
			policy.restricted_until = Some(now + window.restriction());

			return violation(policy.headers(&name, now), window.restriction_s.into(), now);
		}

		policy.hits.push(now);

		ReplyDescriptor::new(200, now).with_headers(policy.headers(&name, now))
	}

	fn scripted(&mut self, path: &str, scripted: Scripted, now: OffsetDateTime) -> ReplyDescriptor {
		let Some(Route::Limited(name)) = self.routes.get(path) else {
			panic!("Scripted replies need a rate limited route.");
		};
		let name = name.clone();
		let policy = self.policies.get_mut(&name).expect("Routes should point at declared policies.");

		match scripted {
			Scripted::Violation { retry_after } => {
				policy.restricted_until = Some(now + Duration::seconds(retry_after.into()));

				violation(policy.headers(&name, now), retry_after.into(), now)
			},
			Scripted::Status(status) => {
				policy.hits.push(now);

				ReplyDescriptor::new(status, now).with_headers(policy.headers(&name, now))
			},
			Scripted::Malformed => {
				policy.hits.push(now);

				let mut headers = policy.headers(&name, now);

				for (rule, _) in &policy.rules {
					put(&mut headers, &policy::limit_header_name(rule), "many:per:minute");
				}

				ReplyDescriptor::new(200, now).with_headers(headers)
			},
			Scripted::Inconsistent => {
				policy.hits.push(now);

				let mut headers = policy.headers(&name, now);

				for (rule, windows) in &policy.rules {
					let states = windows
						.iter()
						.map(|window| {
							Window::new(policy.count(window, now), window.period_s * 3, 0).to_string()
						})
						.collect::<Vec<_>>()
						.join(",");

					put(&mut headers, &policy::state_header_name(rule), &states);
				}

				ReplyDescriptor::new(200, now).with_headers(headers)
			},
			Scripted::Bare(_) | Scripted::Disconnect | Scripted::Hang => {
				unreachable!("Handled before policy evaluation.")
			},
		}
	}
}

fn violation(headers: HeaderMap, retry_after: u64, now: OffsetDateTime) -> ReplyDescriptor {
	ReplyDescriptor::new(429, now)
		.with_headers(headers)
		.with_header(header::RETRY_AFTER, HeaderValue::from(retry_after))
}

fn ceil_secs(duration: Duration) -> u64 {
	let whole = duration.whole_seconds().max(0) as u64;

	whole + u64::from(duration.subsec_nanoseconds() > 0)
}

fn put(headers: &mut HeaderMap, name: &str, value: &str) {
	headers.insert(
		HeaderName::from_bytes(name.as_bytes()).expect("Header name should be valid."),
		HeaderValue::from_str(value).expect("Header value should be valid."),
	);
}

/// Declares `trade-api` (5 hits per 10 s, 60 s restriction) serving `/stash`.
pub fn trade_api() -> SimulatedApi {
	SimulatedApi::new()
		.with_policy("trade-api", "Account", &[Window::new(5, 10, 60)])
		.with_route("/stash", "trade-api")
}

pub fn limiter(api: &SimulatedApi) -> RateLimiter {
	limiter_with(api, SchedulerConfig::default())
}

pub fn limiter_with(api: &SimulatedApi, config: SchedulerConfig) -> RateLimiter {
	RateLimiter::builder(api.clone())
		.clock(api.clock())
		.config(config)
		.build()
		.expect("Test configuration should be valid.")
}

pub fn endpoint(path: &str) -> Endpoint {
	Endpoint::new(path).expect("Endpoint fixture should be valid.")
}

pub fn request(path: &str, seq: u32) -> RequestDescriptor {
	RequestDescriptor::get(
		Url::parse(&format!("{BASE}{path}?seq={seq}")).expect("Request fixture URL should parse."),
	)
}

pub fn millis(value: i64) -> Duration {
	Duration::milliseconds(value)
}

/// Everything broadcast so far that the receiver has not consumed.
pub fn drain(events: &mut broadcast::Receiver<RateLimitEvent>) -> Vec<RateLimitEvent> {
	let mut seen = Vec::new();

	while let Ok(event) = events.try_recv() {
		seen.push(event);
	}

	seen
}

pub async fn sleep(seconds: u64) {
	tokio::time::sleep(StdDuration::from_secs(seconds)).await;
}
