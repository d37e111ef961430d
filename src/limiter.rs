//! Rate limiter orchestrator: maps endpoints to policy managers and discovers new ones.
//!
//! The first submission to an unknown endpoint triggers a header-only probe. The probe's
//! `X-Rate-Limit-Policy` names the manager that will own the endpoint; endpoints that
//! resolve to the same name share one manager and therefore one budget. Submissions that
//! arrive while a probe is outstanding wait behind it in submission order.

mod discovery;
mod status;

// std
use std::{
	sync::atomic::{AtomicBool, AtomicU64, Ordering},
	task::{Context, Poll},
};
// crates.io
use tokio::{
	sync::{Notify, broadcast, oneshot},
	task::JoinHandle,
};
// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	config::SchedulerConfig,
	event::{PauseStatus, RateLimitEvent},
	ext::{NoAuthorization, RequestAuthorizer},
	http::{ReplyDescriptor, RequestDescriptor, Transport},
	id::{Endpoint, PolicyName},
	manager::{ManagerContext, ManagerHandle, ManagerStatus, PendingRequest},
};

/// Completion handle for a submitted request.
///
/// Resolves once the request's reply arrives (after any number of transparent violation
/// resends) or it fails. Dropping the handle cancels a request that is still queued; a
/// request already in flight completes and its reply is discarded.
#[must_use = "dropping the handle cancels the request"]
#[derive(Debug)]
pub struct RateLimitedReply {
	id: u64,
	receiver: oneshot::Receiver<Result<ReplyDescriptor>>,
}
impl RateLimitedReply {
	/// Monotonic submission id, matching the `request` field in logs.
	pub fn id(&self) -> u64 {
		self.id
	}

	/// Gives up on the request.
	pub fn cancel(self) {
		tracing::trace!(request = self.id, "Request cancelled by caller.");
	}
}
impl Future for RateLimitedReply {
	type Output = Result<ReplyDescriptor>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.receiver)
			.poll(cx)
			.map(|received| received.unwrap_or_else(|_| Err(Error::Shutdown)))
	}
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder {
	transport: Arc<dyn Transport>,
	authorizer: Arc<dyn RequestAuthorizer>,
	clock: Arc<dyn Clock>,
	config: SchedulerConfig,
}
impl RateLimiterBuilder {
	/// Overrides the authorizer applied to every request and probe (defaults to none).
	pub fn authorizer(mut self, authorizer: impl 'static + RequestAuthorizer) -> Self {
		self.authorizer = Arc::new(authorizer);

		self
	}

	/// Overrides the clock (defaults to [`SystemClock`]).
	pub fn clock(mut self, clock: impl 'static + Clock) -> Self {
		self.clock = Arc::new(clock);

		self
	}

	/// Overrides the scheduler configuration.
	pub fn config(mut self, config: SchedulerConfig) -> Self {
		self.config = config;

		self
	}

	/// Validates the configuration and assembles the limiter.
	///
	/// No task is spawned until the first submission, so building outside a runtime is fine.
	pub fn build(self) -> Result<RateLimiter> {
		self.config.validate()?;

		// Validated above.
		let user_agent =
			self.config.user_agent.as_deref().and_then(|ua| HeaderValue::from_str(ua).ok());
		let (events, _) = broadcast::channel(self.config.event_capacity);
		let context = ManagerContext {
			transport: self.transport,
			authorizer: self.authorizer,
			clock: self.clock,
			config: Arc::new(self.config),
			events,
			violations: Arc::new(AtomicU64::new(0)),
			pause: Arc::new(Notify::new()),
		};

		Ok(RateLimiter {
			inner: Arc::new(LimiterInner {
				context,
				user_agent,
				registry: Mutex::new(Registry::default()),
				next_id: AtomicU64::new(1),
				closed: AtomicBool::new(false),
				ticker: Mutex::new(None),
			}),
		})
	}
}
impl Debug for RateLimiterBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiterBuilder")
			.field("clock", &self.clock)
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

/// Schedules requests so no server-declared rate limit is ever knowingly exceeded.
///
/// Cloning is cheap; clones share managers, discovery state, and notifications. Dropping the
/// last clone stops every manager and fails whatever was still pending with
/// [`Error::Shutdown`].
#[derive(Clone)]
pub struct RateLimiter {
	inner: Arc<LimiterInner>,
}
impl RateLimiter {
	/// Starts building a limiter around `transport`.
	pub fn builder(transport: impl Transport) -> RateLimiterBuilder {
		Self::builder_shared(Arc::new(transport))
	}

	/// Starts building a limiter around an already shared transport.
	pub fn builder_shared(transport: Arc<dyn Transport>) -> RateLimiterBuilder {
		RateLimiterBuilder {
			transport,
			authorizer: Arc::new(NoAuthorization),
			clock: Arc::new(SystemClock),
			config: SchedulerConfig::default(),
		}
	}

	/// Queues `request` against `endpoint` and returns its completion handle.
	///
	/// Must be called from within a tokio runtime. The first submission to an endpoint probes
	/// it for its policy; later ones go straight to the owning manager's queue.
	pub fn submit(&self, endpoint: Endpoint, mut request: RequestDescriptor) -> RateLimitedReply {
		let inner = &self.inner;
		let id = inner.next_id.fetch_add(1, Ordering::Relaxed);

		if let Some(user_agent) = &inner.user_agent {
			request.set_default_header(header::USER_AGENT, user_agent);
		}

		let (pending, receiver) = PendingRequest::new(id, endpoint.clone(), request);

		if inner.is_closed() {
			pending.resolve(Err(Error::Shutdown));

			return RateLimitedReply { id, receiver };
		}

		inner.ensure_ticker();

		let mut registry = inner.registry.lock();

		match registry.endpoints.get_mut(&endpoint) {
			Some(Route::Ready(manager)) => manager.queue(pending),
			Some(Route::Discovering(waiting)) => {
				tracing::trace!(request = id, %endpoint, "Waiting for discovery in progress.");

				waiting.push(pending);
			},
			None => {
				let probe = pending.request().probe();

				registry.endpoints.insert(endpoint.clone(), Route::Discovering(vec![pending]));
				drop(registry);

				tokio::spawn(discovery::run(Arc::clone(inner), endpoint, probe));
			},
		}

		RateLimitedReply { id, receiver }
	}

	/// Submits and waits for the reply.
	pub async fn execute(
		&self,
		endpoint: Endpoint,
		request: RequestDescriptor,
	) -> Result<ReplyDescriptor> {
		self.submit(endpoint, request).await
	}

	/// Subscribes to notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<RateLimitEvent> {
		self.inner.context.events.subscribe()
	}

	/// Snapshots of every known policy, ordered by name.
	pub fn policies(&self) -> Vec<ManagerStatus> {
		let mut statuses =
			self.inner.registry.lock().policies.values().map(|m| m.status()).collect::<Vec<_>>();

		statuses.sort_by(|a, b| a.policy.name().cmp(b.policy.name()));

		statuses
	}

	/// Snapshot of the policy governing `endpoint`, once discovered.
	pub fn policy_for(&self, endpoint: &Endpoint) -> Option<ManagerStatus> {
		match self.inner.registry.lock().endpoints.get(endpoint) {
			Some(Route::Ready(manager)) => Some(manager.status()),
			_ => None,
		}
	}

	/// Longest remaining wait across every manager, if any is waiting.
	pub fn pause_status(&self) -> Option<PauseStatus> {
		self.inner.pause_status()
	}

	/// Re-emits [`RateLimitEvent::PolicyUpdated`] for every known policy.
	pub fn refresh_policies(&self) {
		for status in self.policies() {
			self.inner.context.emit(RateLimitEvent::PolicyUpdated(status.policy));
		}
	}

	/// Violations observed since the limiter was built.
	pub fn violation_count(&self) -> u64 {
		self.inner.context.violations.load(Ordering::Relaxed)
	}

	/// Rough time needed to push `request_count` requests through `endpoint`'s policy.
	pub fn estimate(&self, endpoint: &Endpoint, request_count: u32) -> Option<StdDuration> {
		let minimum_interval = self.inner.context.config.minimum_interval();

		self.policy_for(endpoint)
			.map(|status| status.policy.estimate_duration(request_count, minimum_interval))
	}

	/// Stops every manager. Queued and future submissions fail with [`Error::Shutdown`]; a
	/// request already in flight still resolves with its reply.
	pub fn shutdown(&self) {
		self.inner.shutdown();
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let registry = self.inner.registry.lock();

		f.debug_struct("RateLimiter")
			.field("endpoints", &registry.endpoints.len())
			.field("policies", &registry.policies.keys().collect::<Vec<_>>())
			.finish()
	}
}

enum Route {
	Discovering(Vec<PendingRequest>),
	Ready(Arc<ManagerHandle>),
}

#[derive(Default)]
struct Registry {
	endpoints: HashMap<Endpoint, Route>,
	policies: HashMap<PolicyName, Arc<ManagerHandle>>,
}

struct LimiterInner {
	context: ManagerContext,
	user_agent: Option<HeaderValue>,
	registry: Mutex<Registry>,
	next_id: AtomicU64,
	closed: AtomicBool,
	ticker: Mutex<Option<JoinHandle<()>>>,
}
impl LimiterInner {
	fn ensure_ticker(self: &Arc<Self>) {
		let mut ticker = self.ticker.lock();

		if ticker.is_none() {
			*ticker = Some(tokio::spawn(status::run(
				Arc::downgrade(self),
				Arc::clone(&self.context.pause),
				self.context.config.status_interval(),
			)));
		}
	}

	fn is_closed(&self) -> bool {
		self.closed.load(Ordering::Acquire)
	}

	/// Returns (and spawns on demand) the manager owning `name`.
	fn manager_for_policy(&self, name: &PolicyName) -> Arc<ManagerHandle> {
		let mut registry = self.registry.lock();

		Arc::clone(registry.policies.entry(name.clone()).or_insert_with(|| {
			tracing::info!(policy = %name, "Creating policy manager.");

			Arc::new(ManagerHandle::spawn(name.clone(), self.context.clone()))
		}))
	}

	fn pause_status(&self) -> Option<PauseStatus> {
		let now = self.context.clock.now();
		let registry = self.registry.lock();

		status::longest_pause(now, registry.policies.values().map(|manager| manager.status()))
	}

	fn shutdown(&self) {
		if self.closed.swap(true, Ordering::AcqRel) {
			return;
		}

		tracing::debug!("Rate limiter shutting down.");

		let mut registry = self.registry.lock();

		for manager in registry.policies.values() {
			manager.shutdown();
		}
		for (_, route) in registry.endpoints.drain() {
			if let Route::Discovering(waiting) = route {
				for pending in waiting {
					pending.resolve(Err(Error::Shutdown));
				}
			}
		}

		registry.policies.clear();

		if let Some(ticker) = self.ticker.lock().take() {
			ticker.abort();
		}
	}
}
impl Drop for LimiterInner {
	fn drop(&mut self) {
		if let Some(ticker) = self.ticker.get_mut().take() {
			ticker.abort();
		}
	}
}
