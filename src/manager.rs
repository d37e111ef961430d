//! Policy manager actor: one FIFO queue, one in-flight request, one history per policy.
//!
//! Each manager is a tokio task that exclusively owns its policy, request history, queue and
//! active slot. Callers talk to it through [`ManagerHandle`]; timers and transmissions run as
//! spawned tasks that report back on an internal channel, so every state transition happens
//! on the actor's own loop.
//!
//! ```text
//! Idle ─activate─▶ Activating ─timer─▶ Sending ─reply─▶ Idle
//!                                         │ 429
//!                                         ▼
//!                                   ViolationWait ─timer─▶ Sending
//! Sending ─malformed headers─▶ Suspended ─timer─▶ Idle
//! ```

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use tokio::{
	sync::{Notify, broadcast, mpsc, oneshot, watch},
	task::JoinHandle,
};
// self
use crate::{
	_prelude::*,
	clock::{self, Clock},
	config::SchedulerConfig,
	error::TransportError,
	event::RateLimitEvent,
	ext::RequestAuthorizer,
	history::RequestHistory,
	http::{ReplyDescriptor, RequestDescriptor, Transport},
	id::{Endpoint, PolicyName},
	obs::{self, PolicySpan, RequestOutcome},
	policy::{self, Policy, PolicyError, PolicyStatus},
};

/// Snapshot a manager publishes after every transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagerStatus {
	/// Current policy, including per-item limit/state/status.
	pub policy: Policy,
	/// Requests waiting behind the active one.
	pub queued: usize,
	/// Whether a request is active (scheduled, in flight, or waiting out a violation).
	pub active: bool,
	/// When the manager's pending timer fires, if it is waiting on one.
	pub next_send: Option<OffsetDateTime>,
	/// HTTP 429 replies this manager has absorbed.
	pub violations: u64,
	/// Timestamps held in history.
	pub history_len: usize,
	/// History capacity.
	pub history_capacity: usize,
}
impl ManagerStatus {
	fn idle(policy: Policy) -> Self {
		Self {
			policy,
			queued: 0,
			active: false,
			next_send: None,
			violations: 0,
			history_len: 0,
			history_capacity: 0,
		}
	}
}

/// Collaborators shared by every manager of one limiter.
#[derive(Clone)]
pub(crate) struct ManagerContext {
	pub(crate) transport: Arc<dyn Transport>,
	pub(crate) authorizer: Arc<dyn RequestAuthorizer>,
	pub(crate) clock: Arc<dyn Clock>,
	pub(crate) config: Arc<SchedulerConfig>,
	pub(crate) events: broadcast::Sender<RateLimitEvent>,
	pub(crate) violations: Arc<AtomicU64>,
	pub(crate) pause: Arc<Notify>,
}
impl ManagerContext {
	pub(crate) fn emit(&self, event: RateLimitEvent) {
		// No subscribers is fine.
		let _ = self.events.send(event);
	}
}

/// A submitted request waiting for (or occupying) a manager's send slot.
pub(crate) struct PendingRequest {
	id: u64,
	endpoint: Endpoint,
	request: RequestDescriptor,
	completion: oneshot::Sender<Result<ReplyDescriptor>>,
}
impl PendingRequest {
	pub(crate) fn new(
		id: u64,
		endpoint: Endpoint,
		request: RequestDescriptor,
	) -> (Self, oneshot::Receiver<Result<ReplyDescriptor>>) {
		let (completion, receiver) = oneshot::channel();

		(Self { id, endpoint, request, completion }, receiver)
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	pub(crate) fn request(&self) -> &RequestDescriptor {
		&self.request
	}

	/// The caller dropped its handle.
	pub(crate) fn is_abandoned(&self) -> bool {
		self.completion.is_closed()
	}

	pub(crate) fn resolve(self, result: Result<ReplyDescriptor>) {
		// A caller that stopped waiting simply never sees the result.
		let _ = self.completion.send(result);
	}
}
impl Debug for PendingRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PendingRequest")
			.field("id", &self.id)
			.field("endpoint", &self.endpoint)
			.field("method", &self.request.method)
			.field("url", &self.request.url.as_str())
			.finish()
	}
}

enum Command {
	Seed(Box<ReplyDescriptor>),
	Queue(PendingRequest),
	Shutdown,
}

enum Internal {
	Fire(u64),
	Reply(Result<ReplyDescriptor, TransportError>),
}

/// Caller-side handle to a running manager.
pub(crate) struct ManagerHandle {
	name: PolicyName,
	commands: mpsc::UnboundedSender<Command>,
	status: watch::Receiver<ManagerStatus>,
}
impl ManagerHandle {
	/// Spawns a manager for `name`; its policy stays [`PolicyStatus::Unknown`] until seeded.
	pub(crate) fn spawn(name: PolicyName, context: ManagerContext) -> Self {
		let (commands, command_rx) = mpsc::unbounded_channel();
		let (internal, internal_rx) = mpsc::unbounded_channel();
		let policy = Policy::unknown(name.clone());
		let (status_tx, status) = watch::channel(ManagerStatus::idle(policy.clone()));
		let span = PolicySpan::new(name.as_str(), "manager");
		let manager = PolicyManager {
			context,
			policy,
			history: RequestHistory::default(),
			queue: VecDeque::new(),
			active: None,
			phase: Phase::Idle,
			last_send: None,
			restricted_until: None,
			violations: 0,
			generation: 0,
			timer: None,
			internal,
			status: status_tx,
		};

		tokio::spawn(span.instrument(manager.run(command_rx, internal_rx)));

		Self { name, commands, status }
	}

	pub(crate) fn name(&self) -> &PolicyName {
		&self.name
	}

	/// Feeds a discovery probe's reply into the manager's policy and history.
	pub(crate) fn seed(&self, reply: ReplyDescriptor) {
		if self.commands.send(Command::Seed(Box::new(reply))).is_err() {
			tracing::warn!(policy = %self.name, "Manager stopped before it could be seeded.");
		}
	}

	/// Appends a request to the manager's FIFO queue.
	pub(crate) fn queue(&self, pending: PendingRequest) {
		if let Err(mpsc::error::SendError(Command::Queue(pending))) =
			self.commands.send(Command::Queue(pending))
		{
			pending.resolve(Err(Error::Shutdown));
		}
	}

	pub(crate) fn status(&self) -> ManagerStatus {
		self.status.borrow().clone()
	}

	pub(crate) fn shutdown(&self) {
		let _ = self.commands.send(Command::Shutdown);
	}
}
impl Debug for ManagerHandle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ManagerHandle").field("name", &self.name).finish()
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
	Idle,
	Activating { send_at: OffsetDateTime },
	Sending,
	ViolationWait { send_at: OffsetDateTime },
	Suspended { until: OffsetDateTime },
}

enum Absorbed {
	Parsed,
	Malformed(PolicyError),
	Missing,
}

struct PolicyManager {
	context: ManagerContext,
	policy: Policy,
	history: RequestHistory,
	queue: VecDeque<PendingRequest>,
	active: Option<PendingRequest>,
	phase: Phase,
	last_send: Option<OffsetDateTime>,
	restricted_until: Option<OffsetDateTime>,
	violations: u64,
	generation: u64,
	timer: Option<JoinHandle<()>>,
	internal: mpsc::UnboundedSender<Internal>,
	status: watch::Sender<ManagerStatus>,
}
impl PolicyManager {
	async fn run(
		mut self,
		mut commands: mpsc::UnboundedReceiver<Command>,
		mut internal: mpsc::UnboundedReceiver<Internal>,
	) {
		loop {
			tokio::select! {
				command = commands.recv() => match command {
					Some(Command::Seed(reply)) => self.on_seed(*reply),
					Some(Command::Queue(pending)) => self.on_queue(pending),
					Some(Command::Shutdown) | None => break,
				},
				Some(event) = internal.recv() => match event {
					Internal::Fire(generation) => self.on_fire(generation),
					Internal::Reply(result) => self.on_reply(result),
				},
			}

			self.publish();
		}

		self.close(&mut commands, &mut internal).await;
	}

	fn on_seed(&mut self, reply: ReplyDescriptor) {
		self.absorb(&reply);

		if reply.is_violation() {
			let wait = self.violation_wait(&reply);

			tracing::warn!(wait = ?wait, "Discovery probe was rejected with HTTP 429.");

			self.count_violation(None);
			self.restrict_until(
				self.context.clock.now() + wait + self.context.config.violation_buffer(),
			);
		}

		self.activate();
	}

	fn on_queue(&mut self, pending: PendingRequest) {
		if pending.is_abandoned() {
			self.abandon(pending);

			return;
		}

		tracing::trace!(request = pending.id, endpoint = %pending.endpoint, "Request queued.");

		self.queue.push_back(pending);
		self.emit_queue_updated();
		self.activate();
	}

	/// Pops the next live request and schedules its send. No-op while a request is active,
	/// while suspended, or when the queue is empty.
	fn activate(&mut self) {
		if self.active.is_some() || self.phase != Phase::Idle {
			return;
		}

		let before = self.queue.len();
		let mut abandoned = Vec::new();

		while let Some(pending) = self.queue.pop_front() {
			if pending.is_abandoned() {
				abandoned.push(pending);

				continue;
			}

			self.active = Some(pending);

			break;
		}
		for pending in abandoned {
			self.abandon(pending);
		}

		if self.queue.len() != before {
			self.emit_queue_updated();
		}

		let Some(active_id) = self.active.as_ref().map(PendingRequest::id) else {
			return;
		};
		let now = self.context.clock.now();
		let config = &self.context.config;
		let buffer = if self.policy.status() >= PolicyStatus::Borderline {
			config.borderline_buffer()
		} else {
			config.normal_buffer()
		};
		let mut send_at = self.history.next_safe_send(&self.policy, now);

		if let Some(restricted) = self.restricted_until {
			send_at = send_at.max(restricted);
		}

		send_at += buffer;

		if let Some(last_send) = self.last_send {
			send_at = send_at.max(last_send + config.minimum_interval());
		}

		tracing::debug!(
			request = active_id,
			status = %self.policy.status(),
			delay = ?clock::until(now, send_at),
			"Request activated."
		);

		self.last_send = Some(send_at);
		self.phase = Phase::Activating { send_at };
		self.schedule(send_at);
	}

	fn on_fire(&mut self, generation: u64) {
		if generation != self.generation {
			return;
		}

		self.timer = None;

		match self.phase {
			Phase::Activating { .. } | Phase::ViolationWait { .. } => self.send(),
			Phase::Suspended { .. } => {
				tracing::info!("Suspension elapsed; resuming the queue.");

				self.phase = Phase::Idle;
				self.activate();
			},
			Phase::Idle | Phase::Sending => {},
		}
	}

	fn send(&mut self) {
		let Some(pending) = self.active.as_ref() else {
			self.phase = Phase::Idle;
			self.activate();

			return;
		};

		if pending.is_abandoned() {
			if let Some(pending) = self.active.take() {
				self.abandon(pending);
			}

			self.phase = Phase::Idle;
			self.activate();

			return;
		}

		let request = match self.context.authorizer.authorize(pending.request.clone()) {
			Ok(request) => request,
			Err(e) => {
				tracing::warn!(request = pending.id, error = %e, "Authorizer rejected the request.");

				self.phase = Phase::Idle;
				self.finish(Err(e));
				self.activate();

				return;
			},
		};

		tracing::debug!(
			request = pending.id,
			method = %request.method,
			url = %request.url,
			"Sending request."
		);
		obs::record_request_outcome(self.policy.name(), RequestOutcome::Sent);

		self.phase = Phase::Sending;

		let transport = Arc::clone(&self.context.transport);
		let timeout = self.context.config.request_timeout();
		let internal = self.internal.clone();
		let span = PolicySpan::new(self.policy.name(), "transmit");

		tokio::spawn(span.instrument(async move {
			let result = match tokio::time::timeout(timeout, transport.transmit(request)).await {
				Ok(result) => result,
				Err(_) => Err(TransportError::TimedOut { after: timeout }),
			};
			let _ = internal.send(Internal::Reply(result));
		}));
	}

	fn on_reply(&mut self, result: Result<ReplyDescriptor, TransportError>) {
		if self.phase != Phase::Sending {
			tracing::warn!(phase = ?self.phase, "Discarding a reply that arrived outside of a send.");

			return;
		}

		self.phase = Phase::Idle;

		let reply = match result {
			Ok(reply) => reply,
			Err(e) => {
				tracing::warn!(error = %e, "Transport failed.");

				self.finish(Err(e.into()));
				self.activate();

				return;
			},
		};
		let previous_status = self.policy.status();
		let absorbed = self.absorb(&reply);

		if reply.is_violation() {
			self.on_violation(&reply, previous_status);

			return;
		}
		if reply.is_success() && self.policy.status() == PolicyStatus::Violation {
			tracing::warn!(
				status = reply.status,
				"Policy reports a violation but the server accepted the request."
			);
		}

		let outcome = self.outcome(reply, &absorbed);

		self.finish(outcome);

		if let Absorbed::Malformed(e) = absorbed {
			self.suspend(&e);
		}

		self.activate();
	}

	/// What the caller of a non-429 reply receives.
	fn outcome(&self, reply: ReplyDescriptor, absorbed: &Absorbed) -> Result<ReplyDescriptor> {
		match absorbed {
			Absorbed::Missing => {
				tracing::error!(
					status = reply.status,
					"Reply on a rate limited route carried no rate limit headers."
				);

				Err(Error::MissingPolicyHeaders {
					policy: self.policy.name().to_string(),
					status: reply.status,
				})
			},
			Absorbed::Parsed | Absorbed::Malformed(_) if reply.is_success() => Ok(reply),
			Absorbed::Parsed | Absorbed::Malformed(_) => Err(Error::UnexpectedStatus {
				policy: self.policy.name().to_string(),
				status: reply.status,
			}),
		}
	}

	fn on_violation(&mut self, reply: &ReplyDescriptor, previous_status: PolicyStatus) {
		let wait = self.violation_wait(reply);
		let now = self.context.clock.now();

		if previous_status < PolicyStatus::Violation {
			tracing::warn!(
				status = %previous_status,
				"Server answered HTTP 429 although the policy was not in violation."
			);
		}

		self.count_violation(self.active.as_ref().map(PendingRequest::id));
		self.restrict_until(now + wait);

		let Some(pending) = self.active.as_ref() else {
			self.activate();

			return;
		};

		if pending.is_abandoned() {
			if let Some(pending) = self.active.take() {
				self.abandon(pending);
			}

			self.activate();

			return;
		}

		let send_at = now + wait + self.context.config.violation_buffer();

		tracing::warn!(
			request = pending.id,
			retry_after = ?wait,
			"Rate limit violated; resending the same request later."
		);

		self.last_send = Some(send_at);
		self.phase = Phase::ViolationWait { send_at };
		self.schedule(send_at);
	}

	/// Updates policy and history from a reply's headers.
	fn absorb(&mut self, reply: &ReplyDescriptor) -> Absorbed {
		let absorbed = if !policy::has_policy_header(&reply.headers) {
			Absorbed::Missing
		} else {
			match Policy::from_headers(&reply.headers).and_then(Policy::ensure_consistent) {
				Ok(policy) => {
					self.update_policy(policy);

					Absorbed::Parsed
				},
				Err(e) => {
					tracing::error!(error = %e, "Rate limit headers are malformed.");

					self.policy = self.policy.invalidated();
					self.context.emit(RateLimitEvent::PolicyUpdated(self.policy.clone()));

					Absorbed::Malformed(e)
				},
			}
		};

		self.history.push(reply.date);

		absorbed
	}

	fn update_policy(&mut self, policy: Policy) {
		if self.policy.status() != PolicyStatus::Unknown {
			for change in policy.changes_from(&self.policy) {
				tracing::warn!(%change, "Rate limit policy changed.");
			}
		}

		let capacity = usize::try_from(policy.maximum_hits()).unwrap_or(usize::MAX);

		if self.history.grow(capacity) {
			tracing::debug!(capacity, "Request history grown.");
		}

		self.policy = policy;
		self.context.emit(RateLimitEvent::PolicyUpdated(self.policy.clone()));
	}

	fn suspend(&mut self, error: &PolicyError) {
		let until = self.context.clock.now() + self.context.config.invalid_policy_backoff();
		let message = format!(
			"Rate limit headers for `{}` are malformed ({error}); holding requests until {until}.",
			self.policy.name()
		);

		tracing::error!(%until, "Suspending the queue after malformed rate limit headers.");

		self.context.emit(RateLimitEvent::Diagnostic {
			policy: self.policy.name().clone(),
			message,
		});
		self.phase = Phase::Suspended { until };
		self.schedule(until);
	}

	fn violation_wait(&self, reply: &ReplyDescriptor) -> StdDuration {
		reply
			.retry_after()
			.or_else(|| {
				self.policy
					.violation_restriction()
					.and_then(|restriction| StdDuration::try_from(restriction).ok())
			})
			.unwrap_or_else(|| self.context.config.default_retry_after())
	}

	fn count_violation(&mut self, request: Option<u64>) {
		self.violations += 1;

		let total = self.context.violations.fetch_add(1, Ordering::Relaxed) + 1;

		tracing::error!(request, total, "Rate limit violation.");
		obs::record_request_outcome(self.policy.name(), RequestOutcome::Violation);

		self.context
			.emit(RateLimitEvent::Violation { policy: self.policy.name().clone(), total });
	}

	fn restrict_until(&mut self, until: OffsetDateTime) {
		self.restricted_until =
			Some(self.restricted_until.map_or(until, |current| current.max(until)));
	}

	/// Arms the single timer, superseding any earlier one.
	fn schedule(&mut self, at: OffsetDateTime) {
		if let Some(timer) = self.timer.take() {
			timer.abort();
		}

		self.generation += 1;

		let generation = self.generation;
		let delay = clock::until(self.context.clock.now(), at);
		let internal = self.internal.clone();

		if !delay.is_zero() {
			self.context
				.emit(RateLimitEvent::Paused { policy: self.policy.name().clone(), until: at });
		}

		self.timer = Some(tokio::spawn(async move {
			tokio::time::sleep(delay).await;

			let _ = internal.send(Internal::Fire(generation));
		}));
	}

	fn finish(&mut self, result: Result<ReplyDescriptor>) {
		let Some(pending) = self.active.take() else {
			return;
		};
		let outcome = if result.is_ok() { RequestOutcome::Delivered } else { RequestOutcome::Failed };

		tracing::trace!(request = pending.id, %outcome, "Request resolved.");
		obs::record_request_outcome(self.policy.name(), outcome);

		pending.resolve(result);
	}

	fn abandon(&self, pending: PendingRequest) {
		tracing::debug!(request = pending.id, "Caller stopped waiting; request dropped.");
		obs::record_request_outcome(self.policy.name(), RequestOutcome::Abandoned);
	}

	fn emit_queue_updated(&self) {
		self.context.emit(RateLimitEvent::QueueUpdated {
			policy: self.policy.name().clone(),
			queued: self.queue.len(),
		});
	}

	fn publish(&self) {
		let next_send = match self.phase {
			Phase::Activating { send_at } | Phase::ViolationWait { send_at } => Some(send_at),
			Phase::Suspended { until } => Some(until),
			Phase::Idle | Phase::Sending => None,
		};

		self.status.send_replace(ManagerStatus {
			policy: self.policy.clone(),
			queued: self.queue.len(),
			active: self.active.is_some(),
			next_send,
			violations: self.violations,
			history_len: self.history.len(),
			history_capacity: self.history.capacity(),
		});

		// Wake the status ticker only once the snapshot it reads is current.
		if next_send.is_some_and(|at| at > self.context.clock.now()) {
			self.context.pause.notify_one();
		}
	}

	/// Fails everything still queued. A request already in flight is left to its reply or
	/// the watchdog, and its caller receives that result.
	async fn close(
		&mut self,
		commands: &mut mpsc::UnboundedReceiver<Command>,
		internal: &mut mpsc::UnboundedReceiver<Internal>,
	) {
		commands.close();

		if let Some(timer) = self.timer.take() {
			timer.abort();
		}

		let in_flight = self.phase == Phase::Sending && self.active.is_some();
		let mut pending: Vec<PendingRequest> =
			if in_flight { Vec::new() } else { self.active.take().into_iter().collect() };

		pending.extend(self.queue.drain(..));

		while let Ok(command) = commands.try_recv() {
			if let Command::Queue(queued) = command {
				pending.push(queued);
			}
		}

		if !pending.is_empty() {
			tracing::debug!(
				requests = pending.len(),
				"Manager shutting down; failing pending requests."
			);
		}

		for pending in pending {
			pending.resolve(Err(Error::Shutdown));
		}

		if in_flight {
			self.publish();

			tracing::debug!("Waiting for the in-flight request before stopping.");

			while let Some(event) = internal.recv().await {
				let Internal::Reply(result) = event else {
					continue;
				};
				let outcome = match result {
					Err(e) => Err(e.into()),
					Ok(reply) => {
						let absorbed = self.absorb(&reply);

						if reply.is_violation() {
							self.count_violation(self.active.as_ref().map(PendingRequest::id));

							Err(Error::Shutdown)
						} else {
							self.outcome(reply, &absorbed)
						}
					},
				};

				self.finish(outcome);

				break;
			}
		}

		self.phase = Phase::Idle;
		self.publish();
	}
}
