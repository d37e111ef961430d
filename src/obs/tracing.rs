// self
use crate::_prelude::*;

/// Future instrumented with a [`PolicySpan`].
pub type InstrumentedPolicy<F> = tracing::instrument::Instrumented<F>;

/// A span builder used by managers and discovery.
#[derive(Clone, Debug)]
pub struct PolicySpan {
	span: tracing::Span,
}
impl PolicySpan {
	/// Creates a new span tagged with the provided policy (or endpoint) + stage.
	pub fn new(policy: &str, stage: &'static str) -> Self {
		Self { span: tracing::info_span!("ratelimit.policy", policy, stage) }
	}

	/// Enters the span for synchronous sections.
	pub fn entered(self) -> PolicySpanGuard {
		PolicySpanGuard { _guard: self.span.entered() }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedPolicy<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}

/// RAII guard returned by [`PolicySpan::entered`].
pub struct PolicySpanGuard {
	_guard: tracing::span::EnteredSpan,
}
impl Debug for PolicySpanGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("PolicySpanGuard(..)")
	}
}
