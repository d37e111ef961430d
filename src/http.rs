//! Transport primitives for rate limited requests.
//!
//! The scheduler never performs I/O itself. Callers hand it fully built
//! [`RequestDescriptor`]s and an injected [`Transport`] that turns each into a
//! [`ReplyDescriptor`]. The reply's `date` is the server-reported timestamp fed into
//! request history, so transports should take it from the `Date` header whenever
//! one is present.

// crates.io
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// Boxed future returned by [`Transport::transmit`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ReplyDescriptor, TransportError>> + 'a + Send>>;

/// Capability that performs the actual HTTP exchange.
///
/// Exactly one real implementation ([`ReqwestTransport`]) ships with the crate; tests and
/// embedders substitute their own. Implementations must be `Send + Sync + 'static` so a
/// single instance can be shared by every policy manager.
pub trait Transport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and resolves with the server's reply, whatever its status.
	///
	/// Only failures that prevent a reply from arriving (DNS, TCP, TLS, I/O) should surface
	/// as [`TransportError`]; HTTP 429 and other error statuses are ordinary replies.
	fn transmit(&self, request: RequestDescriptor) -> TransportFuture<'_>;
}

/// An already-built outbound request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestDescriptor {
	/// HTTP method.
	pub method: Method,
	/// Absolute target URL.
	pub url: Url,
	/// Request headers.
	pub headers: HeaderMap,
	/// Request body.
	pub body: Vec<u8>,
}
impl RequestDescriptor {
	/// Creates a request with no headers and an empty body.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, headers: HeaderMap::new(), body: Vec::new() }
	}

	/// Shorthand for a `GET` request.
	pub fn get(url: Url) -> Self {
		Self::new(Method::GET, url)
	}

	/// Adds (or replaces) a header.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Replaces the body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = body.into();

		self
	}

	/// Header-only copy of this request used to discover the route's policy.
	pub fn probe(&self) -> Self {
		Self {
			method: Method::HEAD,
			url: self.url.clone(),
			headers: self.headers.clone(),
			body: Vec::new(),
		}
	}

	/// Inserts `value` under `name` unless the request already carries that header.
	pub(crate) fn set_default_header(&mut self, name: HeaderName, value: &HeaderValue) {
		self.headers.entry(name).or_insert_with(|| value.clone());
	}
}

/// A reply as seen by the scheduler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplyDescriptor {
	/// HTTP status code.
	pub status: u16,
	/// Reply headers.
	pub headers: HeaderMap,
	/// Reply body.
	pub body: Vec<u8>,
	/// Server-reported reply time.
	pub date: OffsetDateTime,
}
impl ReplyDescriptor {
	/// Creates a reply with no headers and an empty body.
	pub fn new(status: u16, date: OffsetDateTime) -> Self {
		Self { status, headers: HeaderMap::new(), body: Vec::new(), date }
	}

	/// Replaces the header map.
	pub fn with_headers(mut self, headers: HeaderMap) -> Self {
		self.headers = headers;

		self
	}

	/// Adds (or replaces) a header.
	pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}

	/// Replaces the body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = body.into();

		self
	}

	/// `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// `true` for HTTP 429.
	pub fn is_violation(&self) -> bool {
		self.status == 429
	}

	/// `Retry-After` as a relative duration.
	///
	/// Accepts delay-seconds or an HTTP-date, the latter measured from this reply's `date`.
	pub fn retry_after(&self) -> Option<StdDuration> {
		let raw = self.headers.get(header::RETRY_AFTER)?.to_str().ok()?.trim();

		if let Ok(secs) = raw.parse::<u64>() {
			return Some(StdDuration::from_secs(secs));
		}

		let moment = parse_http_date(raw)?;
		let delta = moment - self.date;

		if delta.is_positive() {
			StdDuration::try_from(delta).ok()
		} else {
			Some(StdDuration::ZERO)
		}
	}
}

/// Debug view of a header map with credentials masked.
pub struct RedactedHeaders<'a>(pub &'a HeaderMap);
impl Debug for RedactedHeaders<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_map()
			.entries(self.0.iter().map(|(name, value)| {
				let value = if name == header::AUTHORIZATION {
					"<redacted>"
				} else {
					value.to_str().unwrap_or("<binary>")
				};

				(name.as_str(), value)
			}))
			.finish()
	}
}

/// Parses an HTTP-date (`Sun, 06 Nov 1994 08:49:37 GMT`).
pub fn parse_http_date(raw: &str) -> Option<OffsetDateTime> {
	let raw = raw.trim();

	OffsetDateTime::parse(raw, &Rfc2822).ok().or_else(|| {
		let numeric = raw.strip_suffix("GMT").map(|prefix| format!("{prefix}+0000"))?;

		OffsetDateTime::parse(&numeric, &Rfc2822).ok()
	})
}

/// [`Transport`] backed by a shared [`ReqwestClient`].
///
/// Redirects are followed according to the client's own policy; rate limit headers are read
/// from the final reply.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Transport for ReqwestTransport {
	fn transmit(&self, request: RequestDescriptor) -> TransportFuture<'_> {
		Box::pin(async move {
			let RequestDescriptor { method, url, headers, body } = request;
			let response = self.0.request(method, url).headers(headers).body(body).send().await?;
			let status = response.status().as_u16();
			let headers = response.headers().to_owned();
			let date = headers
				.get(header::DATE)
				.and_then(|value| value.to_str().ok())
				.and_then(parse_http_date)
				.unwrap_or_else(OffsetDateTime::now_utc);
			let body = response.bytes().await?.to_vec();

			Ok(ReplyDescriptor { status, headers, body, date })
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros::datetime;
	// self
	use super::*;

	fn url() -> Url {
		Url::parse("https://api.example.com/stash/Standard").expect("Fixture URL should parse.")
	}

	#[test]
	fn probe_keeps_headers_and_drops_body() {
		let request = RequestDescriptor::new(Method::POST, url())
			.with_header(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"))
			.with_body("payload");
		let probe = request.probe();

		assert_eq!(probe.method, Method::HEAD);
		assert_eq!(probe.url, request.url);
		assert_eq!(probe.headers, request.headers);
		assert!(probe.body.is_empty());
	}

	#[test]
	fn default_header_does_not_override() {
		let mut request = RequestDescriptor::get(url())
			.with_header(header::USER_AGENT, HeaderValue::from_static("custom/1.0"));

		request.set_default_header(header::USER_AGENT, &HeaderValue::from_static("fallback/1.0"));

		assert_eq!(request.headers[header::USER_AGENT], "custom/1.0");
	}

	#[test]
	fn retry_after_accepts_seconds_and_dates() {
		let date = datetime!(2025-06-01 12:00:00 UTC);
		let seconds = ReplyDescriptor::new(429, date)
			.with_header(header::RETRY_AFTER, HeaderValue::from_static("8"));

		assert_eq!(seconds.retry_after(), Some(StdDuration::from_secs(8)));

		let http_date = ReplyDescriptor::new(429, date).with_header(
			header::RETRY_AFTER,
			HeaderValue::from_static("Sun, 01 Jun 2025 12:00:30 GMT"),
		);

		assert_eq!(http_date.retry_after(), Some(StdDuration::from_secs(30)));
		assert_eq!(ReplyDescriptor::new(429, date).retry_after(), None);
	}

	#[test]
	fn redacted_headers_mask_credentials() {
		let mut headers = HeaderMap::new();

		headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
		headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

		let rendered = format!("{:?}", RedactedHeaders(&headers));

		assert!(rendered.contains("<redacted>"));
		assert!(rendered.contains("application/json"));
		assert!(!rendered.contains("secret"));
	}
}
