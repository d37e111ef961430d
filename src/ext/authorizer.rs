//! Request authorization contracts that let external session components attach credentials
//! to scheduled requests without the scheduler knowing how they were obtained.

// self
use crate::{_prelude::*, http::RequestDescriptor};

/// Attaches credentials to an outbound request just before it is sent.
///
/// Authorization runs at send time rather than submit time, so a request that sat behind a
/// long rate limit pause is signed with whatever token is current when it finally leaves.
pub trait RequestAuthorizer
where
	Self: Send + Sync,
{
	/// Consumes the request and returns it with credentials applied.
	fn authorize(&self, request: RequestDescriptor) -> Result<RequestDescriptor>;
}
impl<F> RequestAuthorizer for F
where
	F: Send + Sync + Fn(RequestDescriptor) -> Result<RequestDescriptor>,
{
	fn authorize(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
		self(request)
	}
}

/// Passes requests through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAuthorization;
impl RequestAuthorizer for NoAuthorization {
	fn authorize(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
		Ok(request)
	}
}

/// Failure raised when a bearer token cannot be encoded as a header value.
#[derive(Debug, ThisError)]
#[error("Bearer token is not a valid header value.")]
pub struct InvalidBearerToken;

/// Applies a static `Authorization: Bearer …` header.
#[derive(Clone)]
pub struct BearerToken(Arc<str>);
impl BearerToken {
	/// Wraps a token string.
	pub fn new(token: impl AsRef<str>) -> Self {
		Self(Arc::from(token.as_ref()))
	}
}
impl Debug for BearerToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("BearerToken(<redacted>)")
	}
}
impl RequestAuthorizer for BearerToken {
	fn authorize(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor> {
		let mut value = HeaderValue::from_str(&format!("Bearer {}", self.0))
			.map_err(|_| Error::authorization(InvalidBearerToken))?;

		value.set_sensitive(true);
		request.headers.insert(header::AUTHORIZATION, value);

		Ok(request)
	}
}
