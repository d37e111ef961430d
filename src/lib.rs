//! Server-driven rate limit scheduler: discover header-declared policies on first contact,
//! serialize requests per policy, and recover from violations without bothering callers.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod ext;
pub mod history;
pub mod http;
pub mod id;
pub mod limiter;
pub mod manager;
pub mod obs;
pub mod policy;

pub use limiter::{RateLimitedReply, RateLimiter, RateLimiterBuilder};

mod _prelude {
	pub use std::{
		collections::{HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use ::http::{HeaderMap, HeaderName, HeaderValue, Method, header};
	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use ::http as http_types;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
