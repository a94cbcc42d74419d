//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause reported by a [`TokenFetcher`](crate::TokenFetcher) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified error type for the token cache crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Token fetch failed: {0}")]
	Fetch(#[source] BoxError),
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	HttpStatus { status: http::StatusCode, url: url::Url, body: Option<String> },
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Token request has no token endpoint configured.")]
	MissingTokenUrl,
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Wrap a collaborator failure so it surfaces as [`Error::Fetch`].
	pub fn fetch(err: impl Into<BoxError>) -> Self {
		Self::Fetch(err.into())
	}
}
