//! Contract for the collaborator that exchanges a composed grant for a token.
//!
//! The manager never talks to the network itself. It hands a [`ComposedRequest`] to a
//! [`TokenFetcher`] and turns the returned [`TokenResponse`] into a cached
//! [`Token`](crate::Token). Timeouts and retries are the fetcher's business.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, compose::ComposedRequest};

/// Boxed future returned by [`TokenFetcher::fetch_token`].
pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<TokenResponse>> + 'a + Send>>;

/// Performs the token exchange for a composed request.
pub trait TokenFetcher: Send + Sync {
	/// Exchange `request` for a token; failures should map into [`Error::Fetch`] or a more
	/// specific variant.
	fn fetch_token(&self, request: ComposedRequest) -> FetchFuture<'_>;
}
impl<T> TokenFetcher for Arc<T>
where
	T: TokenFetcher + ?Sized,
{
	fn fetch_token(&self, request: ComposedRequest) -> FetchFuture<'_> {
		(**self).fetch_token(request)
	}
}

/// Successful token endpoint response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
	/// Issued access token.
	pub access_token: String,
	/// Token type, normally `Bearer`.
	#[serde(default)]
	pub token_type: Option<String>,
	/// Refresh token, when issued.
	#[serde(default)]
	pub refresh_token: Option<String>,
	/// Space-delimited granted scopes.
	#[serde(default)]
	pub scope: Option<String>,
	/// Lifetime of the access token in seconds.
	#[serde(default)]
	pub expires_in: Option<u64>,
}
