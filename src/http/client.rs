//! [`TokenFetcher`] backed by `reqwest`.

// crates.io
use reqwest::Client;
// self
use crate::{
	_prelude::*,
	compose::ComposedRequest,
	fetch::{FetchFuture, TokenFetcher, TokenResponse},
};

/// Default per-request timeout applied by [`HttpTokenFetcher::new`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Posts composed grants to the token endpoint and parses the JSON response.
///
/// Mutual TLS is configured on the underlying [`Client`]; pass one built with an identity
/// through [`HttpTokenFetcher::with_client`] when using [`Composer::Mtls`](crate::Composer).
#[derive(Clone, Debug)]
pub struct HttpTokenFetcher {
	client: Client,
	timeout: Duration,
}
impl HttpTokenFetcher {
	/// Create a fetcher with a default client.
	pub fn new() -> Self {
		Self::with_client(Client::new())
	}

	/// Create a fetcher around a preconfigured client.
	pub fn with_client(client: Client) -> Self {
		Self { client, timeout: DEFAULT_REQUEST_TIMEOUT }
	}

	/// Override the per-request timeout.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	async fn exchange(&self, composed: ComposedRequest) -> Result<TokenResponse> {
		let request = composed.to_http()?;
		let token_url = composed.token_url.ok_or(Error::MissingTokenUrl)?;
		let mut builder = self.client.request(request.method().clone(), token_url.clone());

		for (name, value) in request.headers().iter() {
			builder = builder.header(name, value);
		}

		let start = Instant::now();
		let response = builder.body(request.into_body()).timeout(self.timeout).send().await?;
		let elapsed = start.elapsed();
		let status = response.status();

		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::HttpStatus { status, url: token_url, body });
		}

		let bytes = response.bytes().await?;
		let token: TokenResponse = serde_json::from_slice(&bytes)?;

		tracing::debug!(
			url = %token_url,
			grant_type = %composed.grant_type,
			status = %status,
			elapsed = ?elapsed,
			"token fetch complete"
		);

		Ok(token)
	}
}
impl Default for HttpTokenFetcher {
	fn default() -> Self {
		Self::new()
	}
}
impl TokenFetcher for HttpTokenFetcher {
	fn fetch_token(&self, request: ComposedRequest) -> FetchFuture<'_> {
		Box::pin(self.exchange(request))
	}
}
