//! Token manager coordinating cache lookups, renewal, and fetches.
//!
//! The manager is built once by the host and shared by cloning; every clone talks to the same
//! cache. Acquisition looks up (or reserves) the cache slot for a key, asks the
//! [`RenewalPolicy`] what to do with what it found, and only then calls the fetcher. The fetch
//! itself never runs under the cache lock, so concurrent callers for the same key may fetch
//! in parallel; the last result to land wins.

// std
use std::{
	collections::HashSet,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// crates.io
use http::HeaderMap;
use tokio::sync::{Mutex, RwLock};
// self
use crate::{
	_prelude::*,
	cache::{CacheKey, CacheStrategy, EvictionOrder, ExpiryOrderedStrategy, Lookup, Token},
	compose::{Composer, TokenRequest},
	config::TokenManagerConfig,
	fetch::TokenFetcher,
	metrics::{DEFAULT_SERVICE_LABEL, ManagerMetrics, ManagerMetricsSnapshot},
	renewal::{Renewal, RenewalPolicy},
};

/// Header carrying the downstream service id.
pub const SERVICE_ID_HEADER: &str = "service_id";
/// Header carrying the space-delimited scope.
pub const SCOPE_HEADER: &str = "scope";
/// Header carrying serialized custom claims.
pub const CUSTOM_CLAIMS_HEADER: &str = "custom_claims";

/// Already-parsed identity of an outbound request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
	/// Downstream service identifier.
	pub service_id: Option<String>,
	/// Space-delimited scope.
	pub scope: Option<String>,
	/// Serialized custom claims.
	pub custom_claims: Option<String>,
}
impl RequestContext {
	/// Create an empty context.
	pub fn new() -> Self {
		Self::default()
	}

	/// Set the service id.
	pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
		self.service_id = Some(service_id.into());

		self
	}

	/// Set the scope string.
	pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
		self.scope = Some(scope.into());

		self
	}

	/// Set the custom claims.
	pub fn with_custom_claims(mut self, custom_claims: impl Into<String>) -> Self {
		self.custom_claims = Some(custom_claims.into());

		self
	}

	/// Read the first value of the `service_id`, `scope`, and `custom_claims` headers.
	pub fn from_headers(headers: &HeaderMap) -> Self {
		let first = |name: &str| {
			headers.get(name).and_then(|value| value.to_str().ok()).map(str::to_owned)
		};

		Self {
			service_id: first(SERVICE_ID_HEADER),
			scope: first(SCOPE_HEADER),
			custom_claims: first(CUSTOM_CLAIMS_HEADER),
		}
	}
}

/// Builder for [`TokenManager`].
pub struct TokenManagerBuilder {
	fetcher: Arc<dyn TokenFetcher>,
	config: TokenManagerConfig,
	order: EvictionOrder,
	strategy: Option<Box<dyn CacheStrategy>>,
}
impl TokenManagerBuilder {
	/// Use `config` instead of the defaults.
	pub fn config(mut self, config: TokenManagerConfig) -> Self {
		self.config = config;

		self
	}

	/// Eviction order for the default [`ExpiryOrderedStrategy`].
	pub fn eviction_order(mut self, order: EvictionOrder) -> Self {
		self.order = order;

		self
	}

	/// Replace the default strategy; its own capacity takes precedence over the config.
	pub fn strategy(mut self, strategy: Box<dyn CacheStrategy>) -> Self {
		self.strategy = Some(strategy);

		self
	}

	/// Validate the configuration and construct the manager.
	pub fn build(self) -> Result<TokenManager> {
		let config = self.config.normalized();

		config.validate()?;

		let strategy: Box<dyn CacheStrategy> = match self.strategy {
			Some(strategy) => strategy,
			None => Box::new(ExpiryOrderedStrategy::with_order(config.capacity, self.order)),
		};

		tracing::debug!(
			capacity = strategy.capacity(),
			renew_before_expiry = ?config.renew_before_expiry,
			"token manager initialised"
		);

		Ok(TokenManager {
			inner: Arc::new(ManagerState {
				policy: RenewalPolicy::new(config.renew_before_expiry),
				config,
				cache: RwLock::new(strategy),
				fetcher: self.fetcher,
				renewing: Mutex::new(HashSet::new()),
				metrics: ManagerMetrics::new(),
			}),
		})
	}
}

/// Cache-aware broker handing out bearer tokens.
#[derive(Clone)]
pub struct TokenManager {
	inner: Arc<ManagerState>,
}
impl TokenManager {
	/// Start building a manager around `fetcher`.
	pub fn builder(fetcher: impl TokenFetcher + 'static) -> TokenManagerBuilder {
		TokenManagerBuilder {
			fetcher: Arc::new(fetcher),
			config: TokenManagerConfig::default(),
			order: EvictionOrder::default(),
			strategy: None,
		}
	}

	/// Acquire a client-credentials token for `key` using the configured request template.
	///
	/// Scopes and custom claims on the key override the template's.
	pub async fn acquire(&self, key: &CacheKey) -> Result<Token> {
		let request = self.request_for(key);

		self.acquire_with(key, &request, &Composer::ClientCredentials).await
	}

	/// Acquire a token for `key`, building the fetch with `composer`.
	///
	/// Non-cacheable keys always fetch and never touch the cache. Cacheable keys reuse the
	/// cached token according to the renewal policy, and every successful fetch overwrites
	/// the entry for `key`. On failure the entry is left as it was.
	#[tracing::instrument(
		skip(self, key, request, composer),
		fields(
			service = service_label(key),
			composer = composer.name(),
			cacheable = key.is_cacheable()
		)
	)]
	pub async fn acquire_with(
		&self,
		key: &CacheKey,
		request: &TokenRequest,
		composer: &Composer,
	) -> Result<Token> {
		if !key.is_cacheable() {
			tracing::debug!("key is not cacheable; fetching without the cache");

			return self.fetch(service_label(key), request, composer).await;
		}

		let cached = self.lookup_or_reserve(key).await;

		match self.inner.policy.decide(&cached, Utc::now()) {
			Renewal::Reuse => {
				self.observe_hit(key, false);

				Ok(cached)
			},
			Renewal::Background => {
				let spawned = self.schedule_background_renewal(key, request, composer).await;

				self.observe_hit(key, spawned);

				Ok(cached)
			},
			Renewal::Blocking => {
				tracing::debug!(
					placeholder = cached.is_placeholder(),
					"fetching token before returning"
				);

				self.observe_miss(key);

				let token = self.fetch(service_label(key), request, composer).await?;

				self.store(key.clone(), token.clone()).await;

				Ok(token)
			},
		}
	}

	/// Derive key and request from `ctx`, then acquire with `composer`.
	///
	/// Keys derived for the SAML bearer grant are never cached.
	pub async fn acquire_from_request(
		&self,
		ctx: &RequestContext,
		composer: Composer,
	) -> Result<Token> {
		let mut key = CacheKey::new();
		let mut request = self.inner.config.token_request();

		if let Some(scope) = &ctx.scope {
			key = key.with_scope_str(scope);

			if key.scopes().is_some() {
				request.scope = key.scope_list();
			}
		}
		if let Some(custom_claims) = &ctx.custom_claims {
			key = key.with_custom_claims(custom_claims.clone());
			request.custom_claims = Some(custom_claims.clone());
		}
		if let Some(service_id) = &ctx.service_id {
			key = key.with_service_id(service_id.clone());
		}
		if !composer.is_cacheable() {
			key = key.non_cacheable();
		}

		self.acquire_with(&key, &request, &composer).await
	}

	/// Acquire a client-credentials token authenticated by the TLS client certificate.
	pub async fn acquire_with_mtls(&self, ctx: &RequestContext) -> Result<Token> {
		self.acquire_from_request(ctx, Composer::Mtls).await
	}

	/// Acquire an uncached token through the SAML bearer grant.
	pub async fn acquire_with_saml(
		&self,
		ctx: &RequestContext,
		assertion: impl Into<String>,
		client_assertion: impl Into<String>,
	) -> Result<Token> {
		self.acquire_from_request(ctx, Composer::saml_bearer(assertion, client_assertion)).await
	}

	/// Read the cached token for `key` without side effects.
	pub async fn peek(&self, key: &CacheKey) -> Option<Token> {
		if !key.is_cacheable() {
			return None;
		}

		self.inner.cache.read().await.get(key)
	}

	/// Number of cached entries, placeholders included.
	pub async fn len(&self) -> usize {
		self.inner.cache.read().await.len()
	}

	/// Whether the cache holds no entries.
	pub async fn is_empty(&self) -> bool {
		self.inner.cache.read().await.is_empty()
	}

	/// Cache capacity.
	pub async fn capacity(&self) -> usize {
		self.inner.cache.read().await.capacity()
	}

	/// Configuration the manager was built with.
	pub fn config(&self) -> &TokenManagerConfig {
		&self.inner.config
	}

	/// Snapshot of the manager's counters.
	pub fn metrics(&self) -> ManagerMetricsSnapshot {
		self.inner.metrics.snapshot()
	}

	fn request_for(&self, key: &CacheKey) -> TokenRequest {
		let mut request = self.inner.config.token_request();

		if key.scopes().is_some() {
			request.scope = key.scope_list();
		}
		if let Some(custom_claims) = key.custom_claims() {
			request.custom_claims = Some(custom_claims.to_owned());
		}

		request
	}

	async fn lookup_or_reserve(&self, key: &CacheKey) -> Token {
		if let Some(token) = self.inner.cache.read().await.get(key) {
			return token;
		}

		let lookup = { self.inner.cache.write().await.get_or_insert_placeholder(key) };

		if let Lookup::Reserved { evicted } = &lookup {
			tracing::debug!("reserved placeholder for unseen key");

			if let Some((evicted, _)) = evicted {
				self.observe_eviction(evicted);
			}
		}

		lookup.into_token()
	}

	async fn schedule_background_renewal(
		&self,
		key: &CacheKey,
		request: &TokenRequest,
		composer: &Composer,
	) -> bool {
		let should_spawn = { self.inner.renewing.lock().await.insert(key.clone()) };

		if should_spawn {
			let manager = self.clone();
			let key = key.clone();
			let request = request.clone();
			let composer = composer.clone();

			tokio::spawn(async move {
				// A panicking fetcher must still release the in-flight mark.
				let renewal = tokio::spawn({
					let manager = manager.clone();
					let key = key.clone();

					async move {
						match manager.fetch(service_label(&key), &request, &composer).await {
							Ok(token) => manager.store(key, token).await,
							Err(err) =>
								tracing::debug!(error = %err, "background renewal failed"),
						}
					}
				});

				if let Err(err) = renewal.await {
					tracing::warn!(
						service = service_label(&key),
						error = %err,
						"background renewal aborted"
					);
				}

				manager.inner.renewing.lock().await.remove(&key);
			});
		}

		should_spawn
	}

	async fn fetch(
		&self,
		service: &str,
		request: &TokenRequest,
		composer: &Composer,
	) -> Result<Token> {
		let composed = composer.compose(request)?;
		let started = Instant::now();

		match self.inner.fetcher.fetch_token(composed).await {
			Ok(response) => {
				let elapsed = started.elapsed();

				self.inner.metrics.fetch_succeeded(service, elapsed);

				Ok(Token::from_response(response, Utc::now()))
			},
			Err(err) => {
				tracing::warn!(service, error = %err, "token fetch failed");

				self.inner.metrics.fetch_failed(service);

				Err(err)
			},
		}
	}

	async fn store(&self, key: CacheKey, token: Token) {
		let evicted = { self.inner.cache.write().await.insert(key, token) };

		if let Some((evicted, _)) = evicted {
			self.observe_eviction(&evicted);
		}
	}

	fn observe_hit(&self, key: &CacheKey, renewing: bool) {
		self.inner.metrics.hit(service_label(key), renewing);
	}

	fn observe_miss(&self, key: &CacheKey) {
		self.inner.metrics.miss(service_label(key));
	}

	fn observe_eviction(&self, evicted: &CacheKey) {
		tracing::debug!(evicted = service_label(evicted), "evicted cached token");

		self.inner.metrics.evicted(service_label(evicted));
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("config", &self.inner.config)
			.field("policy", &self.inner.policy)
			.finish_non_exhaustive()
	}
}

struct ManagerState {
	config: TokenManagerConfig,
	policy: RenewalPolicy,
	cache: RwLock<Box<dyn CacheStrategy>>,
	fetcher: Arc<dyn TokenFetcher>,
	// Keys with a background renewal in flight.
	renewing: Mutex<HashSet<CacheKey>>,
	metrics: Arc<ManagerMetrics>,
}

fn service_label(key: &CacheKey) -> &str {
	key.service_id().unwrap_or(DEFAULT_SERVICE_LABEL)
}
