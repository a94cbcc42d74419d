//! Cache, renewal, and eviction behaviour of the token manager.

// std
use std::{sync::atomic::Ordering, time::Duration};
// crates.io
use oauth_token_cache::{
	CacheKey, Composer, RequestContext, Result, Token, TokenManager, TokenManagerConfig,
};
// self
use crate::support::{CountingStrategy, ScriptedFetcher};

fn manager(fetcher: &ScriptedFetcher, config: TokenManagerConfig) -> TokenManager {
	TokenManager::builder(fetcher.clone()).config(config).build().expect("manager")
}

fn config() -> TokenManagerConfig {
	TokenManagerConfig::default()
		.with_token_url("https://auth.example.com/oauth2/token".parse().expect("url"))
		.with_client("client", "secret")
}

async fn wait_for<F>(mut condition: F)
where
	F: AsyncFnMut() -> bool,
{
	for _ in 0..200 {
		if condition().await {
			return;
		}

		tokio::time::sleep(Duration::from_millis(10)).await;
	}

	panic!("condition not reached in time");
}

#[tokio::test]
async fn reuses_fresh_token_without_fetching() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(3_600);
	let manager = manager(&fetcher, config());
	let key = CacheKey::new().with_service_id("orders").with_scope_str("read write");
	let first = manager.acquire(&key).await?;
	let second = manager.acquire(&key).await?;

	assert_eq!(first, second);
	assert_eq!(fetcher.calls(), 1);
	assert_eq!(manager.peek(&key).await, Some(first));

	let snapshot = manager.metrics();

	assert_eq!(snapshot.acquisitions, 2);
	assert_eq!(snapshot.hits, 1);
	assert_eq!(snapshot.fetches, 1);

	Ok(())
}

#[tokio::test]
async fn key_scopes_override_configured_scope() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(3_600);
	let mut config = config();

	config.scope = vec!["default".into()];

	let manager = manager(&fetcher, config);

	manager.acquire(&CacheKey::new().with_scope_str("write read")).await?;

	let request = fetcher.last_request().expect("request");

	assert_eq!(request.form.get("scope").map(String::as_str), Some("read write"));

	manager.acquire(&CacheKey::new().with_service_id("billing")).await?;

	let request = fetcher.last_request().expect("request");

	assert_eq!(request.form.get("scope").map(String::as_str), Some("default"));

	Ok(())
}

#[tokio::test]
async fn expired_token_is_refreshed_before_returning() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(0);
	let manager = manager(&fetcher, config());
	let key = CacheKey::new().with_service_id("orders");
	let expired = manager.acquire(&key).await?;

	fetcher.set_expires_in(3_600);

	let renewed = manager.acquire(&key).await?;

	assert_eq!(fetcher.calls(), 2);
	assert_ne!(renewed.access_token, expired.access_token);
	assert!(renewed.expires_at > expired.expires_at);
	assert_eq!(manager.peek(&key).await, Some(renewed));

	Ok(())
}

#[tokio::test]
async fn almost_expired_token_is_served_and_renewed_in_background() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(30);
	let manager = manager(&fetcher, config().with_renew_before_expiry(Duration::from_secs(60)));
	let key = CacheKey::new().with_service_id("orders");
	let original = manager.acquire(&key).await?;

	fetcher.set_expires_in(3_600);

	let served = manager.acquire(&key).await?;

	assert_eq!(served, original);

	wait_for(async || {
		manager.peek(&key).await.is_some_and(|token| token.access_token != original.access_token)
	})
	.await;

	let renewed = manager.peek(&key).await.expect("renewed token");

	assert!(renewed.expires_at > original.expires_at);
	assert_eq!(manager.acquire(&key).await?, renewed);
	assert_eq!(fetcher.calls(), 2);
	assert_eq!(manager.metrics().background_renewals, 1);

	Ok(())
}

#[tokio::test]
async fn placeholder_is_visible_while_first_fetch_is_pending() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(3_600).gated();
	let manager = manager(&fetcher, config());
	let key = CacheKey::new().with_service_id("orders");
	let pending = tokio::spawn({
		let manager = manager.clone();
		let key = key.clone();

		async move { manager.acquire(&key).await }
	});

	wait_for(async || fetcher.calls() == 1).await;

	let reserved = manager.peek(&key).await.expect("placeholder");

	assert!(reserved.is_placeholder());
	assert_eq!(manager.len().await, 1);

	fetcher.release(1);

	let token = pending.await.expect("join")?;

	assert!(!token.is_placeholder());
	assert_eq!(manager.peek(&key).await, Some(token));

	Ok(())
}

#[tokio::test]
async fn failed_fetch_leaves_the_placeholder_behind() {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(3_600);

	fetcher.set_failing(true);

	let manager = manager(&fetcher, config());
	let key = CacheKey::new().with_service_id("orders");

	assert!(manager.acquire(&key).await.is_err());
	assert_eq!(manager.peek(&key).await, Some(Token::placeholder()));
	assert_eq!(manager.metrics().fetch_failures, 1);

	fetcher.set_failing(false);

	let token = manager.acquire(&key).await.expect("token after recovery");

	assert!(!token.is_placeholder());
	assert_eq!(manager.len().await, 1);
}

#[tokio::test]
async fn non_cacheable_keys_bypass_the_cache() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(3_600);
	let manager = manager(&fetcher, config());
	let key = CacheKey::new().with_service_id("orders").non_cacheable();

	manager.acquire(&key).await?;
	manager.acquire(&key).await?;

	assert_eq!(fetcher.calls(), 2);
	assert!(manager.is_empty().await);
	assert_eq!(manager.peek(&key).await, None);

	Ok(())
}

#[tokio::test]
async fn evicts_the_longest_lived_token_at_capacity() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(0);
	let manager = manager(
		&fetcher,
		config().with_capacity(2).with_renew_before_expiry(Duration::from_secs(1)),
	);
	let a = CacheKey::new().with_service_id("a");
	let b = CacheKey::new().with_service_id("b");
	let c = CacheKey::new().with_service_id("c");

	fetcher.set_expires_in(100);
	manager.acquire(&a).await?;
	fetcher.set_expires_in(50);
	manager.acquire(&b).await?;

	assert_eq!(manager.len().await, 2);

	fetcher.set_expires_in(200);
	manager.acquire(&c).await?;

	assert_eq!(manager.len().await, 2);
	assert_eq!(manager.capacity().await, 2);
	assert!(manager.peek(&a).await.is_none());
	assert!(manager.peek(&b).await.is_some());
	assert!(manager.peek(&c).await.is_some());
	assert_eq!(manager.metrics().evictions, 1);

	Ok(())
}

#[tokio::test]
async fn concurrent_first_access_reserves_a_single_placeholder() -> Result<()> {
	const CALLERS: usize = 8;

	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(3_600).gated();
	let (strategy, placeholder_inserts) = CountingStrategy::new(16);
	let manager = TokenManager::builder(fetcher.clone())
		.config(config())
		.strategy(Box::new(strategy))
		.build()?;
	let key = CacheKey::new().with_service_id("orders").with_scope_str("read");
	let tasks = (0..CALLERS)
		.map(|_| {
			let manager = manager.clone();
			let key = key.clone();

			tokio::spawn(async move { manager.acquire(&key).await })
		})
		.collect::<Vec<_>>();

	// Every caller found the slot reserved and went on to fetch.
	wait_for(async || fetcher.calls() == CALLERS).await;

	assert_eq!(placeholder_inserts.load(Ordering::SeqCst), 1);
	assert_eq!(manager.peek(&key).await, Some(Token::placeholder()));

	fetcher.release(CALLERS);

	for task in tasks {
		assert!(!task.await.expect("join")?.is_placeholder());
	}

	assert_eq!(placeholder_inserts.load(Ordering::SeqCst), 1);
	assert_eq!(manager.len().await, 1);

	let snapshot = manager.metrics();

	assert_eq!(snapshot.acquisitions, CALLERS as u64);
	assert_eq!(snapshot.hits, 0);

	Ok(())
}

#[tokio::test]
async fn zero_capacity_in_code_falls_back_to_default() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(3_600);
	let mut config = config();

	config.capacity = 0;

	let manager = manager(&fetcher, config);

	assert_eq!(manager.capacity().await, 200);
	assert_eq!(manager.config().capacity, 200);

	for service in ["a", "b", "c"] {
		manager.acquire(&CacheKey::new().with_service_id(service)).await?;
	}

	assert_eq!(manager.len().await, 3);

	Ok(())
}

#[tokio::test]
async fn panicking_background_renewal_does_not_block_later_renewals() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(30);
	let manager = manager(&fetcher, config().with_renew_before_expiry(Duration::from_secs(60)));
	let key = CacheKey::new().with_service_id("orders");
	let original = manager.acquire(&key).await?;

	fetcher.set_panicking(true);

	assert_eq!(manager.acquire(&key).await?, original);

	wait_for(async || fetcher.calls() == 2).await;

	fetcher.set_panicking(false);
	fetcher.set_expires_in(3_600);

	// The crashed renewal must release its in-flight mark before another one can start.
	wait_for(async || {
		manager.acquire(&key).await.is_ok_and(|token| token == original)
			&& manager.metrics().background_renewals == 2
	})
	.await;
	wait_for(async || {
		manager.peek(&key).await.is_some_and(|token| token.access_token != original.access_token)
	})
	.await;

	assert_eq!(manager.metrics().background_renewals, 2);

	Ok(())
}

#[tokio::test]
async fn saml_tokens_are_never_cached() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(3_600);
	let manager = manager(&fetcher, config());
	let ctx = RequestContext::new().with_service_id("orders").with_scope("read");

	manager.acquire_with_saml(&ctx, "PHNhbWw+", "client.jwt").await?;
	manager.acquire_from_request(&ctx, Composer::saml_bearer("PHNhbWw+", "client.jwt")).await?;

	assert_eq!(fetcher.calls(), 2);
	assert!(manager.is_empty().await);

	let request = fetcher.last_request().expect("request");

	assert_eq!(request.grant_type, "urn:ietf:params:oauth:grant-type:saml2-bearer");
	assert_eq!(request.form.get("assertion").map(String::as_str), Some("PHNhbWw+"));

	Ok(())
}

#[tokio::test]
async fn request_context_keys_are_cached_per_identity() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let fetcher = ScriptedFetcher::new(3_600);
	let manager = manager(&fetcher, config());
	let orders = RequestContext::new().with_service_id("orders").with_scope("write read");

	let first = manager.acquire_with_mtls(&orders).await?;
	let again = manager
		.acquire_with_mtls(&RequestContext::new().with_service_id("orders").with_scope("read write"))
		.await?;

	assert_eq!(first, again);
	assert_eq!(fetcher.calls(), 1);

	manager.acquire_with_mtls(&orders.clone().with_custom_claims(r#"{"tenant":"t1"}"#)).await?;

	assert_eq!(fetcher.calls(), 2);
	assert_eq!(manager.len().await, 2);

	let cached = CacheKey::new().with_service_id("orders").with_scopes(["read", "write"]);

	assert_eq!(manager.peek(&cached).await, Some(first));

	Ok(())
}
