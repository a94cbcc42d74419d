//! Token manager configuration and validation.
//!
//! Configuration is read once when the manager is built. Loading it from a file is left to
//! the host; this module only defines the shape and the fallback rules.

// std
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
// crates.io
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use url::Url;
// self
use crate::{
	_prelude::*, cache::DEFAULT_CAPACITY, compose::TokenRequest,
	renewal::DEFAULT_RENEW_BEFORE_EXPIRY,
};

/// Settings consumed by [`TokenManager`](crate::TokenManager).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenManagerConfig {
	/// Maximum number of cached tokens; malformed values fall back to the default.
	#[serde(default = "default_capacity", deserialize_with = "deserialize_capacity")]
	pub capacity: usize,
	/// Almost-expired window, in milliseconds on the wire.
	#[serde(
		default = "default_renew_before_expiry",
		deserialize_with = "deserialize_millis",
		serialize_with = "serialize_millis"
	)]
	pub renew_before_expiry: Duration,
	/// Token endpoint used by the implicit client-credentials flow.
	#[serde(default)]
	pub token_url: Option<Url>,
	/// Client identifier for the implicit flow.
	#[serde(default)]
	pub client_id: Option<String>,
	/// Client secret for the implicit flow.
	#[serde(default, skip_serializing)]
	pub client_secret: Option<String>,
	/// Scopes requested when a key carries none.
	#[serde(default)]
	pub scope: Vec<String>,
}
impl TokenManagerConfig {
	/// Deserialize and validate configuration from a JSON value.
	pub fn from_json_value(value: Value) -> Result<Self> {
		let config: Self = serde_json::from_value(value)?;

		config.validate()?;

		Ok(config)
	}

	/// Set the cache capacity; zero falls back to the default.
	pub fn with_capacity(mut self, capacity: usize) -> Self {
		self.capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };

		self
	}

	/// Set the almost-expired window.
	pub fn with_renew_before_expiry(mut self, window: Duration) -> Self {
		self.renew_before_expiry = window;

		self
	}

	/// Set the token endpoint.
	pub fn with_token_url(mut self, token_url: Url) -> Self {
		self.token_url = Some(token_url);

		self
	}

	/// Set the client credentials used by the implicit flow.
	pub fn with_client(
		mut self,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
	) -> Self {
		self.client_id = Some(client_id.into());
		self.client_secret = Some(client_secret.into());

		self
	}

	/// Replace a zero capacity with the default, as deserialization does.
	pub fn normalized(mut self) -> Self {
		if self.capacity == 0 {
			self.capacity = fallback_capacity(self.capacity);
		}

		self
	}

	/// Validate the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.renew_before_expiry.is_zero() {
			return Err(Error::Validation {
				field: "renew_before_expiry",
				reason: "Must be greater than zero.".into(),
			});
		}
		if let Some(token_url) = &self.token_url
			&& !matches!(token_url.scheme(), "http" | "https")
		{
			return Err(Error::Validation {
				field: "token_url",
				reason: format!("Unsupported scheme '{}'.", token_url.scheme()),
			});
		}

		Ok(())
	}

	/// Token request template carrying the configured endpoint, credentials, and scopes.
	pub fn token_request(&self) -> TokenRequest {
		TokenRequest {
			token_url: self.token_url.clone(),
			client_id: self.client_id.clone(),
			client_secret: self.client_secret.clone(),
			scope: self.scope.clone(),
			custom_claims: None,
		}
	}
}
impl Default for TokenManagerConfig {
	fn default() -> Self {
		Self {
			capacity: DEFAULT_CAPACITY,
			renew_before_expiry: DEFAULT_RENEW_BEFORE_EXPIRY,
			token_url: None,
			client_id: None,
			client_secret: None,
			scope: Vec::new(),
		}
	}
}

impl Debug for TokenManagerConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManagerConfig")
			.field("capacity", &self.capacity)
			.field("renew_before_expiry", &self.renew_before_expiry)
			.field("token_url", &self.token_url)
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("scope", &self.scope)
			.finish()
	}
}

fn default_capacity() -> usize {
	DEFAULT_CAPACITY
}

fn default_renew_before_expiry() -> Duration {
	DEFAULT_RENEW_BEFORE_EXPIRY
}

fn deserialize_capacity<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
	D: Deserializer<'de>,
{
	let raw = Value::deserialize(deserializer)?;

	Ok(capacity_from_value(&raw))
}

fn capacity_from_value(raw: &Value) -> usize {
	let parsed = match raw {
		Value::Number(number) => number.as_u64(),
		Value::String(text) => text.trim().parse::<u64>().ok(),
		_ => None,
	};

	match parsed.and_then(|value| usize::try_from(value).ok()) {
		Some(capacity) if capacity > 0 => capacity,
		_ => fallback_capacity(raw),
	}
}

fn fallback_capacity(raw: impl Display) -> usize {
	tracing::warn!(
		value = %raw,
		default = DEFAULT_CAPACITY,
		"invalid cache capacity, using default"
	);

	DEFAULT_CAPACITY
}

fn deserialize_millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
	D: Deserializer<'de>,
{
	u64::deserialize(deserializer).map(Duration::from_millis)
}

fn serialize_millis<S>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
}
