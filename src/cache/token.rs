//! Cached bearer token entity.

// crates.io
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
// self
use crate::{_prelude::*, fetch::TokenResponse};

/// Bearer credential held by the cache.
///
/// A token whose access token is empty is a placeholder: it reserves a cache slot for its key
/// while the first fetch is still pending.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Token {
	/// Access token presented as the bearer credential.
	pub access_token: String,
	/// Refresh token returned alongside the access token, if any.
	pub refresh_token: Option<String>,
	/// Scopes granted by the authorization server, in server order.
	pub scopes: Vec<String>,
	/// Instant after which the access token must not be used; absent until populated.
	pub expires_at: Option<DateTime<Utc>>,
}
impl Token {
	/// Create an empty placeholder token.
	pub fn placeholder() -> Self {
		Self::default()
	}

	/// Create a populated token with a known expiry.
	pub fn new(access_token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
		Self {
			access_token: access_token.into(),
			refresh_token: None,
			scopes: Vec::new(),
			expires_at: Some(expires_at),
		}
	}

	/// Build a token from an authorization server response received at `now`.
	///
	/// Expiry comes from `expires_in` when present, saturating at the latest representable
	/// instant, then from the `exp` claim of a JWT access token. The JWT signature is not
	/// checked; the claim is only used for scheduling renewal.
	pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Self {
		let expires_at = match response.expires_in {
			Some(secs) => Some(expires_after(now, secs)),
			None => jwt_expiry(&response.access_token),
		};
		let scopes = response
			.scope
			.as_deref()
			.map(|scope| scope.split_ascii_whitespace().map(str::to_owned).collect())
			.unwrap_or_default();

		Self {
			access_token: response.access_token,
			refresh_token: response.refresh_token,
			scopes,
			expires_at,
		}
	}

	/// Whether this token only reserves a cache slot.
	pub fn is_placeholder(&self) -> bool {
		self.access_token.is_empty()
	}

	/// Whether the token is unusable at `now`; a token without expiry counts as expired.
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		self.expires_at.map(|expires_at| expires_at <= now).unwrap_or(true)
	}

	/// Time left before expiry, negative once expired.
	pub fn remaining(&self, now: DateTime<Utc>) -> Option<TimeDelta> {
		self.expires_at.map(|expires_at| expires_at - now)
	}
}

#[derive(Deserialize)]
struct ExpiryClaim {
	exp: Option<i64>,
}

fn expires_after(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
	i64::try_from(secs)
		.ok()
		.and_then(TimeDelta::try_seconds)
		.and_then(|ttl| now.checked_add_signed(ttl))
		.unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn jwt_expiry(access_token: &str) -> Option<DateTime<Utc>> {
	let mut segments = access_token.split('.');
	let (_, payload, _) = (segments.next()?, segments.next()?, segments.next()?);

	if segments.next().is_some() {
		return None;
	}

	let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
	let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;

	DateTime::from_timestamp(claim.exp?, 0)
}
