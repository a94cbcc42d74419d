//! Expiry-driven renewal decisions for cached tokens.

// self
use crate::{_prelude::*, cache::Token};

/// Default almost-expired window.
pub const DEFAULT_RENEW_BEFORE_EXPIRY: Duration = Duration::from_secs(60);

/// What the manager should do with a cached token.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Renewal {
	/// Serve the cached token as-is.
	Reuse,
	/// Serve the cached token and refresh it in the background.
	Background,
	/// Fetch a new token before returning.
	Blocking,
}

/// Three-way renewal policy keyed on the almost-expired window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenewalPolicy {
	renew_before_expiry: TimeDelta,
}
impl RenewalPolicy {
	/// Build a policy with the given almost-expired window.
	pub fn new(renew_before_expiry: Duration) -> Self {
		let renew_before_expiry =
			TimeDelta::from_std(renew_before_expiry).unwrap_or(TimeDelta::MAX);

		Self { renew_before_expiry }
	}

	/// Almost-expired window.
	pub fn renew_before_expiry(&self) -> TimeDelta {
		self.renew_before_expiry
	}

	/// Decide how to treat `token` at `now`.
	///
	/// Placeholders, tokens without expiry, and tokens at or past expiry are never served.
	pub fn decide(&self, token: &Token, now: DateTime<Utc>) -> Renewal {
		if token.is_placeholder() {
			return Renewal::Blocking;
		}

		match token.remaining(now) {
			Some(remaining) if remaining <= TimeDelta::zero() => Renewal::Blocking,
			Some(remaining) if remaining <= self.renew_before_expiry => Renewal::Background,
			Some(_) => Renewal::Reuse,
			None => Renewal::Blocking,
		}
	}
}
impl Default for RenewalPolicy {
	fn default() -> Self {
		Self::new(DEFAULT_RENEW_BEFORE_EXPIRY)
	}
}
