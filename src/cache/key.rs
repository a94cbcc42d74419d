//! Composite identity used to disambiguate cached tokens.

// std
use std::{
	collections::BTreeSet,
	hash::{Hash, Hasher},
};

/// Cache identity composed of service id, scope set, and custom claims.
///
/// The `cacheable` flag travels with the key but is not part of its identity: two keys that
/// differ only in that flag compare equal and hash identically.
#[derive(Clone, Debug)]
pub struct CacheKey {
	service_id: Option<String>,
	scopes: Option<BTreeSet<String>>,
	custom_claims: Option<String>,
	cacheable: bool,
}
impl CacheKey {
	/// Create an empty, cacheable key.
	pub fn new() -> Self {
		Self { service_id: None, scopes: None, custom_claims: None, cacheable: true }
	}

	/// Attach the downstream service identifier.
	pub fn with_service_id(mut self, service_id: impl Into<String>) -> Self {
		self.service_id = Some(service_id.into());

		self
	}

	/// Attach a scope set; an empty iterator leaves the scope unset.
	pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let scopes = scopes.into_iter().map(Into::into).collect::<BTreeSet<_>>();

		self.scopes = if scopes.is_empty() { None } else { Some(scopes) };

		self
	}

	/// Attach scopes from a space-delimited OAuth scope string.
	pub fn with_scope_str(self, raw: &str) -> Self {
		self.with_scopes(raw.split_ascii_whitespace())
	}

	/// Attach the serialized custom claims requested for the token.
	pub fn with_custom_claims(mut self, custom_claims: impl Into<String>) -> Self {
		self.custom_claims = Some(custom_claims.into());

		self
	}

	/// Mark the key so tokens fetched for it bypass the cache entirely.
	pub fn non_cacheable(mut self) -> Self {
		self.cacheable = false;

		self
	}

	/// Service identifier, if any.
	pub fn service_id(&self) -> Option<&str> {
		self.service_id.as_deref()
	}

	/// Scope set, if any.
	pub fn scopes(&self) -> Option<&BTreeSet<String>> {
		self.scopes.as_ref()
	}

	/// Scopes in sorted order, empty when unset.
	pub fn scope_list(&self) -> Vec<String> {
		self.scopes.iter().flatten().cloned().collect()
	}

	/// Custom claims, if any.
	pub fn custom_claims(&self) -> Option<&str> {
		self.custom_claims.as_deref()
	}

	/// Whether tokens for this key may be stored in and read from the cache.
	pub fn is_cacheable(&self) -> bool {
		self.cacheable
	}
}
impl Default for CacheKey {
	fn default() -> Self {
		Self::new()
	}
}
impl PartialEq for CacheKey {
	fn eq(&self, other: &Self) -> bool {
		self.service_id == other.service_id
			&& self.scopes == other.scopes
			&& self.custom_claims == other.custom_claims
	}
}
impl Eq for CacheKey {}
impl Hash for CacheKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.service_id.hash(state);
		self.scopes.hash(state);
		self.custom_claims.hash(state);
	}
}
