//! Capacity-bounded token storage with pluggable eviction.

// std
use std::{
	cmp::Ordering,
	collections::HashMap,
	fmt::{Debug, Formatter, Result as FmtResult},
};
// self
use crate::{
	_prelude::*,
	cache::{key::CacheKey, token::Token},
};

/// Default number of tokens retained by a strategy.
pub const DEFAULT_CAPACITY: usize = 200;

/// Comparator used by [`EvictionOrder::Custom`].
pub type EvictionComparator = Arc<dyn Fn(&Token, &Token) -> Ordering + Send + Sync>;

/// Storage contract the token manager relies on.
///
/// Implementations are not synchronised themselves; the manager serialises every mutation
/// behind a single write lock, which makes each `insert` (including its eviction) atomic to
/// other callers.
pub trait CacheStrategy: Debug + Send + Sync {
	/// Look up the token stored for `key`.
	fn get(&self, key: &CacheKey) -> Option<Token>;

	/// Store `token` under `key`, returning the entry evicted to make room, if any.
	///
	/// Overwriting an existing key never evicts. Inserting a new key while at capacity must
	/// evict exactly one other entry first.
	fn insert(&mut self, key: CacheKey, token: Token) -> Option<(CacheKey, Token)>;

	/// Number of stored entries.
	fn len(&self) -> usize;

	/// Maximum number of stored entries.
	fn capacity(&self) -> usize;

	/// Whether no entries are stored.
	fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Return the token stored for `key`, inserting an empty placeholder when absent.
	fn get_or_insert_placeholder(&mut self, key: &CacheKey) -> Lookup {
		if let Some(token) = self.get(key) {
			return Lookup::Hit(token);
		}

		let evicted = self.insert(key.clone(), Token::placeholder());

		Lookup::Reserved { evicted }
	}
}

/// Outcome of [`CacheStrategy::get_or_insert_placeholder`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
	/// The key was already present, possibly as a placeholder.
	Hit(Token),
	/// A placeholder was inserted for the key.
	Reserved {
		/// Entry evicted to admit the placeholder.
		evicted: Option<(CacheKey, Token)>,
	},
}
impl Lookup {
	/// Token to evaluate: the stored one, or a fresh placeholder.
	pub fn into_token(self) -> Token {
		match self {
			Self::Hit(token) => token,
			Self::Reserved { .. } => Token::placeholder(),
		}
	}
}

/// Ordering used to pick the eviction victim; the greatest entry is evicted.
#[derive(Clone, Default)]
pub enum EvictionOrder {
	/// Evict the entry that stays valid the longest.
	///
	/// Entries close to expiry are about to be renewed anyway, while long-lived entries that
	/// nobody touched are the likeliest to be cold.
	#[default]
	LongestExpire,
	/// Evict the entry closest to (or furthest past) expiry.
	SoonestExpire,
	/// Evict the greatest entry under a caller-supplied comparator.
	Custom(EvictionComparator),
}
impl EvictionOrder {
	/// Compare two tokens.
	///
	/// A missing expiry (a placeholder) counts as the earliest instant, so `LongestExpire`
	/// evicts placeholders last while `SoonestExpire` evicts them first. `Custom` orders them
	/// however its comparator does.
	pub fn compare(&self, a: &Token, b: &Token) -> Ordering {
		match self {
			Self::LongestExpire => a.expires_at.cmp(&b.expires_at),
			Self::SoonestExpire => b.expires_at.cmp(&a.expires_at),
			Self::Custom(comparator) => comparator(a, b),
		}
	}
}
impl Debug for EvictionOrder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::LongestExpire => f.write_str("EvictionOrder::LongestExpire"),
			Self::SoonestExpire => f.write_str("EvictionOrder::SoonestExpire"),
			Self::Custom(_) => f.write_str("EvictionOrder::Custom(..)"),
		}
	}
}

/// Default strategy: a hash map bounded by capacity, evicting by token expiry.
#[derive(Debug)]
pub struct ExpiryOrderedStrategy {
	capacity: usize,
	order: EvictionOrder,
	entries: HashMap<CacheKey, Slot>,
	next_seq: u64,
}
impl ExpiryOrderedStrategy {
	/// Create a strategy with the default [`EvictionOrder::LongestExpire`] order.
	pub fn new(capacity: usize) -> Self {
		Self::with_order(capacity, EvictionOrder::default())
	}

	/// Create a strategy with an explicit eviction order; capacity is at least one.
	pub fn with_order(capacity: usize, order: EvictionOrder) -> Self {
		let capacity = capacity.max(1);

		Self { capacity, order, entries: HashMap::with_capacity(capacity), next_seq: 0 }
	}

	/// Active eviction order.
	pub fn order(&self) -> &EvictionOrder {
		&self.order
	}

	fn evict_one(&mut self) -> Option<(CacheKey, Token)> {
		let order = &self.order;
		// Ties go to the older entry.
		let victim = self
			.entries
			.iter()
			.max_by(|(_, a), (_, b)| order.compare(&a.token, &b.token).then(b.seq.cmp(&a.seq)))
			.map(|(key, _)| key.clone())?;

		self.entries.remove_entry(&victim).map(|(key, slot)| (key, slot.token))
	}
}
impl Default for ExpiryOrderedStrategy {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}
impl CacheStrategy for ExpiryOrderedStrategy {
	fn get(&self, key: &CacheKey) -> Option<Token> {
		self.entries.get(key).map(|slot| slot.token.clone())
	}

	fn insert(&mut self, key: CacheKey, token: Token) -> Option<(CacheKey, Token)> {
		if let Some(slot) = self.entries.get_mut(&key) {
			slot.token = token;

			return None;
		}

		let evicted = if self.entries.len() >= self.capacity { self.evict_one() } else { None };
		let seq = self.next_seq;

		self.next_seq = self.next_seq.wrapping_add(1);
		self.entries.insert(key, Slot { token, seq });

		debug_assert!(self.entries.len() <= self.capacity, "cache exceeded its capacity");

		evicted
	}

	fn len(&self) -> usize {
		self.entries.len()
	}

	fn capacity(&self) -> usize {
		self.capacity
	}
}

#[derive(Debug)]
struct Slot {
	token: Token,
	seq: u64,
}
