//! Async OAuth bearer token cache with expiry-ordered eviction, background renewal, and
//! pluggable grant composition.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod cache;
pub mod compose;
pub mod config;
pub mod fetch;
pub mod http;
pub mod metrics;
pub mod renewal;

mod error;
mod manager;
mod _prelude {
	pub use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	cache::{CacheKey, CacheStrategy, EvictionOrder, ExpiryOrderedStrategy, Lookup, Token},
	compose::{ClientAuth, ComposedRequest, Composer, RequestComposer, TokenRequest},
	config::TokenManagerConfig,
	error::{BoxError, Error, Result},
	fetch::{FetchFuture, TokenFetcher, TokenResponse},
	http::HttpTokenFetcher,
	manager::{
		CUSTOM_CLAIMS_HEADER, RequestContext, SCOPE_HEADER, SERVICE_ID_HEADER, TokenManager,
		TokenManagerBuilder,
	},
	metrics::ManagerMetricsSnapshot,
	renewal::{Renewal, RenewalPolicy},
};
