//! Token manager telemetry.
//!
//! Every observation lands twice: in the manager's own [`ManagerMetrics`] counters, readable
//! through [`TokenManager::metrics`](crate::TokenManager::metrics), and in the global `metrics`
//! facade labelled by `service`.

// std
#[cfg(feature = "prometheus")] use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use metrics::Label;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

const METRIC_REQUESTS_TOTAL: &str = "oauth_token_cache_requests_total";
const METRIC_HITS_TOTAL: &str = "oauth_token_cache_hits_total";
const METRIC_MISSES_TOTAL: &str = "oauth_token_cache_misses_total";
const METRIC_REFRESH_TOTAL: &str = "oauth_token_cache_refresh_total";
const METRIC_REFRESH_DURATION: &str = "oauth_token_cache_refresh_duration_seconds";
const METRIC_REFRESH_ERRORS: &str = "oauth_token_cache_refresh_errors_total";
const METRIC_EVICTIONS_TOTAL: &str = "oauth_token_cache_evictions_total";

/// Label value used when a key carries no service id.
pub const DEFAULT_SERVICE_LABEL: &str = "default";

#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Counters owned by one token manager.
#[derive(Debug, Default)]
pub struct ManagerMetrics {
	acquisitions: AtomicU64,
	hits: AtomicU64,
	background_renewals: AtomicU64,
	fetches: AtomicU64,
	fetch_failures: AtomicU64,
	evictions: AtomicU64,
	last_fetch_micros: AtomicU64,
}
impl ManagerMetrics {
	/// Create an empty accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// A cacheable acquisition was answered from the cache; `renewing` marks an almost-expired
	/// hit that started a background renewal.
	pub fn hit(&self, service: &str, renewing: bool) {
		bump(&self.acquisitions);
		bump(&self.hits);

		if renewing {
			bump(&self.background_renewals);
		}

		let labels = service_labels(service);

		metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
		metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);
	}

	/// A cacheable acquisition had to fetch before returning.
	pub fn miss(&self, service: &str) {
		bump(&self.acquisitions);

		let labels = service_labels(service);

		metrics::counter!(METRIC_REQUESTS_TOTAL, labels.iter()).increment(1);
		metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
	}

	/// A fetch succeeded after `elapsed`.
	pub fn fetch_succeeded(&self, service: &str, elapsed: Duration) {
		bump(&self.fetches);
		self.last_fetch_micros
			.store(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX), Ordering::Relaxed);

		let mut labels = service_labels(service);

		metrics::histogram!(METRIC_REFRESH_DURATION, labels.iter()).record(elapsed.as_secs_f64());

		labels.push(Label::new("status", "success"));

		metrics::counter!(METRIC_REFRESH_TOTAL, labels.iter()).increment(1);
	}

	/// A fetch failed.
	pub fn fetch_failed(&self, service: &str) {
		bump(&self.fetch_failures);

		let mut labels = service_labels(service);

		metrics::counter!(METRIC_REFRESH_ERRORS, labels.iter()).increment(1);

		labels.push(Label::new("status", "error"));

		metrics::counter!(METRIC_REFRESH_TOTAL, labels.iter()).increment(1);
	}

	/// An entry owned by `service` was evicted.
	pub fn evicted(&self, service: &str) {
		bump(&self.evictions);

		metrics::counter!(METRIC_EVICTIONS_TOTAL, service_labels(service).iter()).increment(1);
	}

	/// Point-in-time copy of the counters.
	pub fn snapshot(&self) -> ManagerMetricsSnapshot {
		let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
		let last_fetch_latency = match load(&self.last_fetch_micros) {
			0 => None,
			micros => Some(Duration::from_micros(micros)),
		};

		ManagerMetricsSnapshot {
			acquisitions: load(&self.acquisitions),
			hits: load(&self.hits),
			background_renewals: load(&self.background_renewals),
			fetches: load(&self.fetches),
			fetch_failures: load(&self.fetch_failures),
			evictions: load(&self.evictions),
			last_fetch_latency,
		}
	}
}

/// Copy of a manager's counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagerMetricsSnapshot {
	/// Cacheable acquisitions.
	pub acquisitions: u64,
	/// Acquisitions answered from the cache.
	pub hits: u64,
	/// Hits that started a background renewal.
	pub background_renewals: u64,
	/// Successful fetches, background ones included.
	pub fetches: u64,
	/// Failed fetches, background ones included.
	pub fetch_failures: u64,
	/// Entries evicted under capacity pressure.
	pub evictions: u64,
	/// Latency of the most recent successful fetch.
	pub last_fetch_latency: Option<Duration>,
}
impl ManagerMetricsSnapshot {
	/// Share of cacheable acquisitions answered from the cache.
	pub fn hit_rate(&self) -> f64 {
		match self.acquisitions {
			0 => 0.0,
			total => self.hits as f64 / total as f64,
		}
	}
}

/// Install the Prometheus recorder; later calls are no-ops.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Handle of the recorder installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

fn bump(counter: &AtomicU64) {
	counter.fetch_add(1, Ordering::Relaxed);
}

fn service_labels(service: &str) -> SmallVec<[Label; 2]> {
	let mut labels = SmallVec::new();

	labels.push(Label::new("service", service.to_owned()));

	labels
}
