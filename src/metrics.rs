//! Metrics helpers and per-session telemetry bookkeeping.

// std
use std::sync::{
	OnceLock,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use metrics::Label;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use smallvec::SmallVec;
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 4]>;

const METRIC_READS_TOTAL: &str = "watchcache_reads_total";
const METRIC_HITS_TOTAL: &str = "watchcache_hits_total";
const METRIC_MISSES_TOTAL: &str = "watchcache_misses_total";
const METRIC_EVICTIONS_TOTAL: &str = "watchcache_evictions_total";
const METRIC_REHYDRATIONS_TOTAL: &str = "watchcache_rehydrations_total";
const METRIC_SESSIONS_TOTAL: &str = "watchcache_sessions_total";
const METRIC_SESSION_EXPIRY_DURATION: &str = "watchcache_session_duration_seconds";
const METRIC_PATCHES_EMITTED_TOTAL: &str = "watchcache_live_query_patches_total";

/// Shared Prometheus handle installed by [`install_default_exporter`].
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Thread-safe telemetry accumulator for a single tenant session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
	total_reads: AtomicU64,
	cache_hits: AtomicU64,
	cache_misses: AtomicU64,
	evictions: AtomicU64,
	rehydrations: AtomicU64,
	patches_emitted: AtomicU64,
	last_session_micros: AtomicU64,
}
impl SessionMetrics {
	/// Create a new telemetry accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record a cache read outcome.
	pub fn record_read(&self, hit: bool) {
		self.total_reads.fetch_add(1, Ordering::Relaxed);

		if hit {
			self.cache_hits.fetch_add(1, Ordering::Relaxed);
		} else {
			self.cache_misses.fetch_add(1, Ordering::Relaxed);
		}
	}

	/// Record an object eviction (memory-to-disk spill).
	pub fn record_eviction(&self) {
		self.evictions.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a rehydration (disk-to-memory reload on access).
	pub fn record_rehydration(&self) {
		self.rehydrations.fetch_add(1, Ordering::Relaxed);
	}

	/// Record a JSON Patch emitted by the live-query engine.
	pub fn record_patch_emitted(&self) {
		self.patches_emitted.fetch_add(1, Ordering::Relaxed);
	}

	/// Record the session's lifetime once it has expired.
	pub fn record_session_closed(&self, lifetime: Duration) {
		self.last_session_micros.store(lifetime.as_micros() as u64, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> SessionMetricsSnapshot {
		SessionMetricsSnapshot {
			total_reads: self.total_reads.load(Ordering::Relaxed),
			cache_hits: self.cache_hits.load(Ordering::Relaxed),
			cache_misses: self.cache_misses.load(Ordering::Relaxed),
			evictions: self.evictions.load(Ordering::Relaxed),
			rehydrations: self.rehydrations.load(Ordering::Relaxed),
			patches_emitted: self.patches_emitted.load(Ordering::Relaxed),
			last_session_micros: match self.last_session_micros.load(Ordering::Relaxed) {
				0 => None,
				value => Some(value),
			},
		}
	}
}

/// Read-only snapshot of per-session telemetry counters.
#[derive(Clone, Debug)]
pub struct SessionMetricsSnapshot {
	/// Total number of reads observed through this session's cache.
	pub total_reads: u64,
	/// Count of reads served from the in-memory or spilled cache.
	pub cache_hits: u64,
	/// Count of reads that missed and were served by the remote client.
	pub cache_misses: u64,
	/// Count of objects spilled to disk by the eviction scheduler.
	pub evictions: u64,
	/// Count of objects rehydrated from disk back into memory.
	pub rehydrations: u64,
	/// Count of JSON Patch documents emitted by live queries on this session.
	pub patches_emitted: u64,
	/// Microsecond lifetime of the session once closed.
	pub last_session_micros: Option<u64>,
}
impl SessionMetricsSnapshot {
	/// Convenience method to compute the cache hit rate.
	pub fn hit_rate(&self) -> f64 {
		if self.total_reads == 0 {
			0.0
		} else {
			self.cache_hits as f64 / self.total_reads as f64
		}
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the recorder is installed.
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Validation { field: "metrics_recorder", reason: err.to_string() })?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record a cache read, tagging the tenant and whether it hit.
pub fn record_read(tenant: &str, kind: &str, hit: bool) {
	let labels = base_labels(tenant, kind);

	metrics::counter!(METRIC_READS_TOTAL, labels.iter()).increment(1);

	if hit {
		metrics::counter!(METRIC_HITS_TOTAL, labels.iter()).increment(1);
	} else {
		metrics::counter!(METRIC_MISSES_TOTAL, labels.iter()).increment(1);
	}
}

/// Record an eviction of `count` objects to the spill store.
pub fn record_eviction(tenant: &str, kind: &str, count: u64) {
	metrics::counter!(METRIC_EVICTIONS_TOTAL, base_labels(tenant, kind).iter()).increment(count);
}

/// Record a rehydration from the spill store.
pub fn record_rehydration(tenant: &str, kind: &str) {
	metrics::counter!(METRIC_REHYDRATIONS_TOTAL, base_labels(tenant, kind).iter()).increment(1);
}

/// Record a new session being created.
pub fn record_session_created(tenant: &str) {
	metrics::counter!(METRIC_SESSIONS_TOTAL, tenant_label(tenant).iter()).increment(1);
}

/// Record a session's lifetime once it has expired and its client torn down.
pub fn record_session_closed(tenant: &str, lifetime: Duration) {
	metrics::histogram!(METRIC_SESSION_EXPIRY_DURATION, tenant_label(tenant).iter())
		.record(lifetime.as_secs_f64());
}

/// Record a JSON Patch document emitted to a live query.
pub fn record_patch_emitted(tenant: &str, kind: &str) {
	metrics::counter!(METRIC_PATCHES_EMITTED_TOTAL, base_labels(tenant, kind).iter()).increment(1);
}

fn tenant_label(tenant: &str) -> LabelSet {
	let mut labels = LabelSet::with_capacity(1);

	labels.push(Label::new("tenant", tenant.to_owned()));

	labels
}

fn base_labels(tenant: &str, kind: &str) -> LabelSet {
	let mut labels = tenant_label(tenant);

	labels.push(Label::new("kind", kind.to_owned()));

	labels
}
