//! Crate-wide error types and `Result` alias.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// self
use crate::model::{GroupVersionKind, ObjectId};

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the watch-cache crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Spill(#[from] sled::Error),

	#[error("cannot sync cache: {0}")]
	CacheSync(String),
	#[error("object {0:?} not found")]
	NotFound(ObjectId),
	#[error("spill store transaction failed: {0}")]
	SpillTransaction(String),
	#[error("spill bucket '{0}' is missing; overlay has not evicted anything yet")]
	MissingBucket(&'static str),
	#[error("spill key for uid '{0}' is missing; object was never evicted")]
	MissingKey(String),
	#[error("eviction batch serialization failed: {0}")]
	Serialization(String),
	#[error("write-through call failed: {0}")]
	Write(String),
	#[error("json patch computation failed: {0}")]
	Patch(String),
	#[error("scheduler already started")]
	SchedulerAlreadyStarted,
	#[error("negative delay given to Schedule: {0:?}")]
	NegativeDelay(std::time::Duration),
	#[error("validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
#[cfg(feature = "metrics")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Validation { field: "metrics_recorder", reason: value.to_string() }
	}
}

/// Hook that observes runtime-error conditions surfaced by the underlying watch client
/// (most notably unauthorized-watch errors, per the error-handling design's "logged at
/// debug" policy) without resorting to a process-global sink.
///
/// Tests can install a recording sink to assert on swallowed errors; production callers
/// wire this to their logging/telemetry stack.
pub trait WatchErrorSink: Send + Sync {
	/// Called whenever the underlying client layer reports a runtime error for a watch
	/// (e.g. RBAC was revoked for a previously-working watch).
	fn unauthorized_watch(&self, gvk: &GroupVersionKind, message: &str);
}

/// Default sink that logs at `debug`, matching the spec's prescribed handling.
#[derive(Default)]
pub struct TracingWatchErrorSink;
impl WatchErrorSink for TracingWatchErrorSink {
	fn unauthorized_watch(&self, gvk: &GroupVersionKind, message: &str) {
		tracing::debug!(
			group = %gvk.group,
			version = %gvk.version,
			kind = %gvk.kind,
			%message,
			"unauthorized watch; serving stale/not-found until RBAC changes or session expires"
		);
	}
}
impl Debug for TracingWatchErrorSink {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		write!(f, "TracingWatchErrorSink")
	}
}
