//! Multi-tenant read-through watch cache and GraphQL live-query layer sitting between a
//! query executor and a typed remote-object API.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod client;
pub mod config;
pub mod identity;
#[cfg(feature = "metrics")] pub mod metrics;
pub mod model;
pub mod overlay;
pub mod session;

mod error;
mod livequery;
mod memory_cache;
mod scheduler;
mod taskgroup;
mod _prelude {
	pub use std::{
		sync::Arc,
		time::{Duration, SystemTime},
	};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	config::{Config, ConfigBuilder},
	error::{Error, Result, TracingWatchErrorSink, WatchErrorSink},
	livequery::{
		LiveQueryCache, LiveQueryExtension, LiveQueryExtensionFactory, QueryId, RenderDelta, debounce::Debouncer,
		patch::LiveQueryPatch, render_delta,
	},
	memory_cache::{MemoryCache, MemoryInformer},
	overlay::OverlayCache,
	scheduler::Scheduler,
	session::{Session, SessionCache},
	taskgroup::TaskGroup,
};

#[cfg(test)]
mod _test {
	use metrics_util as _;
	use tempfile as _;
	use tracing_subscriber as _;
}
