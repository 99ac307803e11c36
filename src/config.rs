//! Crate-wide configuration, following the teacher's `RegistryBuilder` validation idiom.

// std
use std::path::PathBuf;
// self
use crate::{
	_prelude::*,
	model::GroupVersionKind,
};

/// Default idle-session expiry, per §3/§6 ("cache-expiry", default 30m).
pub const DEFAULT_CACHE_EXPIRY: Duration = Duration::from_secs(30 * 60);
/// Default scheduler minimum wake tick, per §4.1.
pub const DEFAULT_EVICTION_TICK: Duration = Duration::from_secs(1);
/// Default object eviction-from-memory delay, per §4.2/§5.
pub const DEFAULT_EVICTION_DELAY: Duration = Duration::from_secs(60);

/// Top-level configuration for a deployment of the cache layer.
#[derive(Clone, Debug)]
pub struct Config {
	/// Idle-session timeout; a session with no activity for this long is torn down.
	pub cache_expiry: Duration,
	/// Base filename for the overlay spill store. `None` disables the overlay entirely.
	pub cache_file: Option<PathBuf>,
	/// Minimum wake tick for the expiration scheduler.
	pub eviction_tick: Duration,
	/// Kinds excluded from the watch cache entirely (§4.3 "resources not cached").
	pub excluded_kinds: Vec<GroupVersionKind>,
	/// Per-process salt folded into the identity hash (§3).
	pub process_salt: Vec<u8>,
}
impl Config {
	/// Start building a configuration.
	pub fn builder() -> ConfigBuilder {
		ConfigBuilder::default()
	}
}

/// Builder for [`Config`], validating on [`ConfigBuilder::build`].
#[derive(Default)]
pub struct ConfigBuilder {
	cache_expiry: Option<Duration>,
	cache_file: Option<PathBuf>,
	eviction_tick: Option<Duration>,
	excluded_kinds: Vec<GroupVersionKind>,
	process_salt: Option<Vec<u8>>,
}
impl ConfigBuilder {
	/// Override the idle-session expiry.
	pub fn cache_expiry(mut self, expiry: Duration) -> Self {
		self.cache_expiry = Some(expiry);

		self
	}

	/// Enable the overlay by naming a base spill-file path.
	pub fn cache_file(mut self, path: impl Into<PathBuf>) -> Self {
		self.cache_file = Some(path.into());

		self
	}

	/// Override the scheduler's minimum wake tick.
	pub fn eviction_tick(mut self, tick: Duration) -> Self {
		self.eviction_tick = Some(tick);

		self
	}

	/// Add a kind to exclude from the watch cache.
	pub fn exclude_kind(mut self, gvk: GroupVersionKind) -> Self {
		self.excluded_kinds.push(gvk);

		self
	}

	/// Set the per-process salt folded into the identity hash. Required.
	pub fn process_salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
		self.process_salt = Some(salt.into());

		self
	}

	/// Validate and construct the [`Config`].
	pub fn build(self) -> Result<Config> {
		let cache_expiry = self.cache_expiry.unwrap_or(DEFAULT_CACHE_EXPIRY);

		if cache_expiry.is_zero() {
			return Err(Error::Validation {
				field: "cache_expiry",
				reason: "must be a positive duration".into(),
			});
		}

		let eviction_tick = self.eviction_tick.unwrap_or(DEFAULT_EVICTION_TICK);
		let process_salt = self.process_salt.ok_or_else(|| Error::Validation {
			field: "process_salt",
			reason: "must be set; an empty salt defeats the identity hash".into(),
		})?;

		if process_salt.is_empty() {
			return Err(Error::Validation {
				field: "process_salt",
				reason: "must not be empty".into(),
			});
		}

		Ok(Config {
			cache_expiry,
			cache_file: self.cache_file,
			eviction_tick,
			excluded_kinds: self.excluded_kinds,
			process_salt,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn build_requires_a_process_salt() {
		let err = Config::builder().build().unwrap_err();

		assert!(matches!(err, Error::Validation { field: "process_salt", .. }));
	}

	#[test]
	fn build_rejects_zero_expiry() {
		let err = Config::builder()
			.process_salt(b"salt".to_vec())
			.cache_expiry(Duration::ZERO)
			.build()
			.unwrap_err();

		assert!(matches!(err, Error::Validation { field: "cache_expiry", .. }));
	}

	#[test]
	fn build_applies_defaults() {
		let config = Config::builder().process_salt(b"salt".to_vec()).build().unwrap();

		assert_eq!(config.cache_expiry, DEFAULT_CACHE_EXPIRY);
		assert_eq!(config.eviction_tick, DEFAULT_EVICTION_TICK);
		assert!(config.cache_file.is_none());
	}
}
