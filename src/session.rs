//! The session cache: per-credential cached clients with lazy creation, idle expiry, and
//! supervised lifetime (§4.3).

// std
use std::{
	collections::HashMap,
	sync::Mutex as StdMutex,
};
// crates.io
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	client::{Cache, CacheFactory, CacheOptions, Informer, ListOptions, ObjectList, RemoteClient},
	config::Config,
	identity::{Credentials, Identity},
	model::{DynamicObject, GroupVersionKind, ObjectId},
	taskgroup::TaskGroup,
};

/// A resettable idle-expiry timer (§4.3 "Timeout contract": "a resettable ticker, not a
/// context deadline, because deadlines are not extendable").
struct IdleTimer {
	deadline: StdMutex<Instant>,
	reset: Notify,
	expiry: Duration,
}
impl IdleTimer {
	fn new(expiry: Duration) -> Arc<Self> {
		Arc::new(Self { deadline: StdMutex::new(Instant::now() + expiry), reset: Notify::new(), expiry })
	}

	/// Reset the deadline to `now + expiry`; called before every session operation.
	fn touch(&self) {
		*self.deadline.lock().expect("idle timer mutex poisoned") = Instant::now() + self.expiry;
		self.reset.notify_one();
	}

	/// Resolve once the timer has had no activity for a full `expiry` interval.
	async fn wait_expired(&self) {
		loop {
			let deadline = *self.deadline.lock().expect("idle timer mutex poisoned");
			let now = Instant::now();

			if now >= deadline {
				return;
			}

			tokio::select! {
				_ = tokio::time::sleep(deadline - now) => {
					if Instant::now() >= *self.deadline.lock().expect("idle timer mutex poisoned") {
						return;
					}
				},
				_ = self.reset.notified() => {},
			}
		}
	}
}

/// The triple `(client, cancel_fn, expiry_timer)` from §3, bundling both the write-through
/// remote client and the read-path cache behind a single handle that resets the idle timer on
/// every operation.
pub struct Session {
	cache: Arc<dyn Cache>,
	remote: Arc<dyn RemoteClient>,
	cancel: CancellationToken,
	idle: Arc<IdleTimer>,
	created_at: Instant,
}
impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Session").finish_non_exhaustive()
	}
}
impl Session {
	/// Point lookup, delegated to this session's cache.
	pub async fn get(&self, gvk: &GroupVersionKind, id: &ObjectId) -> Result<DynamicObject> {
		self.idle.touch();
		self.cache.get(gvk, id).await
	}

	/// List query, delegated to this session's cache.
	pub async fn list(&self, gvk: &GroupVersionKind, opts: &ListOptions) -> Result<ObjectList> {
		self.idle.touch();
		self.cache.list(gvk, opts).await
	}

	/// Obtain the informer for a kind, for live-query registration.
	pub fn informer_for(&self, gvk: &GroupVersionKind) -> Arc<dyn Informer> {
		self.idle.touch();
		self.cache.informer_for(gvk)
	}

	/// Create an object (write-through, bypasses the cache per Non-goals).
	pub async fn create(&self, object: DynamicObject) -> Result<DynamicObject> {
		self.idle.touch();
		self.remote.create(object).await
	}

	/// Update an object (write-through, bypasses the cache per Non-goals).
	pub async fn update(&self, object: DynamicObject) -> Result<DynamicObject> {
		self.idle.touch();
		self.remote.update(object).await
	}

	/// Delete a single object (write-through, bypasses the cache per Non-goals).
	pub async fn delete(&self, gvk: &GroupVersionKind, id: &ObjectId) -> Result<()> {
		self.idle.touch();
		self.remote.delete(gvk, id).await
	}

	/// Apply a patch to an object (write-through, bypasses the cache per Non-goals).
	pub async fn patch(&self, gvk: &GroupVersionKind, id: &ObjectId, patch: serde_json::Value) -> Result<DynamicObject> {
		self.idle.touch();
		self.remote.patch(gvk, id, patch).await
	}

	/// Delete every object of a kind matching `opts` (write-through, bypasses the cache).
	pub async fn delete_all_of(&self, gvk: &GroupVersionKind, opts: &ListOptions) -> Result<()> {
		self.idle.touch();
		self.remote.delete_all_of(gvk, opts).await
	}
}

/// Function constructing a credentialed [`RemoteClient`] from caller credentials; the narrow
/// seam this crate needs from a real typed client library's connection setup.
pub type ClientFactory = Arc<dyn Fn(&Credentials) -> Result<Arc<dyn RemoteClient>> + Send + Sync>;

/// Per-identity cached-client factory with idle expiry and supervised lifetime (§4.3).
pub struct SessionCache {
	sessions: RwLock<HashMap<Identity, Arc<Session>>>,
	config: Config,
	client_factory: ClientFactory,
	cache_factory: Arc<dyn CacheFactory>,
	root_cancel: CancellationToken,
}
impl SessionCache {
	/// Construct a session cache under `root_cancel` (the process-lifetime cancellation).
	pub fn new(
		config: Config,
		client_factory: ClientFactory,
		cache_factory: Arc<dyn CacheFactory>,
		root_cancel: CancellationToken,
	) -> Arc<Self> {
		Arc::new(Self { sessions: RwLock::new(HashMap::new()), config, client_factory, cache_factory, root_cancel })
	}

	/// Return the existing session for `credentials`, or lazily construct one (§4.3 "Creation").
	///
	/// Takes `session_cache` explicitly (rather than as a `self` receiver) because the two
	/// background supervisors spawned on first access need their own owned handle to the cache;
	/// callers hold an `Arc<SessionCache>` already, so this costs one refcount bump.
	///
	/// `opts_fingerprint` folds any session-option bytes into the identity hash so that two
	/// `get` calls with identical credentials but different cache options never collide.
	#[tracing::instrument(skip(session_cache, credentials, opts_fingerprint))]
	pub async fn get(
		session_cache: &Arc<Self>,
		credentials: Credentials,
		opts_fingerprint: &[u8],
	) -> Result<Arc<Session>> {
		let identity = Identity::derive(&credentials, &session_cache.config.process_salt, opts_fingerprint);

		if let Some(session) = session_cache.sessions.read().await.get(&identity) {
			session.idle.touch();

			return Ok(session.clone());
		}

		let remote = (session_cache.client_factory)(&credentials)?;
		let cache_options = CacheOptions {
			deep_copy_by_default: true,
			excluded_kinds: session_cache.config.excluded_kinds.clone(),
		};
		let cache = session_cache.cache_factory.build(remote.clone(), cache_options);

		let mut sessions = session_cache.sessions.write().await;

		// Double-checked: another caller may have won the race while we built `cache`/`remote`.
		if let Some(existing) = sessions.get(&identity) {
			existing.idle.touch();

			return Ok(existing.clone());
		}

		let mut group = TaskGroup::new(Some(&session_cache.root_cancel));
		let cancel = group.cancellation();
		let idle = IdleTimer::new(session_cache.config.cache_expiry);
		let session = Arc::new(Session {
			cache: cache.clone(),
			remote,
			cancel: cancel.clone(),
			idle: idle.clone(),
			created_at: Instant::now(),
		});

		sessions.insert(identity, session.clone());

		drop(sessions);

		tracing::debug!(identity = ?identity, "session created");

		#[cfg(feature = "metrics")]
		crate::metrics::record_session_created("");

		{
			let this = session_cache.clone();
			let cache_bg = cache.clone();
			let cache_cancel = cancel.clone();

			group.spawn(async move {
				let result = Cache::start(cache_bg.as_ref(), cache_cancel).await;

				if let Err(err) = &result {
					tracing::warn!(?err, identity = ?identity, "session cache stopped");
				}

				this.remove(identity).await;

				result
			});
		}

		{
			let this = session_cache.clone();
			let idle_bg = idle.clone();
			let idle_cancel = cancel.clone();

			group.spawn(async move {
				tokio::select! {
					_ = idle_bg.wait_expired() => {},
					_ = idle_cancel.cancelled() => {},
				}

				this.remove(identity).await;

				Ok(())
			});
		}

		// The two supervisors run detached; `get` does not block on them past this point.
		// Dropping the group only drops its `JoinHandle`s, which does not abort the
		// already-spawned tasks.
		drop(group);

		// §4.3 step 6: wait for the cache's initial sync before handing the session back; a
		// session whose cache never became usable is worse than no session at all.
		if let Err(err) = cache.synced().await {
			tracing::warn!(?err, identity = ?identity, "session cache failed to sync");

			session_cache.remove(identity).await;

			return Err(Error::CacheSync(err.to_string()));
		}

		Ok(session)
	}

	/// Idempotently remove `identity`'s session: cancels its context and deletes the map entry.
	/// Safe to call from either supervisor, or concurrently from both.
	pub async fn remove(&self, identity: Identity) {
		let mut sessions = self.sessions.write().await;

		if let Some(session) = sessions.remove(&identity) {
			session.cancel.cancel();

			#[cfg(feature = "metrics")]
			crate::metrics::record_session_closed("", session.created_at.elapsed());

			tracing::debug!(?identity, "session removed");
		}
	}

	/// Number of live sessions, for diagnostics and tests.
	pub async fn session_count(&self) -> usize {
		self.sessions.read().await.len()
	}
}
