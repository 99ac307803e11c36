//! An in-process reference [`Cache`]/[`Informer`] implementation.
//!
//! Real deployments supply a watch-backed cache wired to a remote typed client; that wire
//! protocol is explicitly out of scope (§1). `MemoryCache` exists so the crate is
//! self-contained and testable without one, exactly as `jwks-cache`'s `wiremock` stands in for
//! a real JWKS endpoint. Objects enter the cache via [`MemoryCache::ingest`], which models the
//! watch stream's Add/Update/Delete events and invokes the configured transform hook.

// std
use std::{
	collections::HashMap,
	sync::{
		Arc,
		atomic::{AtomicU64, Ordering},
	},
};
// crates.io
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
// self
use crate::{
	Result,
	client::{Cache, CacheOptions, HandlerId, Informer, ListOptions, ObjectList, TransformHook},
	model::{DynamicObject, GroupVersionKind, ObjectId, WatchEvent},
};

type EventHandler = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

/// In-memory informer backing one kind.
#[derive(Default)]
pub struct MemoryInformer {
	handlers: std::sync::Mutex<Vec<(HandlerId, EventHandler)>>,
	next_id: AtomicU64,
}
impl MemoryInformer {
	fn fire(&self, event: &WatchEvent) {
		let handlers = self.handlers.lock().expect("informer mutex poisoned");

		for (_, handler) in handlers.iter() {
			handler(event);
		}
	}
}
impl Informer for MemoryInformer {
	fn add_event_handler(&self, handler: EventHandler) -> HandlerId {
		let id = HandlerId(self.next_id.fetch_add(1, Ordering::SeqCst));

		self.handlers.lock().expect("informer mutex poisoned").push((id, handler));

		id
	}

	fn remove_event_handler(&self, id: HandlerId) {
		self.handlers.lock().expect("informer mutex poisoned").retain(|(existing, _)| *existing != id);
	}
}

/// In-process reference cache. Excluded kinds (§4.3) are rejected by [`MemoryCache::ingest`]
/// and by `get`/`list`, matching "reads for those kinds bypass the cache entirely".
pub struct MemoryCache {
	options: CacheOptions,
	transform: std::sync::RwLock<Option<TransformHook>>,
	objects: RwLock<HashMap<GroupVersionKind, HashMap<ObjectId, DynamicObject>>>,
	by_uid: RwLock<HashMap<GroupVersionKind, HashMap<String, ObjectId>>>,
	informers: RwLock<HashMap<GroupVersionKind, Arc<MemoryInformer>>>,
}
impl MemoryCache {
	/// Construct an empty cache with the given options.
	pub fn new(options: CacheOptions) -> Arc<Self> {
		Arc::new(Self {
			options,
			transform: std::sync::RwLock::new(None),
			objects: RwLock::new(HashMap::new()),
			by_uid: RwLock::new(HashMap::new()),
			informers: RwLock::new(HashMap::new()),
		})
	}

	fn is_excluded(&self, gvk: &GroupVersionKind) -> bool {
		self.options.excluded_kinds.contains(gvk)
	}

	/// Take a full clone of the object identified by `uid` for spill serialization, then zero
	/// the in-memory copy in place, preserving `uid`/`gvk` (§4.2 eviction step).
	pub async fn take_for_eviction(&self, gvk: &GroupVersionKind, uid: &str) -> Option<DynamicObject> {
		let by_uid = self.by_uid.read().await;
		let id = by_uid.get(gvk)?.get(uid)?.clone();

		drop(by_uid);

		let mut objects = self.objects.write().await;
		let object = objects.get_mut(gvk)?.get_mut(&id)?;
		let full = object.clone();

		object.zero();

		Some(full)
	}

	/// Overwrite the zeroed in-memory copy of `uid` with rehydrated bytes from the spill store
	/// (§4.2 read-path step 2). The map key (the object's real, non-empty id) is unaffected by
	/// zeroing, so the lookup via `by_uid` still resolves after eviction.
	pub async fn rehydrate(&self, gvk: &GroupVersionKind, uid: &str, bytes: &[u8]) -> Result<()> {
		let by_uid = self.by_uid.read().await;
		let Some(id) = by_uid.get(gvk).and_then(|m| m.get(uid)).cloned() else {
			return Ok(());
		};

		drop(by_uid);

		let mut objects = self.objects.write().await;

		if let Some(object) = objects.get_mut(gvk).and_then(|m| m.get_mut(&id)) {
			object.rehydrate_from(bytes)?;
		}

		Ok(())
	}

	/// Feed a simulated watch event into the cache, invoking the transform hook on
	/// Add/Update (per §6) and fanning it out to any registered informer handlers.
	pub async fn ingest(&self, event: WatchEvent) {
		let gvk = event.gvk().clone();

		if self.is_excluded(&gvk) {
			return;
		}

		{
			let mut objects = self.objects.write().await;
			let kind_map = objects.entry(gvk.clone()).or_default();
			let mut by_uid = self.by_uid.write().await;
			let uid_map = by_uid.entry(gvk.clone()).or_default();

			let transform = self.transform.read().expect("transform mutex poisoned").clone();

			match &event {
				WatchEvent::Added { object, .. } => {
					kind_map.insert(object.id.clone(), object.clone());
					uid_map.insert(object.uid.clone(), object.id.clone());

					if let Some(transform) = &transform {
						transform(object);
					}
				},
				WatchEvent::Updated { new, .. } => {
					kind_map.insert(new.id.clone(), new.clone());
					uid_map.insert(new.uid.clone(), new.id.clone());

					if let Some(transform) = &transform {
						transform(new);
					}
				},
				WatchEvent::Deleted { object } => {
					kind_map.remove(&object.id);
					uid_map.remove(&object.uid);
				},
			}
		}

		if let Some(informer) = self.informers.read().await.get(&gvk) {
			informer.fire(&event);
		}
	}
}
#[async_trait::async_trait]
impl Cache for MemoryCache {
	async fn get(&self, gvk: &GroupVersionKind, id: &ObjectId) -> Result<DynamicObject> {
		if self.is_excluded(gvk) {
			return Err(crate::Error::NotFound(id.clone()));
		}

		let objects = self.objects.read().await;

		objects
			.get(gvk)
			.and_then(|kind_map| kind_map.get(id))
			.cloned()
			.ok_or_else(|| crate::Error::NotFound(id.clone()))
	}

	async fn list(&self, gvk: &GroupVersionKind, opts: &ListOptions) -> Result<ObjectList> {
		if self.is_excluded(gvk) {
			return Ok(ObjectList::default());
		}

		let objects = self.objects.read().await;
		let items = objects
			.get(gvk)
			.map(|kind_map| {
				kind_map
					.values()
					.filter(|object| match &opts.namespace {
						Some(ns) => object.id.namespace.as_deref() == Some(ns.as_str()),
						None => true,
					})
					.cloned()
					.collect()
			})
			.unwrap_or_default();

		Ok(ObjectList { items })
	}

	async fn start(&self, cancel: CancellationToken) -> Result<()> {
		cancel.cancelled().await;

		Ok(())
	}

	async fn synced(&self) -> Result<()> {
		// No real watch warmup phase: objects arrive via direct `ingest` calls in tests, not a
		// background sync this cache waits on.
		Ok(())
	}

	fn informer_for(&self, gvk: &GroupVersionKind) -> Arc<dyn Informer> {
		// `informer_for` is sync in the trait (informer creation never blocks for this
		// in-process implementation), so lazily-created informers use a blocking lock.
		let mut informers = self.informers.blocking_write();

		informers.entry(gvk.clone()).or_insert_with(|| Arc::new(MemoryInformer::default())).clone()
	}

	fn set_transform(&self, hook: TransformHook) {
		*self.transform.write().expect("transform mutex poisoned") = Some(hook);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn widget(uid: &str, ns: &str, name: &str, value: i64) -> DynamicObject {
		DynamicObject::new(
			uid,
			GroupVersionKind::new("example.org", "v1", "Widget"),
			ObjectId::namespaced(ns, name),
			serde_json::json!({"value": value}),
		)
	}

	#[tokio::test]
	async fn get_after_ingest_returns_the_object() {
		let cache = MemoryCache::new(CacheOptions::default());
		let gvk = GroupVersionKind::new("example.org", "v1", "Widget");

		cache.ingest(WatchEvent::Added { object: widget("u1", "ns", "a", 42), from_initial_sync: false }).await;

		let got = cache.get(&gvk, &ObjectId::namespaced("ns", "a")).await.unwrap();

		assert_eq!(got.data, serde_json::json!({"value": 42}));
	}

	#[tokio::test]
	async fn excluded_kind_is_never_cached() {
		let gvk = GroupVersionKind::new("example.org", "v1", "Secret");
		let cache = MemoryCache::new(CacheOptions { excluded_kinds: vec![gvk.clone()], ..Default::default() });

		cache
			.ingest(WatchEvent::Added { object: widget("u1", "ns", "a", 1), from_initial_sync: false })
			.await;

		let err = cache.get(&gvk, &ObjectId::namespaced("ns", "a")).await.unwrap_err();

		assert!(matches!(err, crate::Error::NotFound(_)));
	}

	#[tokio::test]
	async fn informer_fires_on_ingest() {
		let cache = MemoryCache::new(CacheOptions::default());
		let gvk = GroupVersionKind::new("example.org", "v1", "Widget");
		let informer = cache.informer_for(&gvk);
		let seen = Arc::new(std::sync::Mutex::new(0));
		let seen_inner = seen.clone();

		informer.add_event_handler(Arc::new(move |_event| {
			*seen_inner.lock().unwrap() += 1;
		}));

		cache.ingest(WatchEvent::Added { object: widget("u1", "ns", "a", 1), from_initial_sync: false }).await;

		assert_eq!(*seen.lock().unwrap(), 1);
	}
}
