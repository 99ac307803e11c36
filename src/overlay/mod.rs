//! The overlay cache: a memory-to-disk spill tier on top of the in-memory watch cache (§4.2).

pub mod coalesce;
pub mod spill;

// std
use std::collections::HashMap;
// crates.io
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	client::{Cache, Informer, ListOptions, ObjectList},
	memory_cache::MemoryCache,
	model::{DynamicObject, GroupVersionKind, ObjectId},
	overlay::spill::{OBJECTS_BUCKET, ReadTransaction, SpillStore},
	scheduler::Scheduler,
	taskgroup::TaskGroup,
};

/// Eviction key: every scheduled item is keyed and payloaded by `(kind, uid)`.
type EvictionItem = (GroupVersionKind, String);

/// Tuning knobs for an [`OverlayCache`].
#[derive(Clone, Debug)]
pub struct OverlayOptions {
	/// Default deep-copy behavior for reads, overridable per `List` call (§4.2 "Deep-copy policy").
	pub deep_copy_by_default: bool,
	/// Delay before an ingested or just-read object is evicted to disk.
	pub eviction_delay: Duration,
}
impl Default for OverlayOptions {
	fn default() -> Self {
		Self { deep_copy_by_default: true, eviction_delay: crate::config::DEFAULT_EVICTION_DELAY }
	}
}

/// Memory-to-disk spill cache wrapping an in-memory [`MemoryCache`].
pub struct OverlayCache {
	inner: Arc<MemoryCache>,
	spill: Arc<dyn SpillStore>,
	scheduler: Arc<Scheduler<String, EvictionItem>>,
	options: OverlayOptions,
}
impl OverlayCache {
	/// Construct a new overlay over `inner`, spilling evicted objects into `spill`, and install
	/// the ingestion hook on `inner` that schedules every added/updated object for eviction
	/// (§4.2 "the overlay schedules eviction of that object... via the scheduler").
	pub fn new(inner: Arc<MemoryCache>, spill: Arc<dyn SpillStore>, options: OverlayOptions) -> Arc<Self> {
		let scheduler = Arc::new(Scheduler::with_default_tick());
		let hook_scheduler = scheduler.clone();
		let eviction_delay = options.eviction_delay;

		inner.set_transform(Arc::new(move |object: &DynamicObject| {
			let _ =
				hook_scheduler.schedule(object.uid.clone(), (object.gvk.clone(), object.uid.clone()), eviction_delay);
		}));

		Arc::new(Self { inner, spill, scheduler, options })
	}

	/// Point lookup, honoring an optional externally-coalesced read transaction.
	#[tracing::instrument(skip(self, tx), fields(kind = %gvk.kind))]
	pub async fn get(
		&self,
		gvk: &GroupVersionKind,
		id: &ObjectId,
		tx: Option<&Arc<dyn ReadTransaction>>,
	) -> Result<DynamicObject> {
		let mut object = self.inner.get(gvk, id).await?;

		self.after_read(gvk, &mut object, tx).await?;

		Ok(self.resolve_deep_copy(object, None))
	}

	/// List query, honoring an optional externally-coalesced read transaction.
	#[tracing::instrument(skip(self, tx), fields(kind = %gvk.kind))]
	pub async fn list(
		&self,
		gvk: &GroupVersionKind,
		opts: &ListOptions,
		tx: Option<&Arc<dyn ReadTransaction>>,
	) -> Result<ObjectList> {
		let mut list = self.inner.list(gvk, opts).await?;

		for object in &mut list.items {
			self.after_read(gvk, object, tx).await?;
		}

		let items =
			list.items.into_iter().map(|object| self.resolve_deep_copy(object, opts.disable_deep_copy)).collect();

		Ok(ObjectList { items })
	}

	fn resolve_deep_copy(&self, object: DynamicObject, disable_override: Option<bool>) -> DynamicObject {
		let deep_copy = disable_override.map(|disabled| !disabled).unwrap_or(self.options.deep_copy_by_default);

		// The overlay still owns an equivalent in-memory entry after this read returns, so a
		// deep copy hands the caller an independent value it is free to mutate; opting out
		// saves the clone when the caller promises not to.
		if deep_copy { object.clone() } else { object }
	}

	async fn after_read(
		&self,
		gvk: &GroupVersionKind,
		object: &mut DynamicObject,
		tx: Option<&Arc<dyn ReadTransaction>>,
	) -> Result<()> {
		let _ =
			self.scheduler.schedule(object.uid.clone(), (gvk.clone(), object.uid.clone()), self.options.eviction_delay);

		if object.is_zeroed() {
			let bytes = match tx {
				Some(tx) => tx.get(OBJECTS_BUCKET, &object.uid)?,
				None => self.spill.begin_read(OBJECTS_BUCKET)?.get(OBJECTS_BUCKET, &object.uid)?,
			}
			.ok_or_else(|| Error::MissingKey(object.uid.clone()))?;

			self.inner.rehydrate(gvk, &object.uid, &bytes).await?;
			object.rehydrate_from(&bytes)?;

			#[cfg(feature = "metrics")]
			crate::metrics::record_rehydration("", &gvk.kind);

			tracing::debug!(uid = %object.uid, kind = %gvk.kind, "rehydrated object from spill store");
		}

		Ok(())
	}
}
#[async_trait::async_trait]
impl Cache for OverlayCache {
	async fn get(&self, gvk: &GroupVersionKind, id: &ObjectId) -> Result<DynamicObject> {
		OverlayCache::get(self, gvk, id, None).await
	}

	async fn list(&self, gvk: &GroupVersionKind, opts: &ListOptions) -> Result<ObjectList> {
		OverlayCache::list(self, gvk, opts, None).await
	}

	/// Supervises three tasks (§4.2 "Lifecycle"): the scheduler loop, the inner cache's own
	/// background operation, and spill-file teardown on cancellation.
	async fn start(&self, cancel: CancellationToken) -> Result<()> {
		let mut group = TaskGroup::new(Some(&cancel));

		{
			let inner = self.inner.clone();
			let spill = self.spill.clone();
			let scheduler = self.scheduler.clone();
			let scheduler_cancel = cancel.clone();

			group.spawn(async move {
				scheduler
					.start(scheduler_cancel, move |batch| {
						let inner = inner.clone();
						let spill = spill.clone();

						async move { evict_batch(&inner, spill.as_ref(), batch).await }
					})
					.await
			});
		}

		{
			let inner = self.inner.clone();
			let inner_cancel = cancel.clone();

			group.spawn(async move { Cache::start(inner.as_ref(), inner_cancel).await });
		}

		{
			let spill = self.spill.clone();
			let teardown_cancel = cancel.clone();

			group.spawn(async move {
				teardown_cancel.cancelled().await;
				spill.close_and_remove()
			});
		}

		group.join().await
	}

	async fn synced(&self) -> Result<()> {
		Cache::synced(self.inner.as_ref()).await
	}

	fn informer_for(&self, gvk: &GroupVersionKind) -> Arc<dyn Informer> {
		self.inner.informer_for(gvk)
	}

	fn set_transform(&self, hook: crate::client::TransformHook) {
		// The overlay already installed its own eviction-scheduling hook on `inner` at
		// construction; a caller-supplied hook runs alongside it.
		let eviction_hook = {
			let scheduler = self.scheduler.clone();
			let eviction_delay = self.options.eviction_delay;

			move |object: &DynamicObject| {
				let _ = scheduler.schedule(object.uid.clone(), (object.gvk.clone(), object.uid.clone()), eviction_delay);
			}
		};

		self.inner.set_transform(Arc::new(move |object: &DynamicObject| {
			eviction_hook(object);
			hook(object);
		}));
	}
}

async fn evict_batch(inner: &MemoryCache, spill: &dyn SpillStore, mut batch: Vec<EvictionItem>) -> Result<()> {
	// Sort by uid for the spill store's B+ tree write locality (§4.2).
	batch.sort_by(|a, b| a.1.cmp(&b.1));

	let mut by_kind: HashMap<GroupVersionKind, Vec<(String, Vec<u8>)>> = HashMap::new();

	for (gvk, uid) in batch {
		if let Some(object) = inner.take_for_eviction(&gvk, &uid).await {
			let bytes = object.to_bytes().map_err(|err| Error::Serialization(err.to_string()))?;

			by_kind.entry(gvk).or_default().push((uid, bytes));
		}
	}

	for (gvk, items) in by_kind {
		let count = items.len() as u64;

		spill.write_batch(OBJECTS_BUCKET, items)?;

		#[cfg(feature = "metrics")]
		crate::metrics::record_eviction("", &gvk.kind, count);

		tracing::debug!(kind = %gvk.kind, count, "evicted batch to spill store");
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{client::CacheOptions, model::WatchEvent, overlay::spill::MemorySpillStore};

	fn widget(uid: &str, ns: &str, name: &str, value: i64) -> DynamicObject {
		DynamicObject::new(
			uid,
			GroupVersionKind::new("example.org", "v1", "Widget"),
			ObjectId::namespaced(ns, name),
			serde_json::json!({"value": value}),
		)
	}

	#[tokio::test]
	async fn round_trip_through_eviction_and_rehydration() {
		let gvk = GroupVersionKind::new("example.org", "v1", "Widget");
		let spill = MemorySpillStore::new();
		let inner = MemoryCache::new(CacheOptions::default());
		let overlay =
			OverlayCache::new(inner.clone(), spill, OverlayOptions {
				eviction_delay: Duration::from_millis(5),
				..Default::default()
			});

		inner.ingest(WatchEvent::Added { object: widget("u1", "ns", "a", 42), from_initial_sync: false }).await;

		let cancel = CancellationToken::new();
		let overlay_bg = overlay.clone();
		let cancel_bg = cancel.clone();
		let handle = tokio::spawn(async move { Cache::start(overlay_bg.as_ref(), cancel_bg).await });

		tokio::time::sleep(Duration::from_millis(40)).await;

		let got = overlay.get(&gvk, &ObjectId::namespaced("ns", "a"), None).await.unwrap();

		assert_eq!(got.data, serde_json::json!({"value": 42}));

		cancel.cancel();
		handle.await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn deep_copy_default_returns_independent_clone() {
		let gvk = GroupVersionKind::new("example.org", "v1", "Widget");
		let inner = MemoryCache::new(CacheOptions::default());
		let overlay = OverlayCache::new(inner.clone(), MemorySpillStore::new(), OverlayOptions::default());

		inner.ingest(WatchEvent::Added { object: widget("u1", "ns", "a", 1), from_initial_sync: false }).await;

		let a = overlay.get(&gvk, &ObjectId::namespaced("ns", "a"), None).await.unwrap();
		let b = overlay.get(&gvk, &ObjectId::namespaced("ns", "a"), None).await.unwrap();

		assert_eq!(a.data, b.data);
	}

	#[tokio::test]
	async fn missing_spill_key_for_a_zeroed_object_is_an_error() {
		let gvk = GroupVersionKind::new("example.org", "v1", "Widget");
		let inner = MemoryCache::new(CacheOptions::default());
		let spill = MemorySpillStore::new();
		let overlay = OverlayCache::new(inner.clone(), spill.clone(), OverlayOptions::default());

		inner.ingest(WatchEvent::Added { object: widget("u1", "ns", "a", 1), from_initial_sync: false }).await;
		// Ensure the bucket exists but the evicted uid's bytes never were, per §7's distinction
		// between "missing bucket" (no eviction yet) and "missing key" (bytes never written).
		spill.write_batch(OBJECTS_BUCKET, vec![("other-uid".into(), b"x".to_vec())]).unwrap();
		inner.take_for_eviction(&gvk, "u1").await;

		let err = overlay.get(&gvk, &ObjectId::namespaced("ns", "a"), None).await.unwrap_err();

		assert!(matches!(err, Error::MissingKey(_)));
	}
}
