//! End-to-end scenarios exercising the public surface across module boundaries, one test per
//! named scenario.

// std
use std::sync::Arc;
// crates.io
use tokio::sync::Mutex as TokioMutex;
use tokio_util::sync::CancellationToken;
// this crate
use watchcache::{
	Config, Debouncer, LiveQueryCache, LiveQueryPatch, MemoryCache, RenderDelta, Scheduler, SessionCache,
	client::{Cache, CacheFactory, CacheOptions, ListOptions, ObjectList, RemoteClient},
	identity::Credentials,
	model::{DynamicObject, GroupVersionKind, ObjectId, WatchEvent},
	overlay::{
		OverlayCache, OverlayOptions,
		coalesce::CoalesceSlot,
		spill::{MemorySpillStore, OBJECTS_BUCKET},
	},
	render_delta,
};

fn widget(uid: &str, ns: &str, name: &str, value: i64) -> DynamicObject {
	DynamicObject::new(
		uid,
		GroupVersionKind::new("example.org", "v1", "Widget"),
		ObjectId::namespaced(ns, name),
		serde_json::json!({"value": value}),
	)
}

/// A `RemoteClient` that never succeeds, for sessions that only ever read from their cache.
struct NullRemoteClient;
#[async_trait::async_trait]
impl RemoteClient for NullRemoteClient {
	async fn get(&self, _gvk: &GroupVersionKind, id: &ObjectId) -> watchcache::Result<DynamicObject> {
		Err(watchcache::Error::NotFound(id.clone()))
	}
	async fn list(&self, _gvk: &GroupVersionKind, _opts: &ListOptions) -> watchcache::Result<ObjectList> {
		Ok(ObjectList::default())
	}
	async fn create(&self, object: DynamicObject) -> watchcache::Result<DynamicObject> {
		Ok(object)
	}
	async fn update(&self, object: DynamicObject) -> watchcache::Result<DynamicObject> {
		Ok(object)
	}
	async fn delete(&self, _gvk: &GroupVersionKind, _id: &ObjectId) -> watchcache::Result<()> {
		Ok(())
	}
	async fn patch(
		&self,
		_gvk: &GroupVersionKind,
		_id: &ObjectId,
		_patch: serde_json::Value,
	) -> watchcache::Result<DynamicObject> {
		Err(watchcache::Error::Write("patch not supported by NullRemoteClient".into()))
	}
	async fn delete_all_of(&self, _gvk: &GroupVersionKind, _opts: &ListOptions) -> watchcache::Result<()> {
		Ok(())
	}
}

struct MemoryCacheFactory;
impl CacheFactory for MemoryCacheFactory {
	fn build(&self, _client: Arc<dyn RemoteClient>, options: CacheOptions) -> Arc<dyn Cache> {
		MemoryCache::new(options)
	}
}

fn test_config(expiry: std::time::Duration) -> Config {
	Config::builder().process_salt(b"integration-salt".to_vec()).cache_expiry(expiry).build().unwrap()
}

/// S1 — Warmup+read: the first read returns the seeded value; after the eviction delay passes
/// with no further access the in-memory copy is zeroed; a subsequent read rehydrates it from the
/// spill store and returns the same value (spec §8 "S1 — Warmup+read").
#[tokio::test]
async fn s1_warmup_then_read_survives_eviction_and_rehydration() {
	let gvk = GroupVersionKind::new("example.org", "v1", "Widget");
	let id = ObjectId::namespaced("n", "a");
	let inner = MemoryCache::new(CacheOptions::default());
	let spill = MemorySpillStore::new();
	let overlay =
		OverlayCache::new(inner.clone(), spill, OverlayOptions {
			eviction_delay: std::time::Duration::from_millis(20),
			..Default::default()
		});

	inner.ingest(WatchEvent::Added { object: widget("u1", "n", "a", 42), from_initial_sync: true }).await;

	let cancel = CancellationToken::new();
	let overlay_bg = overlay.clone();
	let cancel_bg = cancel.clone();
	let handle = tokio::spawn(async move { Cache::start(overlay_bg.as_ref(), cancel_bg).await });

	let first = overlay.get(&gvk, &id, None).await.unwrap();

	assert_eq!(first.data["value"], 42);

	tokio::time::sleep(std::time::Duration::from_millis(80)).await;

	let raw = inner.get(&gvk, &id).await.unwrap();

	assert!(raw.is_zeroed(), "memory probe must show the object zeroed after the eviction delay");

	let second = overlay.get(&gvk, &id, None).await.unwrap();

	assert_eq!(second.data["value"], 42);

	cancel.cancel();
	handle.await.unwrap().unwrap();
}

/// S2 — Expired session: a session with no activity past its expiry is torn down, and the next
/// `get` for the same identity produces a distinct session (spec §8 "S2 — Expired session").
#[tokio::test]
async fn s2_expired_session_is_replaced_by_a_new_one() {
	let config = test_config(std::time::Duration::from_millis(60));
	let root_cancel = CancellationToken::new();
	let cache = SessionCache::new(
		config,
		Arc::new(|_: &Credentials| Ok(Arc::new(NullRemoteClient) as Arc<dyn RemoteClient>)),
		Arc::new(MemoryCacheFactory),
		root_cancel,
	);
	let credentials = Credentials::new("tok", None);

	let first = SessionCache::get(&cache, credentials.clone(), b"").await.unwrap();

	tokio::time::sleep(std::time::Duration::from_millis(150)).await;

	assert_eq!(cache.session_count().await, 0);

	let second = SessionCache::get(&cache, credentials, b"").await.unwrap();

	assert!(!Arc::ptr_eq(&first, &second));
}

/// S3 — JSON Patch: a render that changes one field against the previous render emits a
/// `replace` patch at the revision bumped by one (spec §8 "S3 — JSON Patch").
#[test]
fn s3_changed_render_emits_the_expected_json_patch_envelope() {
	let previous = serde_json::json!({"a": 1, "b": 2});
	let current = serde_json::json!({"a": 1, "b": 3});
	let mut revision = 0;
	let delta = render_delta(Some(&previous), &current, &mut revision);

	let RenderDelta::Patch(LiveQueryPatch { revision, json_patch }) = delta else {
		panic!("expected a patch delta");
	};

	assert_eq!(revision, 1);

	let value = serde_json::to_value(&json_patch).unwrap();

	assert_eq!(value, serde_json::json!([{"op": "replace", "path": "/b", "value": 3}]));
}

/// S4 — Live-query cancel: cancelling mid-wait unblocks the debouncer immediately, with no
/// further emissions (spec §8 "S4 — Live-query cancel").
#[tokio::test]
async fn s4_cancelling_a_live_query_unblocks_its_wait_with_no_emission() {
	let gvk = GroupVersionKind::new("example.org", "v1", "Widget");
	let inner = MemoryCache::new(CacheOptions::default());
	let live = LiveQueryCache::new(inner.clone());
	let (query, debouncer) = live.begin_query(std::time::Duration::from_secs(60));

	live.list(query, &gvk, &ListOptions::default()).await.unwrap();
	inner.ingest(WatchEvent::Added { object: widget("u1", "ns", "a", 1), from_initial_sync: false }).await;

	let cancel = CancellationToken::new();
	let debouncer_bg = debouncer.clone();
	let cancel_bg = cancel.clone();
	let handle = tokio::spawn(async move { debouncer_bg.wait_ready(&cancel_bg).await });

	tokio::time::sleep(std::time::Duration::from_millis(10)).await;
	cancel.cancel();

	let ready = tokio::time::timeout(std::time::Duration::from_millis(50), handle).await.unwrap().unwrap();

	assert!(!ready, "a cancelled wait must report not-ready, never emit");
}

/// S5 — Scheduler reorder: four items scheduled for the same deadline are each rescheduled to
/// an earlier, staggered deadline in turn; cleanups observe them in the rescheduled order, one
/// key per batch (spec §8 "S5 — Scheduler reorder").
#[tokio::test]
async fn s5_scheduler_reorder_fires_in_the_rescheduled_order() {
	let scheduler: Arc<Scheduler<u32, u32>> = Arc::new(Scheduler::new(std::time::Duration::ZERO));
	let ms = std::time::Duration::from_millis;

	for key in 1..=4u32 {
		scheduler.schedule(key, key, ms(50)).unwrap();
	}

	let seen = Arc::new(TokioMutex::new(Vec::new()));
	let cancel = CancellationToken::new();
	let handle = tokio::spawn({
		let scheduler = scheduler.clone();
		let cancel = cancel.clone();
		let seen = seen.clone();

		async move {
			scheduler
				.start(cancel, |batch| {
					let seen = seen.clone();

					async move {
						seen.lock().await.push(batch);

						Ok(())
					}
				})
				.await
		}
	});

	tokio::time::sleep(ms(10)).await;
	scheduler.schedule(4, 4, ms(10)).unwrap();
	tokio::time::sleep(ms(10)).await;
	scheduler.schedule(3, 3, ms(10)).unwrap();
	tokio::time::sleep(ms(10)).await;
	scheduler.schedule(2, 2, ms(10)).unwrap();

	tokio::time::sleep(ms(120)).await;
	cancel.cancel();
	handle.await.unwrap().unwrap();

	let batches = seen.lock().await.clone();
	let fired: Vec<u32> = batches.into_iter().flatten().collect();

	assert_eq!(fired, vec![4, 3, 2, 1], "rescheduled keys must fire in their new order, key 1 last (never rescheduled)");
}

/// S6 — Coalesced reads: 3 `Get`s and 2 `List`s sharing one request-scoped [`CoalesceSlot`] all
/// observe the identical underlying transaction handle, and acquiring again after every guard
/// has dropped opens a fresh one (spec §8 "S6 — Coalesced reads").
#[tokio::test]
async fn s6_coalesced_reads_share_exactly_one_transaction() {
	let gvk = GroupVersionKind::new("example.org", "v1", "Widget");
	let inner = MemoryCache::new(CacheOptions::default());
	let spill = MemorySpillStore::new();
	let overlay =
		OverlayCache::new(inner.clone(), spill.clone(), OverlayOptions {
			eviction_delay: std::time::Duration::from_millis(5),
			..Default::default()
		});

	for (uid, name) in [("u1", "a"), ("u2", "b"), ("u3", "c")] {
		inner.ingest(WatchEvent::Added { object: widget(uid, "ns", name, 1), from_initial_sync: false }).await;
	}

	let cancel = CancellationToken::new();
	let overlay_bg = overlay.clone();
	let cancel_bg = cancel.clone();
	let handle = tokio::spawn(async move { Cache::start(overlay_bg.as_ref(), cancel_bg).await });

	// Let every object evict to disk so reads in this request actually touch the spill store.
	tokio::time::sleep(std::time::Duration::from_millis(40)).await;

	let slot = CoalesceSlot::new();
	let mut txs = Vec::new();
	let mut guards = Vec::new();

	for name in ["a", "b", "c"] {
		let (tx, guard) = CoalesceSlot::acquire(&slot, spill.as_ref(), OBJECTS_BUCKET).unwrap();

		overlay.get(&gvk, &ObjectId::namespaced("ns", name), Some(&tx)).await.unwrap();
		txs.push(tx);
		guards.push(guard);
	}

	for _ in 0..2 {
		let (tx, guard) = CoalesceSlot::acquire(&slot, spill.as_ref(), OBJECTS_BUCKET).unwrap();

		overlay.list(&gvk, &ListOptions::default(), Some(&tx)).await.unwrap();
		txs.push(tx);
		guards.push(guard);
	}

	assert!(txs.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])), "all 5 reads must share one transaction");

	drop(guards);

	let (reopened, _guard) = CoalesceSlot::acquire(&slot, spill.as_ref(), OBJECTS_BUCKET).unwrap();

	assert!(!Arc::ptr_eq(&reopened, &txs[0]), "the slot must open a fresh transaction once the old one rolled back");

	cancel.cancel();
	handle.await.unwrap().unwrap();
}
