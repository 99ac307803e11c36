//! Client and cache seam the crate delegates to: the remote API client, the watch-backed
//! cache factory, and the informer abstraction (§6 "External interfaces").
//!
//! The concrete wire protocol, discovery/REST-mapping, and transport are explicitly out of
//! scope (§1); these traits are the narrow contract a typed client library must satisfy.

// std
use std::sync::Arc;
// self
use crate::{
	Result,
	model::{DynamicObject, GroupVersionKind, ObjectId, WatchEvent},
};

/// Options controlling a `List` call.
#[derive(Clone, Debug, Default)]
pub struct ListOptions {
	/// Restrict the list to a namespace; `None` lists across namespaces.
	pub namespace: Option<String>,
	/// Label selector, opaque to the cache (passed through to the remote client).
	pub label_selector: Option<String>,
	/// Override the deep-copy policy for this call only (§4.2 "Deep-copy policy").
	pub disable_deep_copy: Option<bool>,
}

/// A list of objects of one kind, returned by [`Cache::list`]/[`RemoteClient::list`].
#[derive(Clone, Debug, Default)]
pub struct ObjectList {
	/// The matching objects.
	pub items: Vec<DynamicObject>,
}

/// Write-through operations, consumed by resolvers, bypassing the cache entirely (Non-goal:
/// no write caching).
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
	/// Fetch a single object directly from the remote API.
	async fn get(&self, gvk: &GroupVersionKind, id: &ObjectId) -> Result<DynamicObject>;
	/// List objects directly from the remote API.
	async fn list(&self, gvk: &GroupVersionKind, opts: &ListOptions) -> Result<ObjectList>;
	/// Create an object.
	async fn create(&self, object: DynamicObject) -> Result<DynamicObject>;
	/// Update an object.
	async fn update(&self, object: DynamicObject) -> Result<DynamicObject>;
	/// Delete a single object.
	async fn delete(&self, gvk: &GroupVersionKind, id: &ObjectId) -> Result<()>;
	/// Apply a JSON merge/strategic patch (opaque body) to an object.
	async fn patch(&self, gvk: &GroupVersionKind, id: &ObjectId, patch: serde_json::Value) -> Result<DynamicObject>;
	/// Delete every object of a kind matching `opts`.
	async fn delete_all_of(&self, gvk: &GroupVersionKind, opts: &ListOptions) -> Result<()>;
}

/// Opaque identifier for a registered event handler, returned by [`Informer::add_event_handler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

/// A typed client that performs an initial list then streams Add/Update/Delete events.
#[async_trait::async_trait]
pub trait Informer: Send + Sync {
	/// Register a handler for every event on this informer; idempotent registration is the
	/// caller's responsibility (the live-query cache keys its own idempotency by kind, §4.4).
	fn add_event_handler(&self, handler: Arc<dyn Fn(&WatchEvent) + Send + Sync>) -> HandlerId;
	/// Remove a previously-registered handler.
	fn remove_event_handler(&self, id: HandlerId);
}

/// Hook invoked on every object ingested by the watch, used by the overlay to schedule
/// eviction (§6 "a default transform hook").
pub type TransformHook = Arc<dyn Fn(&DynamicObject) + Send + Sync>;

/// Cache options carried by the factory: scheme/REST-mapper placeholders (opaque, since
/// discovery is out of scope) and the default deep-copy flag.
#[derive(Clone, Debug)]
pub struct CacheOptions {
	/// Default deep-copy behavior for reads (§4.2 "Deep-copy policy").
	pub deep_copy_by_default: bool,
	/// Kinds to exclude from the watch cache entirely (§4.3 "Resources not cached").
	pub excluded_kinds: Vec<GroupVersionKind>,
}
impl Default for CacheOptions {
	fn default() -> Self {
		Self { deep_copy_by_default: true, excluded_kinds: Vec::new() }
	}
}

/// The watch-backed cache contract that the overlay and live-query middlewares wrap.
#[async_trait::async_trait]
pub trait Cache: Send + Sync {
	/// Point lookup by `(namespace, name)`.
	async fn get(&self, gvk: &GroupVersionKind, id: &ObjectId) -> Result<DynamicObject>;
	/// List query, optionally scoped by namespace/selector.
	async fn list(&self, gvk: &GroupVersionKind, opts: &ListOptions) -> Result<ObjectList>;
	/// Begin background operation (watch warmup, initial sync); returns only after the
	/// supplied cancellation fires, or on the first fatal internal error.
	async fn start(&self, cancel: tokio_util::sync::CancellationToken) -> Result<()>;
	/// Resolve once this cache's initial sync has completed, or fails permanently (§4.3 step 6
	/// "Wait for initial cache sync; if it fails, remove and return an error"). Distinct from
	/// [`Cache::start`], which keeps running until cancelled; a caller awaits `synced` alongside
	/// a spawned `start` to learn when the cache first became usable.
	async fn synced(&self) -> Result<()>;
	/// Obtain the informer for a kind, creating it lazily if this is the first request.
	fn informer_for(&self, gvk: &GroupVersionKind) -> Arc<dyn Informer>;
	/// Install (or replace) the hook invoked on every object the watch ingests, used by
	/// middleware such as the overlay to schedule eviction (§6 "a default transform hook").
	fn set_transform(&self, hook: TransformHook);
}

/// Factory constructing a [`Cache`] for a given (already credentialed) remote client.
pub trait CacheFactory: Send + Sync {
	/// Build a new cache instance, wired with `options`.
	fn build(&self, client: Arc<dyn RemoteClient>, options: CacheOptions) -> Arc<dyn Cache>;
}
