//! The live-query cache: an informer-fan-out `Cache` decorator plus the debounced render loop
//! and GraphQL extension surface that turns a subscription into an auto-refreshing query
//! (§4.4).
//!
//! The concrete `liveQuery(throttle: Int)` field, its argument extraction, and the query
//! executor that re-runs a subscription's read operation all stay out of scope (§1) — those are
//! the embedding schema's job. What lives here is the engine those resolvers drive: per-query
//! interest tracking, the debouncer, JSON Patch diffing, and the [`LiveQueryExtension`] whose
//! `subscribe` hook turns a stream of full re-renders into the throttled patch stream a
//! subscriber actually receives.

pub mod debounce;
pub mod patch;
pub mod tracker;

// std
use std::{
	collections::HashMap,
	sync::{Mutex as StdMutex, Weak},
};
// crates.io
use async_graphql::{
	Name, Response,
	extensions::{Extension, ExtensionContext, ExtensionFactory, NextRequest, NextSubscribe},
	futures_util::{StreamExt, stream::BoxStream},
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	client::{Cache, HandlerId, Informer, ListOptions, ObjectList},
	livequery::{
		debounce::Debouncer,
		patch::{LiveQueryPatch, diff},
		tracker::Tracker,
	},
	model::{DynamicObject, GroupVersionKind, ObjectId, WatchEvent},
};

/// Opaque identifier for one live subscription's tracking state, threaded through the
/// request/operation context by the embedding schema so its event handlers can find their
/// trackers (§9 "Live-query context propagation": avoid a thread-local global).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryId(Uuid);

struct QueryState {
	debouncer: Arc<Debouncer>,
	trackers: StdMutex<HashMap<GroupVersionKind, Tracker>>,
}

/// `Cache` decorator that fans informer events out to every registered live query (§4.4
/// "Informer fan-out"), typically wrapping an [`crate::overlay::OverlayCache`].
pub struct LiveQueryCache {
	inner: Arc<dyn Cache>,
	weak: Weak<LiveQueryCache>,
	handlers: StdMutex<HashMap<GroupVersionKind, HandlerId>>,
	queries: StdMutex<HashMap<QueryId, Arc<QueryState>>>,
}
impl LiveQueryCache {
	/// Wrap `inner` with live-query fan-out.
	pub fn new(inner: Arc<dyn Cache>) -> Arc<Self> {
		Arc::new_cyclic(|weak| Self {
			inner,
			weak: weak.clone(),
			handlers: StdMutex::new(HashMap::new()),
			queries: StdMutex::new(HashMap::new()),
		})
	}

	/// Begin tracking a new live query with the given throttle, returning its id and the
	/// debouncer the render loop should drive.
	pub fn begin_query(&self, throttle: Duration) -> (QueryId, Arc<Debouncer>) {
		let id = QueryId(Uuid::new_v4());
		let debouncer = Arc::new(Debouncer::new(throttle));

		// The first render is not gated by the debouncer (§4.4 step 5); pre-fire it so the
		// consumer's first `rearm` after that render is enough to start the wait loop.
		debouncer.fire();

		self.queries
			.lock()
			.expect("live query mutex poisoned")
			.insert(id, Arc::new(QueryState { debouncer: debouncer.clone(), trackers: StdMutex::new(HashMap::new()) }));

		(id, debouncer)
	}

	/// Drop a finished or cancelled query's tracking state (§5 "the live query exits on the
	/// first of: subscription context cancellation, operation timeout, or downstream error").
	pub fn end_query(&self, query: QueryId) {
		self.queries.lock().expect("live query mutex poisoned").remove(&query);
	}

	/// Point lookup; registers the object's UID with `query`'s tracker for this kind.
	pub async fn get(&self, query: QueryId, gvk: &GroupVersionKind, id: &ObjectId) -> Result<DynamicObject> {
		self.ensure_handler(gvk);

		let object = self.inner.get(gvk, id).await?;

		self.track(query, gvk, |tracker| tracker.track_uid(object.uid.clone()));

		Ok(object)
	}

	/// List query; registers the whole-kind marker with `query`'s tracker for this kind.
	pub async fn list(&self, query: QueryId, gvk: &GroupVersionKind, opts: &ListOptions) -> Result<ObjectList> {
		self.ensure_handler(gvk);

		let list = self.inner.list(gvk, opts).await?;

		self.track(query, gvk, |tracker| tracker.track_whole_kind());

		Ok(list)
	}

	fn track(&self, query: QueryId, gvk: &GroupVersionKind, apply: impl FnOnce(&mut Tracker)) {
		let queries = self.queries.lock().expect("live query mutex poisoned");

		if let Some(state) = queries.get(&query) {
			let mut trackers = state.trackers.lock().expect("tracker mutex poisoned");

			apply(trackers.entry(gvk.clone()).or_default());
		}
	}

	/// Register a single informer handler per kind, idempotently (§4.4 "event-handler
	/// registration is idempotent per kind per cache"). The handler holds only a [`Weak`] back
	/// to this cache, so it never keeps it alive past the last external `Arc`.
	fn ensure_handler(&self, gvk: &GroupVersionKind) {
		let mut handlers = self.handlers.lock().expect("handler mutex poisoned");

		if handlers.contains_key(gvk) {
			return;
		}

		let informer = self.inner.informer_for(gvk);
		let weak = self.weak.clone();
		let handler_id = informer.add_event_handler(Arc::new(move |event: &WatchEvent| {
			if let Some(this) = weak.upgrade() {
				this.dispatch(event);
			}
		}));

		handlers.insert(gvk.clone(), handler_id);
	}

	/// Walk every registered tracker for this event's kind and `Trigger` the ones that match
	/// (§4.4 matching rules), firing their debouncer.
	fn dispatch(&self, event: &WatchEvent) {
		let gvk = event.gvk();
		let queries = self.queries.lock().expect("live query mutex poisoned");

		for state in queries.values() {
			let mut trackers = state.trackers.lock().expect("tracker mutex poisoned");

			let Some(tracker) = trackers.get_mut(gvk) else { continue };

			if tracker.matches(event) {
				state.debouncer.fire();

				if let WatchEvent::Deleted { object } = event {
					tracker.forget(&object.uid);
				}

				#[cfg(feature = "metrics")]
				crate::metrics::record_patch_emitted("", &gvk.kind);
			}
		}
	}
}

/// One render's outcome for a single response path (§4.4 "Operation loop" step 3): either the
/// first render's full data, or a coalesced JSON Patch against the previous render.
pub enum RenderDelta {
	/// First render for this path: emit the data in full.
	Full(Value),
	/// A subsequent render whose diff against the previous render is non-empty.
	Patch(LiveQueryPatch),
	/// A subsequent render that produced no observable change; suppress it (§4.4 step 3 "else
	/// ... loop (suppress unchanged)").
	Unchanged,
}

/// Compute this render's delta against the previous one and bump `revision` when it emits.
///
/// Grounds §4.4 step 3-4 ("compute a JSON Patch vs `prev_data_by_path[path]`... bump
/// `revisions_by_path[path]`, store new `prev_data_by_path[path]`").
pub fn render_delta(previous: Option<&Value>, current: &Value, revision: &mut u64) -> RenderDelta {
	match previous {
		None => {
			*revision += 1;

			RenderDelta::Full(current.clone())
		},
		Some(previous) => {
			let patch = diff(previous, current);

			if patch.0.is_empty() {
				RenderDelta::Unchanged
			} else {
				*revision += 1;

				RenderDelta::Patch(LiveQueryPatch { revision: *revision, json_patch: patch })
			}
		},
	}
}

/// If `value` is a JSON object with exactly the one field a rewritten `liveQuery(throttle: Int):
/// Query` selection would produce, unwrap it (§4.4 "rewritten into an equivalent query whose
/// selection set is the inner one", applied at the response shape rather than the document).
/// Any other shape — including a concrete schema that doesn't use the `liveQuery` field name —
/// passes through unchanged.
fn unwrap_live_query(value: Value) -> Value {
	match value {
		Value::Object(mut fields) if fields.len() == 1 =>
			fields.remove("liveQuery").unwrap_or_else(|| Value::Object(fields)),
		other => other,
	}
}

fn with_data(mut response: Response, data: Value) -> Response {
	if let Ok(value) = async_graphql::Value::from_json(data) {
		response.data = value;
	}

	response
}

fn with_patch_extension(mut response: Response, patch: LiveQueryPatch) -> Response {
	response.data = async_graphql::Value::Null;

	if let Ok(encoded) = serde_json::to_value(&patch) {
		if let Ok(value) = async_graphql::Value::from_json(encoded) {
			response.extensions.insert(Name::new("patch").to_string(), value);
		}
	}

	response
}

/// One response-path's worth of the Operation loop (§4.4 steps 3-4): diff this render against the
/// last one seen on this stream, and decide whether (and how) it reaches the subscriber.
fn rewrite_response(response: Response, previous: &mut Option<Value>, revision: &mut u64) -> Option<Response> {
	let Ok(json) = response.data.clone().into_json() else { return Some(response) };
	let data = unwrap_live_query(json);

	match render_delta(previous.as_ref(), &data, revision) {
		RenderDelta::Full(full) => {
			*previous = Some(full.clone());

			Some(with_data(response, full))
		},
		RenderDelta::Patch(patch) => {
			*previous = Some(data);

			Some(with_patch_extension(response, patch))
		},
		RenderDelta::Unchanged => None,
	}
}

/// `async_graphql` extension driving the Operation loop (§4.4): its `subscribe` hook rewrites
/// every response the embedding schema's `liveQuery` subscription resolver re-executes into
/// either a full first render or a `{revision, jsonPatch}`-bearing delta, and drops unchanged
/// renders from the stream entirely. The concrete `liveQuery(throttle: Int)` field, its argument
/// extraction, and the query executor that drives re-execution itself all stay out of scope (§1);
/// this hook only needs a stream of full-data responses to turn into the throttled patch stream.
#[derive(Default)]
pub struct LiveQueryExtension;
#[async_trait::async_trait]
impl Extension for LiveQueryExtension {
	async fn request(&self, ctx: &ExtensionContext<'_>, next: NextRequest<'_>) -> Response {
		next.run(ctx).await
	}

	fn subscribe<'s>(
		&self,
		ctx: &ExtensionContext<'_>,
		stream: BoxStream<'s, Response>,
		next: NextSubscribe<'_>,
	) -> BoxStream<'s, Response> {
		let stream = next.run(ctx, stream);
		let state = Arc::new(StdMutex::new((None::<Value>, 0u64)));

		Box::pin(stream.filter_map(move |response| {
			let state = state.clone();

			async move {
				let mut state = state.lock().expect("live query render state poisoned");
				let (previous, revision) = &mut *state;

				rewrite_response(response, previous, revision)
			}
		}))
	}
}

/// Factory producing a fresh [`LiveQueryExtension`] per request, per `async-graphql`'s
/// extension contract.
#[derive(Default)]
pub struct LiveQueryExtensionFactory;
impl ExtensionFactory for LiveQueryExtensionFactory {
	fn create(&self) -> Arc<dyn Extension> {
		Arc::new(LiveQueryExtension)
	}
}
