//! Per-request coalesced read-transaction slot (§4.2 "Read-transaction coalescing").
//!
//! External request middleware (out of scope here) owns one [`CoalesceSlot`] per incoming
//! request and calls [`CoalesceSlot::acquire`] before the first overlay read, then passes the
//! returned transaction handle into every `get`/`list` call for that request. The returned
//! [`CoalesceGuard`] replaces the source design's `done()` closure: dropping the last guard for
//! a slot rolls the shared transaction back.

// std
use std::sync::{Arc, Mutex};
// self
use crate::overlay::spill::{ReadTransaction, SpillStore};
use crate::Result;

struct State {
	tx: Arc<dyn ReadTransaction>,
	refs: usize,
}

/// A request-scoped slot that lazily opens one shared read transaction on first use.
#[derive(Default)]
pub struct CoalesceSlot {
	state: Mutex<Option<State>>,
}
impl CoalesceSlot {
	/// Construct an empty, not-yet-opened slot.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Obtain the shared transaction, opening it on first call within this request. Takes
	/// `slot` explicitly (rather than as a `self` receiver) since the returned [`CoalesceGuard`]
	/// needs its own owned handle; callers hold an `Arc<CoalesceSlot>` already.
	pub fn acquire(
		slot: &Arc<Self>,
		store: &dyn SpillStore,
		bucket: &'static str,
	) -> Result<(Arc<dyn ReadTransaction>, CoalesceGuard)> {
		let mut state = slot.state.lock().expect("coalesce slot mutex poisoned");

		if state.is_none() {
			*state = Some(State { tx: store.begin_read(bucket)?, refs: 0 });
		}

		let inner = state.as_mut().expect("just inserted");

		inner.refs += 1;

		let tx = inner.tx.clone();

		drop(state);

		Ok((tx, CoalesceGuard { slot: slot.clone() }))
	}
}

/// RAII handle standing in for the source design's `done()` closure; the last guard dropped
/// for a slot rolls its shared transaction back.
pub struct CoalesceGuard {
	slot: Arc<CoalesceSlot>,
}
impl Drop for CoalesceGuard {
	fn drop(&mut self) {
		let mut state = self.slot.state.lock().expect("coalesce slot mutex poisoned");

		if let Some(inner) = state.as_mut() {
			inner.refs -= 1;

			if inner.refs == 0 {
				tracing::debug!("rolled back coalesced spill read transaction");

				*state = None;
			}
		}
	}
}
