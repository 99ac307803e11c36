//! The throttled dirty-signal state machine driving a live query's render loop (§4.4
//! "Debouncer state machine").
//!
//! Two signals, `Fire` (the watched data changed) and `Rearm` (the consumer finished rendering),
//! feed one boolean pair `(armed, fired)`; the throttle timer only starts once both are set,
//! and firing it emits on `Ready` and clears both flags.

// std
use std::sync::Mutex;
// crates.io
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
// self
use crate::_prelude::*;

struct State {
	armed: bool,
	fired: bool,
}

/// Per-live-query debouncer (§4.4).
pub struct Debouncer {
	state: Mutex<State>,
	changed: Notify,
	throttle: Duration,
}
impl Debouncer {
	/// Construct a debouncer with the given throttle interval.
	pub fn new(throttle: Duration) -> Self {
		Self { state: Mutex::new(State { armed: false, fired: false }), changed: Notify::new(), throttle }
	}

	/// Mark the query dirty. Idempotent while already fired.
	pub fn fire(&self) {
		let mut state = self.state.lock().expect("debouncer mutex poisoned");

		state.fired = true;

		drop(state);

		self.changed.notify_one();
	}

	/// Signal that the consumer finished rendering and is ready for the next one.
	pub fn rearm(&self) {
		let mut state = self.state.lock().expect("debouncer mutex poisoned");

		state.armed = true;

		drop(state);

		self.changed.notify_one();
	}

	/// Block until the next render is due, or `cancel` fires. Returns `false` on cancellation.
	///
	/// Both `armed` and `fired` being set starts the throttle timer (§4.4's "arm timer"); once
	/// it elapses, this emits and clears both flags for the next cycle.
	pub async fn wait_ready(&self, cancel: &CancellationToken) -> bool {
		loop {
			let due = { self.state.lock().expect("debouncer mutex poisoned").armed }
				&& self.state.lock().expect("debouncer mutex poisoned").fired;

			if due {
				tokio::select! {
					_ = tokio::time::sleep(self.throttle) => {},
					_ = cancel.cancelled() => return false,
				}

				let mut state = self.state.lock().expect("debouncer mutex poisoned");

				if state.armed && state.fired {
					state.armed = false;
					state.fired = false;

					return true;
				}
				// Unreachable per the state table (Fire/Rearm are no-ops once both are set), but
				// loop defensively rather than assume it.
			} else {
				tokio::select! {
					_ = self.changed.notified() => {},
					_ = cancel.cancelled() => return false,
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn fire_then_rearm_emits_after_throttle() {
		let debouncer = Debouncer::new(Duration::from_millis(20));
		let cancel = CancellationToken::new();

		debouncer.fire();
		debouncer.rearm();

		let start = std::time::Instant::now();

		assert!(debouncer.wait_ready(&cancel).await);
		assert!(start.elapsed() >= Duration::from_millis(15));
	}

	#[tokio::test]
	async fn rearm_then_fire_emits_after_throttle() {
		let debouncer = Debouncer::new(Duration::from_millis(20));
		let cancel = CancellationToken::new();

		debouncer.rearm();
		debouncer.fire();

		assert!(debouncer.wait_ready(&cancel).await);
	}

	#[tokio::test]
	async fn cancellation_unblocks_the_wait() {
		let debouncer = Debouncer::new(Duration::from_secs(60));
		let cancel = CancellationToken::new();

		cancel.cancel();

		assert!(!debouncer.wait_ready(&cancel).await);
	}

	#[tokio::test]
	async fn repeated_fire_before_rearm_does_not_start_the_timer_early() {
		let debouncer = Debouncer::new(Duration::from_millis(500));
		let cancel = CancellationToken::new();

		debouncer.fire();
		debouncer.fire();
		debouncer.fire();

		let waited = tokio::time::timeout(Duration::from_millis(30), debouncer.wait_ready(&cancel)).await;

		assert!(waited.is_err(), "timer must not start until `rearm` also arrives");
	}
}
