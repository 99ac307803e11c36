//! Generation-versioned, time-ordered expiration scheduler (the "cleaner", §4.1).
//!
//! Reschedule is O(log n): a key's previous scheduled deadline is never removed from the
//! ordered slice, it is simply outlived by a newer generation and discarded at pop time.

// std
use std::{
	collections::HashMap,
	hash::Hash,
	sync::{
		Mutex,
		atomic::{AtomicBool, AtomicU64, Ordering},
	},
	time::{Duration, Instant},
};
// crates.io
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
// self
use crate::{Error, Result};

/// Default minimum wake tick, per §4.1.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

struct ExpEntry<K> {
	deadline: Instant,
	key: K,
	generation: u64,
}

struct Ref<I> {
	generation: u64,
	item: I,
}

struct Inner<K, I> {
	exps: Vec<ExpEntry<K>>,
	refs: HashMap<K, Ref<I>>,
}
impl<K: Ord + Clone, I> Inner<K, I> {
	fn insert_sorted(&mut self, deadline: Instant, key: K, generation: u64) {
		let idx = self.exps.partition_point(|e| (e.deadline, &e.key) < (deadline, &key));

		self.exps.insert(idx, ExpEntry { deadline, key, generation });
	}
}

/// A time-ordered, generation-versioned batch-cleanup scheduler.
///
/// `K` is the dedup key computed by the caller, `I` is the scheduled payload handed to
/// `cleanup`. Guards against a second call to [`Scheduler::start`].
pub struct Scheduler<K, I> {
	inner: Mutex<Inner<K, I>>,
	wake: Notify,
	tick: Duration,
	next_generation: AtomicU64,
	started: AtomicBool,
}
impl<K, I> Scheduler<K, I>
where
	K: Eq + Hash + Ord + Clone + Send + Sync + 'static,
	I: Clone + Send + Sync + 'static,
{
	/// Construct a scheduler with the given minimum wake tick (0 means "as soon as possible").
	pub fn new(tick: Duration) -> Self {
		Self {
			inner: Mutex::new(Inner { exps: Vec::new(), refs: HashMap::new() }),
			wake: Notify::new(),
			tick,
			next_generation: AtomicU64::new(0),
			started: AtomicBool::new(false),
		}
	}

	/// Construct a scheduler with the default 1s tick.
	pub fn with_default_tick() -> Self {
		Self::new(DEFAULT_TICK)
	}

	/// Schedule `item` for cleanup at `now + delay`, keyed by `key`.
	///
	/// Rescheduling the same key invalidates any previous scheduled deadline for it by bumping
	/// its generation; the stale ordered-slice entry is discarded at pop time. `delay` must be
	/// non-negative; a negative delay is a programming error per §4.1.
	pub fn schedule(&self, key: K, item: I, delay: Duration) -> Result<()> {
		let deadline = Instant::now() + delay;
		let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
		let mut inner = self.inner.lock().expect("scheduler mutex poisoned");

		inner.refs.insert(key.clone(), Ref { generation, item });

		let becomes_earliest = inner.exps.first().map(|e| deadline < e.deadline).unwrap_or(true);

		inner.insert_sorted(deadline, key, generation);
		drop(inner);

		if becomes_earliest {
			self.wake.notify_one();
		}

		Ok(())
	}

	/// Number of live (non-stale) scheduled entries, for diagnostics and tests.
	pub fn pending_count(&self) -> usize {
		self.inner.lock().expect("scheduler mutex poisoned").refs.len()
	}

	/// Run the scheduler loop until `cancel` fires, invoking `cleanup` for each batch of
	/// expired entries. Returns the first non-`Ok` result from `cleanup`, which is fatal and
	/// propagates to stop the enclosing cache (§4.1 failure semantics).
	pub async fn start<F, Fut>(&self, cancel: CancellationToken, mut cleanup: F) -> Result<()>
	where
		F: FnMut(Vec<I>) -> Fut,
		Fut: std::future::Future<Output = Result<()>>,
	{
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(Error::SchedulerAlreadyStarted);
		}

		loop {
			let next_deadline = {
				let inner = self.inner.lock().expect("scheduler mutex poisoned");

				inner.exps.first().map(|e| e.deadline)
			};

			let woke = match next_deadline {
				Some(deadline) => {
					let now = Instant::now();
					let mut wait = deadline.saturating_duration_since(now);

					if !self.tick.is_zero() && wait < self.tick {
						wait = self.tick;
					}

					tokio::select! {
						_ = cancel.cancelled() => false,
						_ = tokio::time::sleep(wait) => true,
						_ = self.wake.notified() => true,
					}
				},
				None => {
					tokio::select! {
						_ = cancel.cancelled() => false,
						_ = self.wake.notified() => true,
					}
				},
			};

			if cancel.is_cancelled() {
				return Ok(());
			}
			if !woke {
				continue;
			}

			let batch = self.pop_expired();

			if !batch.is_empty() {
				cleanup(batch).await?;
			}
		}
	}

	fn pop_expired(&self) -> Vec<I> {
		let now = Instant::now();
		let mut inner = self.inner.lock().expect("scheduler mutex poisoned");
		let split = inner.exps.partition_point(|e| e.deadline <= now);
		let due: Vec<ExpEntry<K>> = inner.exps.drain(..split).collect();
		let mut batch = Vec::with_capacity(due.len());

		for entry in due {
			let keep = inner.refs.get(&entry.key).map(|r| r.generation == entry.generation).unwrap_or(false);

			if keep {
				if let Some(r) = inner.refs.remove(&entry.key) {
					batch.push(r.item);
				}
			}
			// else: stale entry superseded by a later reschedule, discard silently.
		}

		batch
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;

	#[tokio::test]
	async fn schedule_fires_after_delay() {
		let scheduler: Arc<Scheduler<u32, u32>> = Arc::new(Scheduler::new(Duration::from_millis(1)));

		scheduler.schedule(1, 1, Duration::from_millis(10)).unwrap();

		let seen = Arc::new(Mutex::new(Vec::new()));
		let cancel = CancellationToken::new();
		let cancel_inner = cancel.clone();
		let seen_inner = seen.clone();
		let scheduler_inner = scheduler.clone();

		let handle = tokio::spawn(async move {
			scheduler_inner
				.start(cancel_inner, |batch| {
					let seen = seen_inner.clone();

					async move {
						seen.lock().unwrap().extend(batch);

						Ok(())
					}
				})
				.await
		});

		tokio::time::sleep(Duration::from_millis(60)).await;
		cancel.cancel();
		handle.await.unwrap().unwrap();

		assert_eq!(*seen.lock().unwrap(), vec![1]);
	}

	#[tokio::test]
	async fn reschedule_keeps_only_newest_deadline() {
		let scheduler: Arc<Scheduler<u32, u32>> = Arc::new(Scheduler::new(Duration::ZERO));

		scheduler.schedule(4, 40, Duration::from_millis(5)).unwrap();
		scheduler.schedule(4, 41, Duration::from_millis(1)).unwrap();

		assert_eq!(scheduler.pending_count(), 1);

		let seen = Arc::new(Mutex::new(Vec::new()));
		let cancel = CancellationToken::new();
		let cancel_inner = cancel.clone();
		let seen_inner = seen.clone();
		let scheduler_inner = scheduler.clone();

		let handle = tokio::spawn(async move {
			scheduler_inner
				.start(cancel_inner, |batch| {
					let seen = seen_inner.clone();

					async move {
						seen.lock().unwrap().extend(batch);

						Ok(())
					}
				})
				.await
		});

		tokio::time::sleep(Duration::from_millis(40)).await;
		cancel.cancel();
		handle.await.unwrap().unwrap();

		// Only the newest payload for key 4 is ever seen; the earlier `40` schedule was
		// superseded and its stale ordered-slice entry discarded at pop time.
		assert_eq!(*seen.lock().unwrap(), vec![41]);
	}

	#[tokio::test]
	async fn starting_twice_is_rejected() {
		let scheduler = Arc::new(Scheduler::<u32, u32>::new(Duration::from_millis(1)));
		let cancel = CancellationToken::new();

		cancel.cancel();
		scheduler.start(cancel.clone(), |_: Vec<u32>| async { Ok(()) }).await.unwrap();

		let err = scheduler.start(cancel, |_: Vec<u32>| async { Ok(()) }).await.unwrap_err();

		assert!(matches!(err, Error::SchedulerAlreadyStarted));
	}
}
