//! Supervised task-group abstraction (§9 "Cyclic supervision").
//!
//! Several components (the session cache's two supervisors, the overlay's three background
//! tasks) race on a shared cancellation and must converge without any task referencing a
//! closed resource. A [`TaskGroup`] ties that together: the first task to return an error, or
//! the group's own cancellation, brings every other member down, and `join` waits for all of
//! them to actually finish before returning.

// std
use std::future::Future;
// crates.io
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
// self
use crate::Result;

/// A group of supervised tasks sharing one [`CancellationToken`].
pub struct TaskGroup {
	cancel: CancellationToken,
	handles: Vec<JoinHandle<Result<()>>>,
}
impl TaskGroup {
	/// Construct an empty group under a fresh child of `parent` (or a root token if `None`).
	pub fn new(parent: Option<&CancellationToken>) -> Self {
		let cancel = match parent {
			Some(parent) => parent.child_token(),
			None => CancellationToken::new(),
		};

		Self { cancel, handles: Vec::new() }
	}

	/// The cancellation token every spawned task should select against.
	pub fn cancellation(&self) -> CancellationToken {
		self.cancel.clone()
	}

	/// Spawn a supervised task. If it returns an error, the whole group is cancelled.
	pub fn spawn<F>(&mut self, task: F)
	where
		F: Future<Output = Result<()>> + Send + 'static,
	{
		let cancel = self.cancel.clone();
		let handle = tokio::spawn(async move {
			let result = task.await;

			if result.is_err() {
				cancel.cancel();
			}

			result
		});

		self.handles.push(handle);
	}

	/// Cancel the group explicitly (e.g. the enclosing context ended).
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Wait for every member to finish, returning the first error observed, if any.
	pub async fn join(self) -> Result<()> {
		let mut first_err = None;

		for handle in self.handles {
			match handle.await {
				Ok(Ok(())) => {},
				Ok(Err(err)) => {
					first_err.get_or_insert(err);
				},
				Err(join_err) => {
					first_err.get_or_insert(crate::Error::Write(join_err.to_string()));
				},
			};
		}

		match first_err {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}
}
