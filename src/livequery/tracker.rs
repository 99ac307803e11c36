//! Per-query, per-kind interest tracking and event matching (§4.4 "Informer fan-out").

// std
use std::collections::HashSet;
// self
use crate::model::WatchEvent;

/// Tracks one live query's interest in one kind: either every object of that kind (the
/// "whole-kind marker", registered by a `List`), or a specific set of UIDs (registered by
/// `Get`). A single tracker may accumulate both.
#[derive(Default)]
pub struct Tracker {
	whole_kind: bool,
	uids: HashSet<String>,
}
impl Tracker {
	/// Register interest in every object of this kind (a `List` was performed).
	pub fn track_whole_kind(&mut self) {
		self.whole_kind = true;
	}

	/// Register interest in one object's UID (a `Get` was performed).
	pub fn track_uid(&mut self, uid: impl Into<String>) {
		self.uids.insert(uid.into());
	}

	/// Whether `event` should dirty a query holding this tracker (§4.4 matching rules).
	/// Initial-list-sync replay is never matched; callers are expected to have already
	/// filtered it, but this defends against fan-out code that doesn't.
	pub fn matches(&self, event: &WatchEvent) -> bool {
		match event {
			WatchEvent::Added { from_initial_sync: true, .. } => false,
			WatchEvent::Added { .. } => self.whole_kind,
			WatchEvent::Updated { old, new } => {
				self.whole_kind || self.uids.contains(&old.uid) || self.uids.contains(&new.uid)
			},
			WatchEvent::Deleted { object } => self.whole_kind || self.uids.contains(&object.uid),
		}
	}

	/// Drop a UID from the tracked set once its object has been deleted.
	pub fn forget(&mut self, uid: &str) {
		self.uids.remove(uid);
	}
}
