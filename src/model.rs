//! The dynamic object graph: kinds, ids, and the zeroed/hydrated object representation.
//!
//! The remote API exposes resource kinds that are not known at build time, so objects are
//! represented as tagged records rather than generated structs (§9 "Dynamic object graph").

// std
use std::fmt::{self, Display, Formatter};
// crates.io
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The `(group, version, kind)` triple identifying a remote resource type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
	/// API group, empty string for the core group.
	pub group: String,
	/// API version within the group.
	pub version: String,
	/// Kind name, e.g. `Pod` or `Widget`.
	pub kind: String,
}
impl GroupVersionKind {
	/// Construct a new kind triple.
	pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
		Self { group: group.into(), version: version.into(), kind: kind.into() }
	}

	/// Derive the kind of a list object by dropping a trailing `List` suffix, per §4.4's
	/// "compute the kind of the object (for a list, drop the 'List' suffix)".
	pub fn from_list_kind(group: impl Into<String>, version: impl Into<String>, list_kind: &str) -> Self {
		let kind = list_kind.strip_suffix("List").unwrap_or(list_kind);

		Self::new(group, version, kind)
	}
}
impl Display for GroupVersionKind {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		if self.group.is_empty() {
			write!(f, "{}/{}", self.version, self.kind)
		} else {
			write!(f, "{}/{}/{}", self.group, self.version, self.kind)
		}
	}
}

/// A `(namespace, name)` pair identifying an object within a kind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId {
	/// Namespace scope, `None` for cluster-scoped resources.
	pub namespace: Option<String>,
	/// Object name, unique within `(namespace, kind)`.
	pub name: String,
}
impl ObjectId {
	/// Construct a namespaced id.
	pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
		Self { namespace: Some(namespace.into()), name: name.into() }
	}

	/// Construct a cluster-scoped id.
	pub fn cluster_scoped(name: impl Into<String>) -> Self {
		Self { namespace: None, name: name.into() }
	}

	/// Whether this id carries no name, the marker used to detect a zeroed object.
	pub fn is_empty_name(&self) -> bool {
		self.name.is_empty()
	}
}

/// A cached API resource: a stable UID, a kind, a namespace/name pair, and a body.
///
/// In memory an object in "zeroed" state retains only `uid` and `gvk`; `id.name` is blanked
/// and `data` is `Value::Null`. The UID is preserved across eviction so the overlay's spill
/// key remains valid (§3 invariant).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DynamicObject {
	/// Stable unique id assigned by the remote API.
	pub uid: String,
	/// Kind triple.
	pub gvk: GroupVersionKind,
	/// Namespace/name pair. Blanked to an empty name when zeroed.
	pub id: ObjectId,
	/// Full resource body, or `Value::Null` when zeroed.
	pub data: Value,
}
impl DynamicObject {
	/// Construct a fully hydrated object.
	pub fn new(uid: impl Into<String>, gvk: GroupVersionKind, id: ObjectId, data: Value) -> Self {
		Self { uid: uid.into(), gvk, id, data }
	}

	/// Whether this object is in zeroed state (detected by an empty name, per §4.2's read path).
	pub fn is_zeroed(&self) -> bool {
		self.id.is_empty_name()
	}

	/// Zero this object in place, preserving `uid` and `gvk` and clearing everything else.
	pub fn zero(&mut self) {
		self.id = ObjectId::default();
		self.data = Value::Null;
	}

	/// Rehydrate this (zeroed) object in place from previously-serialized bytes.
	pub fn rehydrate_from(&mut self, bytes: &[u8]) -> Result<(), serde_json::Error> {
		let full: DynamicObject = serde_json::from_slice(bytes)?;

		self.id = full.id;
		self.data = full.data;

		Ok(())
	}

	/// Serialize this object for the spill store.
	pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
		serde_json::to_vec(self)
	}
}

/// An event observed on an informer for a kind.
#[derive(Clone, Debug)]
pub enum WatchEvent {
	/// An object was added.
	Added {
		/// The added object.
		object: DynamicObject,
		/// Whether this event is a replay of the informer's initial list sync, which must be
		/// ignored by live-query fan-out per §4.4.
		from_initial_sync: bool,
	},
	/// An object was updated; carries both the previous and new revision.
	Updated {
		/// Revision before the update.
		old: DynamicObject,
		/// Revision after the update.
		new: DynamicObject,
	},
	/// An object was deleted.
	Deleted {
		/// The deleted object's last known revision.
		object: DynamicObject,
	},
}
impl WatchEvent {
	/// The kind this event concerns.
	pub fn gvk(&self) -> &GroupVersionKind {
		match self {
			WatchEvent::Added { object, .. } | WatchEvent::Deleted { object } => &object.gvk,
			WatchEvent::Updated { new, .. } => &new.gvk,
		}
	}
}
