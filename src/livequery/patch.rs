//! JSON Patch computation for live-query renders (§4.4 "JSON Patch").
//!
//! Patches are computed as a structural diff and then coalesced: an adjacent
//! `(remove path=X; add path=X)` pair collapses into a single `replace path=X`, per §4.4's "the
//! only coalescing transformation".

// crates.io
use json_patch::{Patch, PatchOperation, ReplaceOperation};
use serde::Serialize;
use serde_json::Value;

/// The `patch` GraphQL extension payload (§6 "Live-query GraphQL contract").
#[derive(Serialize)]
pub struct LiveQueryPatch {
	/// Monotonically increasing per-response-path revision counter.
	pub revision: u64,
	/// The coalesced JSON Patch document.
	#[serde(rename = "jsonPatch")]
	pub json_patch: Patch,
}

/// Diff `old` against `new` and coalesce adjacent remove/add pairs on the same path.
pub fn diff(old: &Value, new: &Value) -> Patch {
	coalesce(json_patch::diff(old, new))
}

fn coalesce(patch: Patch) -> Patch {
	let mut ops = patch.0.into_iter().peekable();
	let mut result = Vec::new();

	while let Some(op) = ops.next() {
		match (&op, ops.peek()) {
			(PatchOperation::Remove(remove), Some(PatchOperation::Add(add))) if remove.path == add.path => {
				let Some(PatchOperation::Add(add)) = ops.next() else { unreachable!("just peeked") };

				result.push(PatchOperation::Replace(ReplaceOperation { path: add.path, value: add.value }));
			},
			_ => result.push(op),
		}
	}

	Patch(result)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unchanged_documents_produce_an_empty_patch() {
		let value = serde_json::json!({"a": 1});

		assert!(diff(&value, &value).0.is_empty());
	}

	#[test]
	fn field_replacement_collapses_remove_add_into_replace() {
		let old = serde_json::json!({"a": 1});
		let new = serde_json::json!({"a": "one"});
		let patch = diff(&old, &new);

		assert_eq!(patch.0.len(), 1);
		assert!(matches!(patch.0[0], PatchOperation::Replace(_)));
	}

	#[test]
	fn added_field_produces_an_add_operation() {
		let old = serde_json::json!({"a": 1});
		let new = serde_json::json!({"a": 1, "b": 2});
		let patch = diff(&old, &new);

		assert!(patch.0.iter().any(|op| matches!(op, PatchOperation::Add(_))));
	}

	#[test]
	fn removed_field_produces_a_remove_operation() {
		let old = serde_json::json!({"a": 1, "b": 2});
		let new = serde_json::json!({"a": 1});
		let patch = diff(&old, &new);

		assert!(patch.0.iter().any(|op| matches!(op, PatchOperation::Remove(_))));
	}

	#[test]
	fn live_query_patch_serializes_with_the_spec_field_names() {
		let old = serde_json::json!({"a": 1});
		let new = serde_json::json!({"a": 2});
		let envelope = LiveQueryPatch { revision: 3, json_patch: diff(&old, &new) };
		let value = serde_json::to_value(&envelope).unwrap();

		assert_eq!(value["revision"], 3);
		assert!(value["jsonPatch"].is_array());
	}
}
