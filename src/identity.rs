//! Caller credentials and the deterministic, salted identity hash used as the session key.

// std
use std::fmt::{self, Debug, Formatter};
// crates.io
use sha2::{Digest, Sha256};

/// Opaque authentication material: a bearer token plus optional namespace scope.
///
/// `Debug` is implemented to redact `token`, since credentials must never end up in logs.
#[derive(Clone)]
pub struct Credentials {
	token: String,
	/// Optional namespace this caller's session is scoped to.
	pub namespace_scope: Option<String>,
}
impl Credentials {
	/// Construct credentials from a bearer token and optional namespace scope.
	pub fn new(token: impl Into<String>, namespace_scope: Option<String>) -> Self {
		Self { token: token.into(), namespace_scope }
	}

	/// The bearer token, for constructing the authenticated client.
	pub fn token(&self) -> &str {
		&self.token
	}
}
impl Debug for Credentials {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials")
			.field("token", &"<redacted>")
			.field("namespace_scope", &self.namespace_scope)
			.finish()
	}
}

/// The deterministic per-process-salted identity derived from a caller's credentials.
///
/// Two callers presenting identical material hash to the same identity and therefore share a
/// session (§3); an adversary observing the hash cannot recover the material, since the salt is
/// process-local and the digest is one-way.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity([u8; 32]);
impl Identity {
	/// Derive the identity for the given credentials and process salt.
	///
	/// Additional `opts` bytes (e.g. a serialized cache-options fingerprint) are folded in so
	/// that two `Get` calls for the same credentials but different session options never
	/// collide, matching §4.3's `hash(credentials, salt, opts)`.
	pub fn derive(credentials: &Credentials, salt: &[u8], opts: &[u8]) -> Self {
		let mut hasher = Sha256::new();

		hasher.update(salt);
		hasher.update(b"\0");
		hasher.update(credentials.token().as_bytes());
		hasher.update(b"\0");
		if let Some(ns) = &credentials.namespace_scope {
			hasher.update(ns.as_bytes());
		}
		hasher.update(b"\0");
		hasher.update(opts);

		let digest = hasher.finalize();
		let mut bytes = [0u8; 32];

		bytes.copy_from_slice(&digest);

		Self(bytes)
	}

	/// Render the identity as a lowercase hex string, suitable as a spill-file suffix (§6).
	pub fn to_hex(self) -> String {
		self.0.iter().map(|b| format!("{b:02x}")).collect()
	}
}
impl Debug for Identity {
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
		write!(f, "Identity({}…)", &self.to_hex()[..12])
	}
}
