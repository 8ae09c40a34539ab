//! Credential material shared by the store, the authenticator, and the refresh flow.

// self
use crate::_prelude::*;

/// Redacted secret wrapper keeping credential material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSecret(String);
impl CredentialSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner secret value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl AsRef<str> for CredentialSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for CredentialSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("CredentialSecret").field(&"<redacted>").finish()
	}
}
impl Display for CredentialSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Credential pair held by a [`CredentialStore`](crate::store::CredentialStore).
///
/// An access secret rejected by the server with an authentication failure must never be
/// reused for a replay; the refresh flow replaces it or the request fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Short-lived secret attached to individual requests.
	pub access: CredentialSecret,
	/// Longer-lived secret used solely to obtain a new access secret.
	///
	/// Absent in cookie deployments, where the refresh secret lives in an httpOnly cookie
	/// outside this layer's reach.
	pub refresh: Option<CredentialSecret>,
}
impl Credential {
	/// Creates a bearer credential pair.
	pub fn bearer(access: impl Into<String>, refresh: impl Into<String>) -> Self {
		Self {
			access: CredentialSecret::new(access),
			refresh: Some(CredentialSecret::new(refresh)),
		}
	}

	/// Creates a credential with no refresh secret.
	pub fn access_only(access: impl Into<String>) -> Self {
		Self { access: CredentialSecret::new(access), refresh: None }
	}
}
