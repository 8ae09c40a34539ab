//! Thread-safe in-memory [`CredentialStore`] implementation for local development and tests.

// self
use crate::{_prelude::*, credential::Credential, store::CredentialStore};

/// Thread-safe storage backend that keeps the credential in-process.
#[derive(Debug, Default)]
pub struct MemoryStore(RwLock<Option<Credential>>);
impl MemoryStore {
	/// Creates a store seeded with an initial credential.
	pub fn with_credential(credential: Credential) -> Self {
		Self(RwLock::new(Some(credential)))
	}
}
impl CredentialStore for MemoryStore {
	fn read(&self) -> Option<Credential> {
		self.0.read().clone()
	}

	fn write(&self, credential: Credential) {
		*self.0.write() = Some(credential);
	}

	fn clear(&self) {
		*self.0.write() = None;
	}
}
