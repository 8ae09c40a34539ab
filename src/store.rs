//! Storage contract and built-in store implementation for relay credentials.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::credential::Credential;

/// Opaque persistence contract for the relay's current credential.
///
/// Implementations are side-effect only and carry no business logic. The response guard
/// and the refresh coordinator call them without additional locking, so implementations
/// must be internally synchronized (see [`MemoryStore`]). One store instance must back at
/// most one [`Client`](crate::pipeline::Client) talking to a given backend, or the
/// single-flight refresh collapsing breaks down.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Returns the currently held credential, if any.
	fn read(&self) -> Option<Credential>;

	/// Persists or replaces the held credential.
	fn write(&self, credential: Credential);

	/// Discards the held credential.
	fn clear(&self);
}
