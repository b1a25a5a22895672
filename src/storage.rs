//! Durable key-value storage contract and built-in backends for session data.

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

// self
use crate::_prelude::*;

/// Boxed future returned by [`KeyValueStorage`] operations.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + 'a + Send>>;

/// Durable storage collaborator used by [`TokenStore`](crate::store::TokenStore).
///
/// Implementations must tolerate concurrent access to independent keys without corrupting
/// unrelated entries.
pub trait KeyValueStorage
where
	Self: Send + Sync,
{
	/// Reads the value stored under `key`, if any.
	fn get<'a>(&'a self, key: &'a str) -> StorageFuture<'a, Option<String>>;

	/// Writes or replaces the value stored under `key`.
	fn set<'a>(&'a self, key: &'a str, value: String) -> StorageFuture<'a, ()>;

	/// Removes `key`. Removing a missing key succeeds.
	fn remove<'a>(&'a self, key: &'a str) -> StorageFuture<'a, ()>;
}

/// Error type produced by [`KeyValueStorage`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StorageError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
