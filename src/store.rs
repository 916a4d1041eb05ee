//! Persistence contract for per-credential token state.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{_prelude::*, auth::TokenState, id::CredentialId};

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Storage backend for token state that should outlive a single invocation.
///
/// The auth engine writes through on every successful refresh and reads once per credential
/// when no in-memory state exists yet.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the state for `credential`.
	fn save<'a>(&'a self, credential: &'a CredentialId, state: TokenState) -> StoreFuture<'a, ()>;

	/// Fetches the state associated with `credential`, if present.
	fn fetch<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, Option<TokenState>>;

	/// Drops the state associated with `credential`, returning it if present.
	fn remove<'a>(&'a self, credential: &'a CredentialId)
	-> StoreFuture<'a, Option<TokenState>>;
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
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

#[cfg(test)]
mod tests {
	// std
	use std::error::Error as StdError;
	// self
	use super::*;
	use crate::error::ConfigError;

	#[test]
	fn store_error_converts_into_config_error_with_source() {
		let store_error = StoreError::Backend { message: "disk full".into() };
		let config_error: ConfigError = store_error.clone().into();

		assert!(matches!(config_error, ConfigError::Storage(_)));

		let source = StdError::source(&config_error)
			.expect("Config error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
