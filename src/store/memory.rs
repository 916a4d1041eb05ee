//! Thread-safe in-memory [`TokenStore`].

// self
use crate::{
	_prelude::*,
	auth::TokenState,
	id::CredentialId,
	store::{StoreFuture, TokenStore},
};

/// Keeps token state in-process; the default when no `token_store` path is configured.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<HashMap<CredentialId, TokenState>>>);
impl MemoryStore {
	/// Number of credentials with stored state.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl TokenStore for MemoryStore {
	fn save<'a>(&'a self, credential: &'a CredentialId, state: TokenState) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.0.write().insert(credential.clone(), state);

			Ok(())
		})
	}

	fn fetch<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, Option<TokenState>> {
		Box::pin(async move { Ok(self.0.read().get(credential).cloned()) })
	}

	fn remove<'a>(
		&'a self,
		credential: &'a CredentialId,
	) -> StoreFuture<'a, Option<TokenState>> {
		Box::pin(async move { Ok(self.0.write().remove(credential)) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn save_fetch_remove() {
		let store = MemoryStore::default();
		let id = CredentialId::primary();
		let state = TokenState::new("access", OffsetDateTime::now_utc(), Some(Duration::HOUR));

		store.save(&id, state.clone()).await.expect("Save should succeed.");

		assert_eq!(store.fetch(&id).await.expect("Fetch should succeed."), Some(state.clone()));
		assert_eq!(store.remove(&id).await.expect("Remove should succeed."), Some(state));
		assert!(store.is_empty());
	}
}
