//! Process-local cache backend.

// self
use crate::{
	_prelude::*,
	cache::{CacheBackend, CacheEntry, CacheFuture},
};

/// Map-backed [`CacheBackend`]; entries vanish with the process.
#[derive(Clone, Debug, Default)]
pub struct MemoryBackend(Arc<RwLock<HashMap<String, CacheEntry>>>);
impl MemoryBackend {
	/// Number of stored entries.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl CacheBackend for MemoryBackend {
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<CacheEntry>> {
		Box::pin(async move { Ok(self.0.read().get(key).cloned()) })
	}

	fn put(&self, entry: CacheEntry) -> CacheFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().insert(entry.key.clone(), entry);

			Ok(())
		})
	}

	fn remove<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
		Box::pin(async move {
			self.0.write().remove(key);

			Ok(())
		})
	}

	fn clear(&self) -> CacheFuture<'_, ()> {
		Box::pin(async move {
			self.0.write().clear();

			Ok(())
		})
	}
}
