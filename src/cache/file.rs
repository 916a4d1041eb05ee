//! Directory-backed cache that survives process restarts.

// std
use std::{fs, io::ErrorKind};
// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	cache::{CacheBackend, CacheEntry, CacheFuture, key},
	error::CacheBackendError,
	store::{StoreError, file},
};

/// Stores each entry as `<sha256(key)>.json` under one directory.
#[derive(Clone, Debug)]
pub struct FileBackend {
	dir: PathBuf,
}
impl FileBackend {
	/// Opens (or creates) the cache directory.
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let dir = dir.into();

		fs::create_dir_all(&dir).map_err(|e| StoreError::Backend {
			message: format!("Failed to create cache directory {}: {e}", dir.display()),
		})?;

		Ok(Self { dir })
	}

	/// Cache directory.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> PathBuf {
		self.dir.join(format!("{}.json", key::hex(&Sha256::digest(key))))
	}
}
impl CacheBackend for FileBackend {
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<CacheEntry>> {
		Box::pin(async move {
			let path = self.path_for(key);
			let bytes = match fs::read(&path) {
				Ok(bytes) => bytes,
				Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
				Err(e) => return Err(backend(format!("Failed to read {}: {e}", path.display()))),
			};
			let entry = serde_json::from_slice::<CacheEntry>(&bytes).map_err(|e| {
				CacheBackendError::Serialization {
					message: format!("Failed to parse {}: {e}", path.display()),
				}
			})?;

			// Guards against hash collisions between distinct keys.
			Ok((entry.key == key).then_some(entry))
		})
	}

	fn put(&self, entry: CacheEntry) -> CacheFuture<'_, ()> {
		Box::pin(async move {
			let bytes = serde_json::to_vec(&entry).map_err(|e| CacheBackendError::Serialization {
				message: format!("Failed to serialize cache entry: {e}"),
			})?;

			file::write_atomically(&self.path_for(&entry.key), &bytes).map_err(from_store)
		})
	}

	fn remove<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
		Box::pin(async move {
			let path = self.path_for(key);

			match fs::remove_file(&path) {
				Ok(()) => Ok(()),
				Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
				Err(e) => Err(backend(format!("Failed to remove {}: {e}", path.display()))),
			}
		})
	}

	fn clear(&self) -> CacheFuture<'_, ()> {
		Box::pin(async move {
			let entries = fs::read_dir(&self.dir).map_err(|e| {
				backend(format!("Failed to list {}: {e}", self.dir.display()))
			})?;

			for entry in entries {
				let path = entry.map_err(|e| backend(e.to_string()))?.path();

				if path.extension().is_some_and(|ext| ext == "json" || ext == "tmp") {
					fs::remove_file(&path).map_err(|e| {
						backend(format!("Failed to remove {}: {e}", path.display()))
					})?;
				}
			}

			Ok(())
		})
	}

	fn persisted(&self) -> CacheFuture<'_, Vec<CacheEntry>> {
		Box::pin(async move {
			let listing = fs::read_dir(&self.dir).map_err(|e| {
				backend(format!("Failed to list {}: {e}", self.dir.display()))
			})?;
			let mut entries = Vec::new();

			for item in listing {
				let path = item.map_err(|e| backend(e.to_string()))?.path();

				if path.extension().is_none_or(|ext| ext != "json") {
					continue;
				}

				let parsed = fs::read(&path)
					.map_err(|e| e.to_string())
					.and_then(|bytes| {
						serde_json::from_slice::<CacheEntry>(&bytes).map_err(|e| e.to_string())
					});

				match parsed {
					// Only files written under their own key's name count.
					Ok(entry) if path == self.path_for(&entry.key) => entries.push(entry),
					Ok(_) => {
						tracing::warn!(path = %path.display(), "skipping misnamed cache file");
					},
					Err(e) => {
						tracing::warn!(
							path = %path.display(),
							error = %e,
							"skipping unreadable cache file"
						);
					},
				}
			}

			Ok(entries)
		})
	}
}

fn backend(message: String) -> CacheBackendError {
	CacheBackendError::Backend { message }
}

fn from_store(e: StoreError) -> CacheBackendError {
	match e {
		StoreError::Serialization { message } => CacheBackendError::Serialization { message },
		StoreError::Backend { message } => CacheBackendError::Backend { message },
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;
	use crate::cache::{CacheSettings, ResponseCache};

	fn scratch_dir(name: &str) -> PathBuf {
		env::temp_dir().join(format!(
			"oapi_pipeline_{name}_{}_{}",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		))
	}

	#[tokio::test]
	async fn entries_survive_reopen() {
		let dir = scratch_dir("file_cache");
		let entry = CacheEntry::new(
			"pets",
			b"[1,2,3]".to_vec(),
			StdDuration::from_secs(300),
			OffsetDateTime::now_utc(),
		);

		FileBackend::open(&dir)
			.expect("Cache directory should open.")
			.put(entry.clone())
			.await
			.expect("Put should succeed.");

		let reopened = FileBackend::open(&dir).expect("Cache directory should reopen.");

		assert_eq!(reopened.get("pets").await.expect("Get should succeed."), Some(entry));
		assert_eq!(reopened.get("other").await.expect("Missing key should be a miss."), None);

		reopened.clear().await.expect("Clear should succeed.");

		assert_eq!(reopened.get("pets").await.expect("Get should succeed."), None);

		let _ = fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn corrupted_entries_surface_serialization_errors() {
		let dir = scratch_dir("file_cache_corrupt");
		let backend = FileBackend::open(&dir).expect("Cache directory should open.");

		fs::write(backend.path_for("pets"), b"not json").expect("Fixture should be written.");

		assert!(matches!(
			backend.get("pets").await,
			Err(CacheBackendError::Serialization { .. })
		));

		let _ = fs::remove_dir_all(&dir);
	}

	#[tokio::test]
	async fn reopened_cache_accounts_for_files_on_disk() {
		let dir = scratch_dir("file_cache_reload");
		let backend = FileBackend::open(&dir).expect("Cache directory should open.");
		let now = OffsetDateTime::now_utc();
		let ttl = StdDuration::from_secs(300);

		for (key, age) in [("a", 30), ("b", 20), ("c", 10)] {
			backend
				.put(CacheEntry::new(key, vec![b'x'; 29], ttl, now - Duration::seconds(age)))
				.await
				.expect("Put should succeed.");
		}

		backend
			.put(CacheEntry::new(
				"stale",
				b"old".to_vec(),
				StdDuration::from_secs(1),
				now - Duration::minutes(1),
			))
			.await
			.expect("Put should succeed.");
		fs::write(dir.join("garbage.json"), b"not json").expect("Fixture should be written.");

		assert_eq!(backend.persisted().await.expect("Listing should succeed.").len(), 4);

		let settings = CacheSettings { max_size: 64, ..CacheSettings::default() };
		let cache = ResponseCache::new(Arc::new(backend.clone()), settings)
			.expect("Cache should build.");

		assert!(cache.lookup("b").await.hit);
		assert_eq!(cache.len(), 2);
		assert_eq!(cache.size(), 60);
		assert_eq!(cache.stats().evictions(), 1);
		assert!(!backend.path_for("a").exists());
		assert!(!backend.path_for("stale").exists());
		assert!(backend.path_for("c").exists());

		let _ = fs::remove_dir_all(&dir);
	}
}
