//! File-backed [`TokenStore`] that survives process restarts.

// std
use std::{
	fs::{self, File},
	io::Write,
};
// self
use crate::{
	_prelude::*,
	auth::TokenState,
	id::CredentialId,
	store::{StoreError, StoreFuture, TokenStore},
};

type Snapshot = BTreeMap<CredentialId, TokenState>;

/// Persists all token states to one JSON document after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Snapshot>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		let snapshot = load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing document.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn persist_locked(&self, contents: &Snapshot) -> Result<(), StoreError> {
		let serialized =
			serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize token snapshot: {e}"),
			})?;

		write_atomically(&self.path, &serialized)
	}
}
impl TokenStore for FileStore {
	fn save<'a>(&'a self, credential: &'a CredentialId, state: TokenState) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.insert(credential.clone(), state);
			self.persist_locked(&guard)
		})
	}

	fn fetch<'a>(&'a self, credential: &'a CredentialId) -> StoreFuture<'a, Option<TokenState>> {
		Box::pin(async move { Ok(self.inner.read().get(credential).cloned()) })
	}

	fn remove<'a>(
		&'a self,
		credential: &'a CredentialId,
	) -> StoreFuture<'a, Option<TokenState>> {
		Box::pin(async move {
			let mut guard = self.inner.write();
			let removed = guard.remove(credential);

			if removed.is_some() {
				self.persist_locked(&guard)?;
			}

			Ok(removed)
		})
	}
}

/// Writes `bytes` to a sibling temp file, syncs it, then renames it over `path`.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
	ensure_parent_exists(path)?;

	let mut tmp_path = path.to_path_buf();

	tmp_path.set_extension("tmp");

	{
		let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
			message: format!("Failed to create {}: {e}", tmp_path.display()),
		})?;

		file.write_all(bytes).map_err(|e| StoreError::Backend {
			message: format!("Failed to write {}: {e}", tmp_path.display()),
		})?;
		file.sync_all().map_err(|e| StoreError::Backend {
			message: format!("Failed to sync {}: {e}", tmp_path.display()),
		})?;
	}

	fs::rename(&tmp_path, path).map_err(|e| StoreError::Backend {
		message: format!("Failed to replace {}: {e}", path.display()),
	})
}

pub(crate) fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
			message: format!("Failed to create directory {}: {e}", parent.display()),
		})?;
	}

	Ok(())
}

fn load_snapshot(path: &Path) -> Result<Snapshot, StoreError> {
	if !path.exists() {
		return Ok(Snapshot::new());
	}

	let bytes = fs::read(path).map_err(|e| StoreError::Backend {
		message: format!("Failed to read {}: {e}", path.display()),
	})?;

	if bytes.is_empty() {
		return Ok(Snapshot::new());
	}

	serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
		message: format!("Failed to parse {}: {e}", path.display()),
	})
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;

	fn temp_path() -> PathBuf {
		let unique = format!(
			"oapi_pipeline_token_store_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[tokio::test]
	async fn save_and_reload_round_trip() {
		let path = temp_path();
		let store = FileStore::open(&path).expect("File store should open.");
		let id = CredentialId::new("github").expect("Credential fixture should be valid.");
		let state = TokenState::new("access-token", OffsetDateTime::now_utc(), Some(Duration::HOUR))
			.with_refresh_token("refresh-token");

		store.save(&id, state.clone()).await.expect("Save should persist the token.");
		drop(store);

		let reopened = FileStore::open(&path).expect("File store should reopen.");
		let fetched = reopened
			.fetch(&id)
			.await
			.expect("Fetch should succeed.")
			.expect("File store lost token after reopen.");

		assert_eq!(fetched, state);

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary token store {}: {e}", path.display())
		});
	}

	#[test]
	fn corrupted_snapshot_is_reported() {
		let path = temp_path();

		fs::write(&path, b"{not json").expect("Fixture file should be writable.");

		assert!(matches!(FileStore::open(&path), Err(StoreError::Serialization { .. })));

		fs::remove_file(&path).expect("Fixture file should be removable.");
	}
}
