//! Response cache with TTL expiry, size-bounded LRU eviction, and pluggable backends.
//!
//! [`ResponseCache`] owns the recency index and the size accounting; a [`CacheBackend`] only
//! stores entries. Backend failures are logged and treated as misses, so a broken cache slows
//! requests down but never fails them.

#[cfg(feature = "reqwest")] pub mod external;
pub mod file;
pub mod key;
pub mod memory;

#[cfg(feature = "reqwest")] pub use external::ExternalBackend;
pub use file::FileBackend;
pub use key::{CacheKeyGenerator, DefaultKeyGenerator};
pub use memory::MemoryBackend;

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use async_lock::OnceCell;
use glob::Pattern;
use lru::LruCache;
// self
use crate::{
	_prelude::*,
	descriptor::{Method, RequestDescriptor},
	error::{CacheBackendError, ConfigError},
};

/// Boxed future returned by [`CacheBackend`] operations.
pub type CacheFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, CacheBackendError>> + 'a + Send>>;

/// Storage behind a [`ResponseCache`].
pub trait CacheBackend
where
	Self: Send + Sync,
{
	/// Fetches the entry stored under `key`.
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<CacheEntry>>;

	/// Inserts or replaces an entry.
	fn put(&self, entry: CacheEntry) -> CacheFuture<'_, ()>;

	/// Deletes the entry stored under `key`; missing keys are not an error.
	fn remove<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()>;

	/// Deletes every entry.
	fn clear(&self) -> CacheFuture<'_, ()>;

	/// Lists entries that outlived a previous process so their sizes can be accounted for.
	///
	/// Volatile backends keep the default, which reports nothing.
	fn persisted(&self) -> CacheFuture<'_, Vec<CacheEntry>> {
		Box::pin(async { Ok(Vec::new()) })
	}
}

/// One cached value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
	/// Cache key.
	pub key: String,
	/// Cached bytes.
	#[serde(with = "base64_bytes")]
	pub value: Vec<u8>,
	/// Wall-clock instant the entry was written.
	pub stored_at: OffsetDateTime,
	/// Lifetime measured from `stored_at`.
	pub ttl: StdDuration,
	/// Bytes charged against the cache size limit.
	pub size: usize,
}
impl CacheEntry {
	/// Creates an entry written at `stored_at`.
	pub fn new(
		key: impl Into<String>,
		value: Vec<u8>,
		ttl: StdDuration,
		stored_at: OffsetDateTime,
	) -> Self {
		let key = key.into();
		let size = key.len() + value.len();

		Self { key, value, stored_at, ttl, size }
	}

	/// Returns `true` once the TTL has elapsed as of `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		Duration::try_from(self.ttl)
			.ok()
			.and_then(|ttl| self.stored_at.checked_add(ttl))
			.is_some_and(|expires_at| now >= expires_at)
	}
}

/// Cache behavior knobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSettings {
	/// Master switch; a disabled cache never hits and never stores.
	pub enabled: bool,
	/// Lifetime applied when [`ResponseCache::store`] is called without one.
	pub ttl: StdDuration,
	/// Upper bound on the summed size of all entries, in bytes.
	pub max_size: usize,
	/// URL-path globs that bypass the cache.
	pub exclude_paths: Vec<String>,
	/// Methods whose responses may be cached.
	pub methods: BTreeSet<Method>,
	/// Request headers folded into the default key.
	pub vary_headers: Vec<String>,
}
impl Default for CacheSettings {
	fn default() -> Self {
		Self {
			enabled: true,
			ttl: StdDuration::from_secs(300),
			max_size: 10 * 1024 * 1024,
			exclude_paths: Vec::new(),
			methods: BTreeSet::from([Method::Get, Method::Head]),
			vary_headers: Vec::new(),
		}
	}
}

/// Result of [`ResponseCache::lookup`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheLookup {
	/// Cached bytes on a hit.
	pub value: Option<Vec<u8>>,
	/// `true` when a live entry was found.
	pub hit: bool,
}
impl CacheLookup {
	fn hit(value: Vec<u8>) -> Self {
		Self { value: Some(value), hit: true }
	}

	fn miss() -> Self {
		Self::default()
	}
}

/// Cache counters.
#[derive(Debug, Default)]
pub struct CacheStats {
	hits: AtomicU64,
	misses: AtomicU64,
	stores: AtomicU64,
	evictions: AtomicU64,
	errors: AtomicU64,
}
impl CacheStats {
	/// Lookups answered from the cache.
	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	/// Lookups that found nothing usable.
	pub fn misses(&self) -> u64 {
		self.misses.load(Ordering::Relaxed)
	}

	/// Entries written.
	pub fn stores(&self) -> u64 {
		self.stores.load(Ordering::Relaxed)
	}

	/// Entries dropped to honor the size limit.
	pub fn evictions(&self) -> u64 {
		self.evictions.load(Ordering::Relaxed)
	}

	/// Backend failures absorbed.
	pub fn errors(&self) -> u64 {
		self.errors.load(Ordering::Relaxed)
	}

	fn bump(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}
}

struct Index {
	lru: LruCache<String, usize>,
	total: usize,
}
impl Index {
	fn new() -> Self {
		Self { lru: LruCache::unbounded(), total: 0 }
	}

	/// Records `key` and returns the keys evicted to get back under `max_size`.
	fn insert(&mut self, key: &str, size: usize, max_size: usize) -> Vec<String> {
		if let Some(previous) = self.lru.put(key.to_owned(), size) {
			self.total -= previous;
		}

		self.total += size;

		let mut evicted = Vec::new();

		while self.total > max_size {
			let Some((victim, size)) = self.lru.pop_lru() else { break };

			self.total -= size;
			evicted.push(victim);
		}

		evicted
	}

	fn remove(&mut self, key: &str) {
		if let Some(size) = self.lru.pop(key) {
			self.total -= size;
		}
	}

	fn clear(&mut self) {
		self.lru.clear();
		self.total = 0;
	}
}

/// Key/value response cache shared by every invocation.
pub struct ResponseCache {
	backend: Arc<dyn CacheBackend>,
	settings: CacheSettings,
	excludes: Vec<Pattern>,
	generator: Arc<dyn CacheKeyGenerator>,
	index: Mutex<Index>,
	key_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
	gate: AsyncRwLock<()>,
	loaded: OnceCell<()>,
	stats: CacheStats,
}
impl ResponseCache {
	/// Builds a cache over `backend`.
	pub fn new(
		backend: Arc<dyn CacheBackend>,
		settings: CacheSettings,
	) -> Result<Self, ConfigError> {
		if settings.enabled && settings.max_size == 0 {
			return Err(ConfigError::invalid("cache.max_size", "must be greater than zero"));
		}

		let excludes = settings
			.exclude_paths
			.iter()
			.map(|raw| {
				Pattern::new(raw)
					.map_err(|source| ConfigError::InvalidPattern { pattern: raw.clone(), source })
			})
			.collect::<Result<_, _>>()?;
		let generator =
			Arc::new(DefaultKeyGenerator::default().with_vary_headers(&settings.vary_headers));

		Ok(Self {
			backend,
			settings,
			excludes,
			generator,
			index: Mutex::new(Index::new()),
			key_locks: Mutex::new(HashMap::new()),
			gate: AsyncRwLock::new(()),
			loaded: OnceCell::new(),
			stats: CacheStats::default(),
		})
	}

	/// In-process cache.
	pub fn memory(settings: CacheSettings) -> Result<Self, ConfigError> {
		Self::new(Arc::new(MemoryBackend::default()), settings)
	}

	/// Cache that never hits and never stores.
	pub fn disabled() -> Self {
		Self {
			backend: Arc::new(MemoryBackend::default()),
			settings: CacheSettings { enabled: false, ..CacheSettings::default() },
			excludes: Vec::new(),
			generator: Arc::new(DefaultKeyGenerator::default()),
			index: Mutex::new(Index::new()),
			key_locks: Mutex::new(HashMap::new()),
			gate: AsyncRwLock::new(()),
			loaded: OnceCell::new(),
			stats: CacheStats::default(),
		}
	}

	/// Replaces the default key derivation.
	pub fn with_key_generator(mut self, generator: impl CacheKeyGenerator + 'static) -> Self {
		self.generator = Arc::new(generator);

		self
	}

	/// Active settings.
	pub fn settings(&self) -> &CacheSettings {
		&self.settings
	}

	/// Returns `true` unless the cache was disabled.
	pub fn is_enabled(&self) -> bool {
		self.settings.enabled
	}

	/// Counters.
	pub fn stats(&self) -> &CacheStats {
		&self.stats
	}

	/// Number of indexed entries.
	pub fn len(&self) -> usize {
		self.index.lock().lru.len()
	}

	/// Returns `true` when nothing is indexed.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Summed size of indexed entries, in bytes.
	pub fn size(&self) -> usize {
		self.index.lock().total
	}

	/// Returns `true` when `path` matches an exclude glob.
	pub fn is_excluded(&self, path: &str) -> bool {
		self.excludes.iter().any(|pattern| pattern.matches(path))
	}

	/// Returns `true` when responses to `descriptor` may be looked up and stored.
	pub fn is_cacheable(&self, descriptor: &RequestDescriptor) -> bool {
		self.settings.enabled
			&& self.settings.methods.contains(&descriptor.method)
			&& !self.is_excluded(descriptor.url.path())
	}

	/// Key the response to `descriptor` is cached under.
	pub fn key_for(&self, descriptor: &RequestDescriptor) -> String {
		self.generator.key_for(descriptor)
	}

	/// Looks `key` up against the wall clock.
	pub async fn lookup(&self, key: &str) -> CacheLookup {
		self.lookup_at(key, OffsetDateTime::now_utc()).await
	}

	/// Looks `key` up as of `now`. Expired entries are deleted on the way.
	pub async fn lookup_at(&self, key: &str, now: OffsetDateTime) -> CacheLookup {
		if !self.settings.enabled {
			return CacheLookup::miss();
		}

		self.load_persisted().await;

		let _gate = self.gate.read().await;
		let (lookup, evicted) = self
			.serialized(key, async {
				let entry = match self.backend.get(key).await {
					Ok(entry) => entry,
					Err(e) => {
						self.absorb("lookup", key, &e);
						self.index.lock().remove(key);

						return (CacheLookup::miss(), Vec::new());
					},
				};

				match entry {
					Some(entry) if entry.is_expired_at(now) => {
						tracing::debug!(key, "cache entry expired");

						if let Err(e) = self.backend.remove(key).await {
							self.absorb("expire", key, &e);
						}

						self.index.lock().remove(key);

						(CacheLookup::miss(), Vec::new())
					},
					Some(entry) => {
						let evicted = {
							let mut index = self.index.lock();

							if index.lru.get(key).is_some() {
								Vec::new()
							} else {
								index.insert(key, entry.size, self.settings.max_size)
							}
						};

						(CacheLookup::hit(entry.value), evicted)
					},
					None => {
						self.index.lock().remove(key);

						(CacheLookup::miss(), Vec::new())
					},
				}
			})
			.await;

		CacheStats::bump(if lookup.hit { &self.stats.hits } else { &self.stats.misses });
		self.evict(evicted).await;

		lookup
	}

	/// Stores `value` under `key` for `ttl` (or the configured default).
	pub async fn store(&self, key: &str, value: Vec<u8>, ttl: Option<StdDuration>) {
		self.store_at(key, value, ttl, OffsetDateTime::now_utc()).await
	}

	/// Stores `value` as if written at `now`.
	pub async fn store_at(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<StdDuration>,
		now: OffsetDateTime,
	) {
		if !self.settings.enabled {
			return;
		}

		let ttl = ttl.unwrap_or(self.settings.ttl);

		if ttl.is_zero() {
			return;
		}

		let entry = CacheEntry::new(key, value, ttl, now);

		if entry.size > self.settings.max_size {
			tracing::debug!(key, size = entry.size, "entry larger than the cache; not stored");

			return;
		}

		let size = entry.size;

		self.load_persisted().await;

		let _gate = self.gate.read().await;
		let evicted = self
			.serialized(key, async {
				match self.backend.put(entry).await {
					Ok(()) => {
						CacheStats::bump(&self.stats.stores);

						self.index.lock().insert(key, size, self.settings.max_size)
					},
					Err(e) => {
						self.absorb("store", key, &e);
						self.index.lock().remove(key);

						Vec::new()
					},
				}
			})
			.await;

		self.evict(evicted).await;
	}

	/// Deletes the entry under `key`.
	pub async fn delete(&self, key: &str) {
		self.load_persisted().await;

		let _gate = self.gate.read().await;

		self.serialized(key, async {
			if let Err(e) = self.backend.remove(key).await {
				self.absorb("delete", key, &e);
			}

			self.index.lock().remove(key);
		})
		.await;
	}

	/// Deletes every entry while holding the cache exclusively.
	pub async fn clear(&self) {
		self.load_persisted().await;

		let _gate = self.gate.write().await;

		if let Err(e) = self.backend.clear().await {
			self.absorb("clear", "*", &e);
		}

		self.index.lock().clear();
	}

	/// Indexes whatever the backend kept from earlier runs, once, before the first lookup or
	/// store. Oldest entries are indexed first so they are the first to go when over the limit.
	async fn load_persisted(&self) {
		self.loaded
			.get_or_init(|| async {
				let mut entries = match self.backend.persisted().await {
					Ok(entries) => entries,
					Err(e) => {
						self.absorb("load", "*", &e);

						return;
					},
				};
				let now = OffsetDateTime::now_utc();

				entries.sort_by_key(|entry| entry.stored_at);

				let (expired, live) =
					entries.into_iter().partition::<Vec<_>, _>(|entry| entry.is_expired_at(now));
				let evicted = {
					let mut index = self.index.lock();

					live.iter()
						.flat_map(|entry| {
							index.insert(&entry.key, entry.size, self.settings.max_size)
						})
						.collect::<Vec<_>>()
				};

				for entry in &expired {
					if let Err(e) = self.backend.remove(&entry.key).await {
						self.absorb("expire", &entry.key, &e);
					}
				}

				tracing::debug!(
					indexed = live.len() - evicted.len(),
					expired = expired.len(),
					"loaded persisted cache entries"
				);

				self.evict(evicted).await;
			})
			.await;
	}

	async fn evict(&self, keys: Vec<String>) {
		for key in keys {
			self.serialized(&key, async {
				// Re-admitted by a concurrent lookup or store since it was picked.
				if self.index.lock().lru.contains(&key) {
					return;
				}

				if let Err(e) = self.backend.remove(&key).await {
					self.absorb("evict", &key, &e);
				}

				CacheStats::bump(&self.stats.evictions);
				tracing::debug!(key = %key, "evicted cache entry");
			})
			.await;
		}
	}

	/// Runs `op` while holding the per-key lock for `key`.
	async fn serialized<F, T>(&self, key: &str, op: F) -> T
	where
		F: Future<Output = T>,
	{
		let lock = {
			let mut locks = self.key_locks.lock();

			locks.entry(key.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
		};
		let output = {
			let _guard = lock.lock().await;

			op.await
		};
		let mut locks = self.key_locks.lock();

		// Only the map and this call still hold it.
		if Arc::strong_count(&lock) == 2 {
			locks.remove(key);
		}

		output
	}

	fn absorb(&self, operation: &'static str, key: &str, e: &CacheBackendError) {
		CacheStats::bump(&self.stats.errors);

		tracing::warn!(operation, key, error = %e, "cache backend failure treated as a miss");
	}
}
impl Debug for ResponseCache {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ResponseCache")
			.field("settings", &self.settings)
			.field("len", &self.len())
			.field("size", &self.size())
			.finish()
	}
}

pub(crate) mod base64_bytes {
	// crates.io
	use base64::{Engine, engine::general_purpose::STANDARD};
	use serde::{Deserializer, Serializer, de::Error as _};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
	where
		D: Deserializer<'de>,
	{
		let encoded = String::deserialize(deserializer)?;

		STANDARD.decode(encoded).map_err(D::Error::custom)
	}
}
