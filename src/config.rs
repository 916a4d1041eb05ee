//! Serde configuration surface and its translation into runtime components.
//!
//! Configuration is a single JSON document. Every section is optional; an empty object
//! yields a pipeline without credentials or rate limits and with an in-memory cache.
//!
//! ```json
//! {
//!   "auth": { "type": "api_key", "api_key": "k-123" },
//!   "cache": { "enabled": true, "storage": "file", "path": "/tmp/cache", "ttl": 300 },
//!   "rate_limit": {
//!     "requests_per_second": 10,
//!     "burst_size": 20,
//!     "rules": [{ "endpoint_pattern": "/search/*", "rate": 0.5, "burst": 2 }]
//!   },
//!   "timeout": 30
//! }
//! ```

// self
use crate::{
	_prelude::*,
	auth::{AuthEngine, AuthSettings, Credential},
	cache::CacheSettings,
	descriptor::Method,
	error::ConfigError,
	id::CredentialId,
	oauth::TokenExchange,
	rate_limit::{RateLimitRule, RateLimitStrategy, RateLimiter},
	store::TokenStore,
};

/// Pattern under which the catch-all rate-limit rule reports its status.
pub const DEFAULT_RULE: &str = "default";

/// Root configuration document.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
	/// Single credential, registered as `default`.
	pub auth: Option<Credential>,
	/// Additional named credentials.
	pub credentials: BTreeMap<CredentialId, Credential>,
	/// Endpoint-to-credential bindings, checked in order.
	pub bindings: Vec<CredentialBinding>,
	/// Credential used when no binding matches.
	pub default_credential: Option<CredentialId>,
	/// Response cache section.
	pub cache: CacheConfig,
	/// Rate-limit section; absent means unlimited.
	pub rate_limit: Option<RateLimitConfig>,
	/// Transport and refresh timeout in seconds; `0` disables it.
	pub timeout: u64,
	/// JSON file persisting token state across runs.
	pub token_store: Option<PathBuf>,
	/// Seconds before expiry at which tokens are refreshed.
	pub refresh_skew: u64,
	/// Consecutive refresh failures tolerated before a credential is invalidated.
	pub max_refresh_failures: u32,
	/// Headers added to every request that does not already carry them.
	pub headers: BTreeMap<String, String>,
}
impl PipelineConfig {
	/// Parses a JSON document.
	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);

		serde_path_to_error::deserialize(de).map_err(|e| ConfigError::Parse {
			path: e.path().to_string(),
			source: e.into_inner(),
		})
	}

	/// Reads and parses a JSON file.
	pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let raw = std::fs::read_to_string(path)
			.map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;

		Self::from_json_str(&raw)
	}

	/// Transport and refresh timeout.
	pub fn timeout(&self) -> Option<StdDuration> {
		(self.timeout > 0).then(|| StdDuration::from_secs(self.timeout))
	}

	/// Auth engine tuning.
	pub fn auth_settings(&self) -> AuthSettings {
		AuthSettings {
			refresh_skew: Duration::seconds(i64::try_from(self.refresh_skew).unwrap_or(i64::MAX)),
			max_refresh_failures: self.max_refresh_failures,
			timeout: self.timeout(),
		}
	}

	/// Builds the auth engine over `exchange` and `store`.
	pub fn auth_engine(
		&self,
		exchange: Arc<dyn TokenExchange>,
		store: Arc<dyn TokenStore>,
	) -> Result<AuthEngine, ConfigError> {
		let mut builder =
			AuthEngine::builder(exchange).with_store(store).with_settings(self.auth_settings());

		if let Some(credential) = &self.auth {
			builder = builder.with_credential(CredentialId::primary(), credential.clone());
		}
		for (id, credential) in &self.credentials {
			builder = builder.with_credential(id.clone(), credential.clone());
		}
		for binding in &self.bindings {
			builder = builder.with_binding(&binding.pattern, binding.credential.clone());
		}
		if let Some(id) = &self.default_credential {
			builder = builder.with_default(id.clone());
		}

		builder.build()
	}

	/// Builds the rate limiter; unlimited when the section is absent.
	pub fn rate_limiter(&self) -> Result<RateLimiter, ConfigError> {
		match &self.rate_limit {
			Some(config) => RateLimiter::new(config.default_rule(), config.rules.iter().cloned()),
			None => Ok(RateLimiter::unlimited()),
		}
	}

	/// Cache settings.
	pub fn cache_settings(&self) -> CacheSettings {
		self.cache.settings()
	}
}
impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			auth: None,
			credentials: BTreeMap::new(),
			bindings: Vec::new(),
			default_credential: None,
			cache: CacheConfig::default(),
			rate_limit: None,
			timeout: 30,
			token_store: None,
			refresh_skew: 30,
			max_refresh_failures: 3,
			headers: BTreeMap::new(),
		}
	}
}

/// Routes endpoints matching `pattern` to a named credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBinding {
	/// Glob matched against the endpoint id and the URL path.
	pub pattern: String,
	/// Credential to apply.
	pub credential: CredentialId,
}

/// Where cached responses live.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStorage {
	/// Process memory.
	#[default]
	Memory,
	/// One JSON file per entry under [`CacheConfig::path`].
	File,
	/// Key-value HTTP service at [`CacheConfig::external_url`].
	External,
}

/// `cache` section.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
	/// Master switch.
	pub enabled: bool,
	/// Backend selection.
	pub storage: CacheStorage,
	/// Entry lifetime in seconds.
	pub ttl: u64,
	/// Total size bound in bytes.
	pub max_size: usize,
	/// URL-path globs that bypass the cache.
	pub exclude_paths: Vec<String>,
	/// Directory for the file backend.
	#[serde(alias = "storage_path")]
	pub path: Option<PathBuf>,
	/// Base URL for the external backend.
	pub external_url: Option<Url>,
	/// Methods whose responses may be cached.
	pub methods: BTreeSet<Method>,
	/// Request headers folded into the cache key.
	pub vary_headers: Vec<String>,
}
impl CacheConfig {
	/// Converts the section into runtime settings.
	pub fn settings(&self) -> CacheSettings {
		CacheSettings {
			enabled: self.enabled,
			ttl: StdDuration::from_secs(self.ttl),
			max_size: self.max_size,
			exclude_paths: self.exclude_paths.clone(),
			methods: self.methods.clone(),
			vary_headers: self.vary_headers.clone(),
		}
	}
}
impl Default for CacheConfig {
	fn default() -> Self {
		let settings = CacheSettings::default();

		Self {
			enabled: settings.enabled,
			storage: CacheStorage::default(),
			ttl: settings.ttl.as_secs(),
			max_size: settings.max_size,
			exclude_paths: settings.exclude_paths,
			path: None,
			external_url: None,
			methods: settings.methods,
			vary_headers: settings.vary_headers,
		}
	}
}

/// `rate_limit` section.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
	/// Sustained rate of the catch-all rule; no catch-all when absent.
	pub requests_per_second: Option<f64>,
	/// Capacity of the catch-all rule; defaults to the rate rounded up.
	pub burst_size: Option<u32>,
	/// Algorithm of the catch-all rule.
	pub strategy: RateLimitStrategy,
	/// Per-endpoint overrides.
	pub rules: Vec<RateLimitRule>,
}
impl RateLimitConfig {
	/// Catch-all rule registered under [`DEFAULT_RULE`].
	pub fn default_rule(&self) -> Option<RateLimitRule> {
		let rate = self.requests_per_second?;
		let burst = self.burst_size.unwrap_or_else(|| (rate.ceil() as u32).max(1));

		Some(RateLimitRule::new(DEFAULT_RULE, rate, burst).with_strategy(self.strategy))
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::ScriptedExchange, auth::TokenState, store::MemoryStore};

	#[test]
	fn empty_document_uses_defaults() {
		let config = PipelineConfig::from_json_str("{}").expect("Empty config should parse.");

		assert!(config.auth.is_none());
		assert_eq!(config.timeout(), Some(StdDuration::from_secs(30)));
		assert_eq!(config.cache.ttl, 300);
		assert_eq!(config.cache.storage, CacheStorage::Memory);
		assert!(config.cache.methods.contains(&Method::Get));
		assert!(config.rate_limiter().expect("Limiter should build.").is_unlimited());
	}

	#[test]
	fn full_document_parses() {
		let config = PipelineConfig::from_json_str(
			r#"{
				"auth": { "type": "api_key", "api_key": "k-123" },
				"cache": {
					"storage": "file",
					"storage_path": "/tmp/oapi-cache",
					"ttl": 60,
					"exclude_paths": ["/auth/*"]
				},
				"rate_limit": {
					"requests_per_second": 2.5,
					"strategy": "leaky_bucket",
					"rules": [{ "endpoint_pattern": "/search/*", "rate": 0.5, "burst": 2 }]
				},
				"timeout": 0,
				"headers": { "User-Agent": "petstore-cli/1.0" }
			}"#,
		)
		.expect("Full config should parse.");

		assert_eq!(config.cache.storage, CacheStorage::File);
		assert_eq!(config.cache.path.as_deref(), Some(Path::new("/tmp/oapi-cache")));
		assert_eq!(config.cache_settings().ttl, StdDuration::from_secs(60));
		assert_eq!(config.timeout(), None);

		let rule = config
			.rate_limit
			.as_ref()
			.and_then(RateLimitConfig::default_rule)
			.expect("Catch-all rule should be derived.");

		assert_eq!(rule.endpoint_pattern, DEFAULT_RULE);
		assert_eq!(rule.burst, 3);
		assert_eq!(rule.strategy, RateLimitStrategy::LeakyBucket);

		let limiter = config.rate_limiter().expect("Limiter should build.");

		assert!(limiter.status(DEFAULT_RULE).is_some());
		assert!(limiter.status("/search/*").is_some());
	}

	#[test]
	fn parse_errors_carry_json_path() {
		let err = PipelineConfig::from_json_str(r#"{ "cache": { "ttl": "soon" } }"#)
			.expect_err("A string TTL should be rejected.");

		match err {
			ConfigError::Parse { path, .. } => assert_eq!(path, "cache.ttl"),
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[test]
	fn oversized_refresh_skew_saturates() {
		let raw = format!(r#"{{ "refresh_skew": {} }}"#, u64::MAX);
		let config = PipelineConfig::from_json_str(&raw).expect("Any u64 skew should parse.");
		let settings = config.auth_settings();
		let now = OffsetDateTime::now_utc();
		let token = TokenState::new("t", now, Some(Duration::HOUR));

		assert_eq!(settings.refresh_skew, Duration::seconds(i64::MAX));
		assert!(token.is_expired_at(now, settings.refresh_skew));
	}

	#[test]
	fn unknown_auth_type_is_rejected() {
		let err = PipelineConfig::from_json_str(r#"{ "auth": { "type": "kerberos" } }"#)
			.expect_err("Unknown auth types should be rejected.");

		assert!(matches!(err, ConfigError::Parse { .. }));
	}

	#[test]
	fn missing_file_reports_io() {
		let err = PipelineConfig::from_path("/definitely/not/here.json")
			.expect_err("Missing files should fail.");

		assert!(matches!(err, ConfigError::Io { .. }));
	}

	#[test]
	fn auth_engine_registers_primary_and_named_credentials() {
		let config = PipelineConfig::from_json_str(
			r#"{
				"auth": { "type": "api_key", "api_key": "k-123" },
				"credentials": {
					"admin": { "type": "basic", "username": "root", "password": "hunter2" }
				},
				"bindings": [{ "pattern": "admin.*", "credential": "admin" }]
			}"#,
		)
		.expect("Config should parse.");
		let engine = config
			.auth_engine(
				Arc::new(ScriptedExchange::new(None)),
				Arc::new(MemoryStore::default()),
			)
			.expect("Engine should build.");
		let admin = CredentialId::new("admin").expect("Credential fixture should be valid.");

		assert!(engine.strategy(&CredentialId::primary()).is_some());
		assert!(engine.strategy(&admin).is_some());
	}

	#[test]
	fn dangling_binding_is_rejected() {
		let config = PipelineConfig::from_json_str(
			r#"{ "bindings": [{ "pattern": "admin.*", "credential": "admin" }] }"#,
		)
		.expect("Config should parse.");
		let err = config
			.auth_engine(
				Arc::new(ScriptedExchange::new(None)),
				Arc::new(MemoryStore::default()),
			)
			.expect_err("Bindings to missing credentials should fail.");

		assert!(matches!(err, ConfigError::UnknownCredential { .. }));
	}
}
