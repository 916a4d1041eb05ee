//! The request pipeline: auth, admission, cache, transport, in that order.
//!
//! A [`Pipeline`] is built once per process and cloned freely; every clone shares the same
//! auth engine, rate limiter, and cache. Each [`Pipeline::execute`] call owns an
//! [`InvocationContext`] and reports every stage it runs to the registered observers.

pub mod context;
pub mod middleware;

pub use context::InvocationContext;
pub use middleware::{DefaultHeaders, Middleware, MiddlewareFuture};

// self
#[cfg(feature = "reqwest")]
use crate::{
	cache::{CacheBackend, ExternalBackend, FileBackend, MemoryBackend},
	config::{CacheStorage, PipelineConfig},
	error::ConfigError,
	http::ReqwestHttpClient,
	oauth::OAuthFacade,
	store::{FileStore, MemoryStore, TokenStore},
	transport::ReqwestTransport,
};
use crate::{
	_prelude::*,
	auth::AuthEngine,
	cache::{self, ResponseCache},
	descriptor::{RequestDescriptor, ResponseDescriptor},
	obs::{InvocationSpan, Observer, Stage, StageEvent, StageOutcome, TracingObserver},
	rate_limit::{Admission, RateLimiter},
	store::StoreError,
	transport::Transport,
};

/// Shared request pipeline.
#[derive(Clone)]
pub struct Pipeline {
	auth: Arc<AuthEngine>,
	rate_limiter: Arc<RateLimiter>,
	cache: Arc<ResponseCache>,
	transport: Arc<dyn Transport>,
	middleware: Arc<[Arc<dyn Middleware>]>,
	observers: Arc<[Arc<dyn Observer>]>,
	timeout: Option<StdDuration>,
}
impl Pipeline {
	/// Starts a builder that sends requests through `transport`.
	pub fn builder(transport: Arc<dyn Transport>) -> PipelineBuilder {
		PipelineBuilder {
			transport,
			auth: None,
			rate_limiter: None,
			cache: None,
			middleware: Vec::new(),
			observers: default_observers(),
			timeout: Some(StdDuration::from_secs(30)),
		}
	}

	/// Assembles a reqwest-backed pipeline from configuration.
	#[cfg(feature = "reqwest")]
	pub fn from_config(config: &PipelineConfig) -> Result<Self> {
		let client = ReqwestClient::builder().build().map_err(ConfigError::from)?;
		let token_client = ReqwestClient::builder()
			.redirect(reqwest::redirect::Policy::none())
			.build()
			.map_err(ConfigError::from)?;
		let exchange = Arc::new(OAuthFacade::reqwest(ReqwestHttpClient::with_client(token_client)));
		let store: Arc<dyn TokenStore> = match &config.token_store {
			Some(path) => Arc::new(FileStore::open(path).map_err(ConfigError::from)?),
			None => Arc::new(MemoryStore::default()),
		};
		let auth = config.auth_engine(exchange, store)?;
		let rate_limiter = config.rate_limiter()?;
		let settings = config.cache_settings();
		let backend: Arc<dyn CacheBackend> = match config.cache.storage {
			_ if !settings.enabled => Arc::new(MemoryBackend::default()),
			CacheStorage::Memory => Arc::new(MemoryBackend::default()),
			CacheStorage::File => {
				let dir = config.cache.path.as_ref().ok_or_else(|| {
					ConfigError::invalid("cache.path", "required when cache.storage is `file`")
				})?;

				Arc::new(FileBackend::open(dir).map_err(ConfigError::from)?)
			},
			CacheStorage::External => {
				let base = config.cache.external_url.clone().ok_or_else(|| {
					ConfigError::invalid(
						"cache.external_url",
						"required when cache.storage is `external`",
					)
				})?;

				Arc::new(ExternalBackend::new(client.clone(), base)?)
			},
		};
		let cache = ResponseCache::new(backend, settings)?;
		let mut builder = Self::builder(Arc::new(ReqwestTransport::with_client(client)))
			.with_auth(auth)
			.with_rate_limiter(rate_limiter)
			.with_cache(cache)
			.with_timeout(config.timeout());

		if !config.headers.is_empty() {
			builder = builder.with_middleware(DefaultHeaders::new(&config.headers));
		}

		Ok(builder.build())
	}

	/// Auth engine, for PKCE authorization and token inspection.
	pub fn auth(&self) -> &AuthEngine {
		&self.auth
	}

	/// Rate limiter, for bucket status.
	pub fn rate_limiter(&self) -> &RateLimiter {
		&self.rate_limiter
	}

	/// Response cache, for manual invalidation.
	pub fn cache(&self) -> &ResponseCache {
		&self.cache
	}

	/// Runs `descriptor` through every stage and returns the response.
	///
	/// Non-2xx responses are returned as responses. Dropping the returned future before the
	/// transport stage refunds the rate-limit permit and releases any refresh lock.
	pub async fn execute(&self, descriptor: RequestDescriptor) -> Result<ResponseDescriptor> {
		let span = InvocationSpan::new(&descriptor);

		span.instrument(self.run(InvocationContext::new(descriptor))).await
	}

	/// Persists in-memory token state so the next process starts warm.
	pub async fn shutdown(&self) -> Result<(), StoreError> {
		self.auth.persist().await?;

		tracing::debug!("pipeline state flushed");

		Ok(())
	}

	async fn run(&self, mut ctx: InvocationContext) -> Result<ResponseDescriptor> {
		// Auth.
		let started = Instant::now();

		ctx.credential = self.auth.credential_for(&ctx.descriptor).cloned();

		if let Some(id) = ctx.credential.clone() {
			match self.auth.authorize_with(&id, ctx.descriptor.clone()).await {
				Ok(descriptor) => {
					ctx.descriptor = descriptor;

					self.notify(&ctx, Stage::Auth, StageOutcome::Success, started, None);
				},
				Err(e) => return Err(self.fail(&ctx, Stage::Auth, started, e)),
			}
		} else {
			self.notify(&ctx, Stage::Auth, StageOutcome::Bypassed, started, None);
		}

		// Rate limit.
		let started = Instant::now();
		let permit = match self.rate_limiter.admit(&ctx.descriptor) {
			Admission::Allowed(permit) => {
				let outcome = match permit.rule() {
					Some(_) => StageOutcome::Success,
					None => StageOutcome::Bypassed,
				};

				ctx.rate_limit_rule = permit.rule().map(str::to_owned);

				self.notify(&ctx, Stage::RateLimit, outcome, started, None);

				permit
			},
			Admission::Denied { rule, retry_after } => {
				self.notify(&ctx, Stage::RateLimit, StageOutcome::Denied, started, None);
				self.notify(&ctx, Stage::Complete, StageOutcome::Denied, ctx.started_at(), None);

				return Err(Error::RateLimitExceeded { rule, retry_after });
			},
		};

		// Cache lookup.
		let started = Instant::now();

		if self.cache.is_cacheable(&ctx.descriptor) {
			let key = self.cache.key_for(&ctx.descriptor);

			if let Some(bytes) = self.cache.lookup(&key).await.value {
				match CachedResponse::decode(&bytes) {
					Ok(cached) => {
						permit.commit();

						let mut response = cached.into_response();

						response.elapsed = ctx.elapsed();

						self.notify(&ctx, Stage::CacheLookup, StageOutcome::Hit, started, None);
						self.notify(
							&ctx,
							Stage::Complete,
							StageOutcome::Success,
							ctx.started_at(),
							Some(response.status),
						);

						return Ok(response);
					},
					Err(e) => {
						tracing::warn!(error = %e, "discarding undecodable cache entry");

						self.cache.delete(&key).await;
					},
				}
			}

			ctx.cache_key = Some(key);

			self.notify(&ctx, Stage::CacheLookup, StageOutcome::Miss, started, None);
		} else {
			self.notify(&ctx, Stage::CacheLookup, StageOutcome::Bypassed, started, None);
		}

		for middleware in self.middleware.iter() {
			if let Err(e) = middleware.before(&mut ctx).await {
				tracing::warn!(
					middleware = middleware.name(),
					error = %e,
					"middleware rejected request"
				);
				self.notify(&ctx, Stage::Complete, StageOutcome::Failure, ctx.started_at(), None);

				return Err(e);
			}
		}

		// Transport. From here on the request counts against the limit even if cancelled.
		permit.commit();

		let started = Instant::now();
		let sent = self.transport.send(ctx.descriptor.clone());
		let result = match self.timeout {
			Some(after) => match tokio::time::timeout(after, sent).await {
				Ok(result) => result.map_err(Error::from),
				Err(_) => Err(Error::Timeout { stage: Stage::Transport, after }),
			},
			None => sent.await.map_err(Error::from),
		};
		let mut response = match result {
			Ok(response) => response,
			Err(e) => return Err(self.fail(&ctx, Stage::Transport, started, e)),
		};

		self.notify(&ctx, Stage::Transport, StageOutcome::Success, started, Some(response.status));

		for middleware in self.middleware.iter().rev() {
			if let Err(e) = middleware.after(&ctx, &mut response).await {
				tracing::warn!(
					middleware = middleware.name(),
					error = %e,
					"middleware rejected response"
				);
				self.notify(&ctx, Stage::Complete, StageOutcome::Failure, ctx.started_at(), None);

				return Err(e);
			}
		}

		// Cache store.
		if let Some(key) = &ctx.cache_key {
			let started = Instant::now();

			if response.is_success() {
				match CachedResponse::encode(&response) {
					Ok(bytes) => {
						self.cache.store(key, bytes, None).await;
						self.notify(&ctx, Stage::CacheStore, StageOutcome::Success, started, None);
					},
					Err(e) => {
						tracing::warn!(error = %e, "response could not be encoded for the cache");
						self.notify(&ctx, Stage::CacheStore, StageOutcome::Failure, started, None);
					},
				}
			} else {
				self.notify(&ctx, Stage::CacheStore, StageOutcome::Bypassed, started, None);
			}
		}

		response.served_from_cache = false;
		response.elapsed = ctx.elapsed();

		self.notify(
			&ctx,
			Stage::Complete,
			StageOutcome::Success,
			ctx.started_at(),
			Some(response.status),
		);

		Ok(response)
	}

	fn fail(&self, ctx: &InvocationContext, stage: Stage, started: Instant, e: Error) -> Error {
		self.notify(ctx, stage, StageOutcome::Failure, started, e.status());
		self.notify(ctx, Stage::Complete, StageOutcome::Failure, ctx.started_at(), e.status());

		e
	}

	fn notify(
		&self,
		ctx: &InvocationContext,
		stage: Stage,
		outcome: StageOutcome,
		started: Instant,
		status: Option<u16>,
	) {
		let event = StageEvent {
			stage,
			descriptor: &ctx.descriptor,
			outcome,
			latency: started.elapsed(),
			status,
		};

		for observer in self.observers.iter() {
			observer.on_event(&event);
		}
	}
}
impl Debug for Pipeline {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Pipeline")
			.field("auth", &self.auth)
			.field("rate_limiter", &self.rate_limiter)
			.field("cache", &self.cache)
			.field("middleware", &self.middleware.iter().map(|m| m.name()).collect::<Vec<_>>())
			.field("observers", &self.observers.len())
			.field("timeout", &self.timeout)
			.finish()
	}
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
	transport: Arc<dyn Transport>,
	auth: Option<AuthEngine>,
	rate_limiter: Option<RateLimiter>,
	cache: Option<ResponseCache>,
	middleware: Vec<Arc<dyn Middleware>>,
	observers: Vec<Arc<dyn Observer>>,
	timeout: Option<StdDuration>,
}
impl PipelineBuilder {
	/// Uses `auth` for credential injection. Defaults to pass-through.
	pub fn with_auth(mut self, auth: AuthEngine) -> Self {
		self.auth = Some(auth);

		self
	}

	/// Uses `rate_limiter` for admission. Defaults to unlimited.
	pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
		self.rate_limiter = Some(rate_limiter);

		self
	}

	/// Uses `cache` for responses. Defaults to disabled.
	pub fn with_cache(mut self, cache: ResponseCache) -> Self {
		self.cache = Some(cache);

		self
	}

	/// Appends a middleware stage.
	pub fn with_middleware(mut self, middleware: impl Middleware + 'static) -> Self {
		self.middleware.push(Arc::new(middleware));

		self
	}

	/// Appends an observer. A [`TracingObserver`] is always registered first, followed by
	/// the metrics observer when the `metrics` feature is on.
	pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
		self.observers.push(observer);

		self
	}

	/// Bounds each transport call; `None` waits indefinitely. Defaults to 30 seconds.
	pub fn with_timeout(mut self, timeout: Option<StdDuration>) -> Self {
		self.timeout = timeout;

		self
	}

	/// Finishes the pipeline.
	pub fn build(self) -> Pipeline {
		Pipeline {
			auth: Arc::new(self.auth.unwrap_or_else(AuthEngine::passthrough)),
			rate_limiter: Arc::new(self.rate_limiter.unwrap_or_default()),
			cache: Arc::new(self.cache.unwrap_or_else(ResponseCache::disabled)),
			transport: self.transport,
			middleware: self.middleware.into(),
			observers: self.observers.into(),
			timeout: self.timeout,
		}
	}
}

fn default_observers() -> Vec<Arc<dyn Observer>> {
	#[cfg(feature = "metrics")]
	{
		vec![Arc::new(TracingObserver), Arc::new(crate::obs::MetricsObserver)]
	}
	#[cfg(not(feature = "metrics"))]
	{
		vec![Arc::new(TracingObserver)]
	}
}

/// Wire form of a cached response.
#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
	status: u16,
	headers: BTreeMap<String, String>,
	#[serde(with = "cache::base64_bytes")]
	body: Vec<u8>,
}
impl CachedResponse {
	fn encode(response: &ResponseDescriptor) -> Result<Vec<u8>, serde_json::Error> {
		serde_json::to_vec(&Self {
			status: response.status,
			headers: response.headers.clone(),
			body: response.body.clone(),
		})
	}

	fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
		serde_json::from_slice(bytes)
	}

	fn into_response(self) -> ResponseDescriptor {
		let mut response = ResponseDescriptor::new(self.status, self.body);

		response.headers = self.headers;
		response.served_from_cache = true;

		response
	}
}
