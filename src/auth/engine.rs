//! Credential resolution, token lifecycle, and single-flight refresh.
//!
//! The engine owns every [`TokenState`]. A request whose token is missing or within the refresh
//! skew of expiry takes the credential's flow guard; the first holder talks to the token
//! endpoint while later holders find the refreshed token and reuse it. Guards are plain
//! async mutex guards, so a cancelled caller releases the credential on drop.

// std
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
// crates.io
use glob::Pattern;
// self
use crate::{
	_prelude::*,
	auth::{AuthStrategy, Credential, PkcePhase, RefreshMetrics, Secret, TokenState},
	descriptor::RequestDescriptor,
	error::{AuthError, ConfigError},
	id::CredentialId,
	oauth::{self, ExchangeFuture, TokenEndpoint, TokenExchange},
	obs::Stage,
	store::{MemoryStore, StoreError, TokenStore},
};

/// Token lifecycle tunables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AuthSettings {
	/// Tokens are refreshed once `now >= expires_at - refresh_skew`.
	pub refresh_skew: Duration,
	/// Consecutive refresh failures after which a credential is invalidated.
	pub max_refresh_failures: u32,
	/// Upper bound for one token-endpoint call.
	pub timeout: Option<StdDuration>,
}
impl Default for AuthSettings {
	fn default() -> Self {
		Self {
			refresh_skew: Duration::seconds(30),
			max_refresh_failures: 3,
			timeout: Some(StdDuration::from_secs(30)),
		}
	}
}

struct CredentialSlot {
	strategy: AuthStrategy,
	token: RwLock<Option<TokenState>>,
	hydrated: AtomicBool,
	failures: AtomicU32,
}
impl CredentialSlot {
	fn new(strategy: AuthStrategy) -> Self {
		Self {
			strategy,
			token: RwLock::new(None),
			hydrated: AtomicBool::new(false),
			failures: AtomicU32::new(0),
		}
	}

	fn transition(&self, phase: PkcePhase) {
		if let AuthStrategy::OAuth2Pkce(auth) = &self.strategy {
			auth.transition(phase);
		}
	}
}

/// Resolves and applies credentials for outbound requests.
pub struct AuthEngine {
	slots: HashMap<CredentialId, CredentialSlot>,
	default: Option<CredentialId>,
	bindings: Vec<(Pattern, CredentialId)>,
	store: Arc<dyn TokenStore>,
	exchange: Arc<dyn TokenExchange>,
	settings: AuthSettings,
	flow_guards: Mutex<HashMap<CredentialId, Arc<AsyncMutex<()>>>>,
	refresh_metrics: RefreshMetrics,
}
impl AuthEngine {
	/// Starts a builder that obtains tokens through `exchange`.
	pub fn builder(exchange: Arc<dyn TokenExchange>) -> AuthEngineBuilder {
		AuthEngineBuilder {
			exchange,
			credentials: Vec::new(),
			default: None,
			bindings: Vec::new(),
			store: None,
			settings: AuthSettings::default(),
		}
	}

	/// Engine without credentials; every request passes through unchanged.
	pub fn passthrough() -> Self {
		Self {
			slots: HashMap::new(),
			default: None,
			bindings: Vec::new(),
			store: Arc::new(MemoryStore::default()),
			exchange: Arc::new(NoExchange),
			settings: AuthSettings::default(),
			flow_guards: Mutex::new(HashMap::new()),
			refresh_metrics: RefreshMetrics::default(),
		}
	}

	/// Returns `true` when no credential is registered.
	pub fn is_empty(&self) -> bool {
		self.slots.is_empty()
	}

	/// Active settings.
	pub fn settings(&self) -> &AuthSettings {
		&self.settings
	}

	/// Refresh counters.
	pub fn refresh_metrics(&self) -> &RefreshMetrics {
		&self.refresh_metrics
	}

	/// Strategy registered under `id`.
	pub fn strategy(&self, id: &CredentialId) -> Option<&AuthStrategy> {
		self.slots.get(id).map(|slot| &slot.strategy)
	}

	/// Snapshot of the token held for `id`.
	pub fn token_state(&self, id: &CredentialId) -> Option<TokenState> {
		self.slots.get(id).and_then(|slot| slot.token.read().clone())
	}

	/// Returns `true` once `id` exhausted its refresh failure budget.
	pub fn is_invalidated(&self, id: &CredentialId) -> bool {
		self.slots.get(id).is_some_and(|slot| self.exhausted(slot))
	}

	/// Phase of a PKCE credential.
	pub fn pkce_phase(&self, id: &CredentialId) -> Option<PkcePhase> {
		match self.strategy(id)? {
			AuthStrategy::OAuth2Pkce(auth) => Some(auth.phase()),
			_ => None,
		}
	}

	/// Credential that applies to `descriptor`: the first binding whose pattern matches the
	/// endpoint id or URL path, else the default.
	pub fn credential_for(&self, descriptor: &RequestDescriptor) -> Option<&CredentialId> {
		self.bindings
			.iter()
			.find(|(pattern, _)| {
				pattern.matches(&descriptor.endpoint_id) || pattern.matches(descriptor.url.path())
			})
			.map(|(_, id)| id)
			.or(self.default.as_ref())
	}

	/// Injects the applicable credential. Requests with no applicable credential pass through
	/// unchanged. Network traffic only happens when a token must be refreshed.
	pub async fn authorize(&self, descriptor: RequestDescriptor) -> Result<RequestDescriptor> {
		let Some(id) = self.credential_for(&descriptor).cloned() else {
			return Ok(descriptor);
		};

		self.authorize_with(&id, descriptor).await
	}

	/// Injects the credential registered under `id`.
	pub async fn authorize_with(
		&self,
		id: &CredentialId,
		mut descriptor: RequestDescriptor,
	) -> Result<RequestDescriptor> {
		let slot = self.slot(id)?;

		self.ensure_usable(id, slot)?;

		if !slot.strategy.uses_tokens() {
			slot.strategy.authorize(id, &mut descriptor, None, OffsetDateTime::now_utc())?;

			return Ok(descriptor);
		}

		let token = match self.fresh_token(slot, OffsetDateTime::now_utc()) {
			Some(token) => token,
			None => self.refresh_token(id, slot).await?,
		};

		slot.strategy.authorize(id, &mut descriptor, Some(&token), OffsetDateTime::now_utc())?;

		Ok(descriptor)
	}

	/// Starts (or restarts) interactive authorization for a PKCE credential.
	pub fn authorization_url(&self, id: &CredentialId) -> Result<Url> {
		match &self.slot(id)?.strategy {
			AuthStrategy::OAuth2Pkce(auth) => Ok(auth.issue_authorization_url()),
			other => Err(not_pkce(id, other).into()),
		}
	}

	/// Exchanges the code returned to the redirect URI for tokens, activating the credential.
	pub async fn complete_authorization(
		&self,
		id: &CredentialId,
		code: &str,
		returned_state: &str,
	) -> Result<TokenState> {
		let slot = self.slot(id)?;
		let AuthStrategy::OAuth2Pkce(auth) = &slot.strategy else {
			return Err(not_pkce(id, &slot.strategy).into());
		};
		let guard = self.flow_guard(id);
		let _singleflight = guard.lock().await;
		let verifier = auth.begin_exchange(id, returned_state)?;
		let exchange =
			self.exchange.authorization_code(auth.endpoint(), code, &verifier, auth.redirect_uri());
		let token = self.bounded(exchange).await.inspect_err(|err| {
			tracing::warn!(credential = %id, error = %err, "authorization code exchange failed");
		})?;

		auth.transition(PkcePhase::TokenExchanged);
		slot.hydrated.store(true, Ordering::Release);
		self.install(id, slot, token.clone()).await;

		Ok(token)
	}

	/// Forgets the token and failure count for `id`, including any persisted copy.
	pub async fn reset(&self, id: &CredentialId) -> Result<()> {
		let slot = self.slot(id)?;
		let guard = self.flow_guard(id);
		let _singleflight = guard.lock().await;

		*slot.token.write() = None;
		slot.failures.store(0, Ordering::Release);
		slot.hydrated.store(true, Ordering::Release);
		slot.transition(PkcePhase::Init);

		if let Err(err) = self.store.remove(id).await {
			tracing::warn!(credential = %id, error = %err, "failed to remove persisted token");
		}

		Ok(())
	}

	/// Writes every in-memory token to the token store.
	pub async fn persist(&self) -> Result<(), StoreError> {
		for (id, slot) in &self.slots {
			let token = slot.token.read().clone();

			if let Some(token) = token {
				self.store.save(id, token).await?;
			}
		}

		Ok(())
	}

	fn slot(&self, id: &CredentialId) -> Result<&CredentialSlot> {
		self.slots
			.get(id)
			.ok_or_else(|| ConfigError::UnknownCredential { credential: id.to_string() }.into())
	}

	fn exhausted(&self, slot: &CredentialSlot) -> bool {
		slot.failures.load(Ordering::Acquire) >= self.settings.max_refresh_failures
	}

	fn ensure_usable(&self, id: &CredentialId, slot: &CredentialSlot) -> Result<(), AuthError> {
		if self.exhausted(slot) {
			return Err(AuthError::CredentialInvalidated {
				credential: id.to_string(),
				failures: slot.failures.load(Ordering::Acquire),
			});
		}

		Ok(())
	}

	fn fresh_token(&self, slot: &CredentialSlot, now: OffsetDateTime) -> Option<TokenState> {
		let guard = slot.token.read();

		guard
			.as_ref()
			.filter(|token| {
				!slot.strategy.is_expired(Some(*token), now, self.settings.refresh_skew)
			})
			.cloned()
	}

	async fn refresh_token(&self, id: &CredentialId, slot: &CredentialSlot) -> Result<TokenState> {
		let guard = self.flow_guard(id);
		let _singleflight = guard.lock().await;

		self.hydrate(id, slot).await;

		if let Some(token) = self.fresh_token(slot, OffsetDateTime::now_utc()) {
			self.refresh_metrics.record_reuse();

			return Ok(token);
		}

		self.ensure_usable(id, slot)?;

		let current = slot.token.read().clone();

		tracing::debug!(credential = %id, kind = slot.strategy.kind(), "refreshing token");

		if !matches!(slot.strategy, AuthStrategy::OAuth2Pkce(_))
			|| current.as_ref().is_some_and(TokenState::can_refresh)
		{
			self.refresh_metrics.record_attempt();
		}

		match self.run_refresh(id, slot, current.as_ref()).await {
			Ok(token) => {
				self.refresh_metrics.record_success();
				self.install(id, slot, token.clone()).await;

				Ok(token)
			},
			Err(err) => {
				self.record_refresh_failure(id, slot, &err);

				Err(err)
			},
		}
	}

	async fn run_refresh(
		&self,
		id: &CredentialId,
		slot: &CredentialSlot,
		current: Option<&TokenState>,
	) -> Result<TokenState> {
		let token = self.bounded(slot.strategy.refresh(id, self.exchange.as_ref(), current)).await?;

		if let (Some(previous), Some(next)) =
			(current.and_then(|token| token.expires_at), token.expires_at)
		{
			if next < previous {
				return Err(AuthError::TokenResponse {
					reason: "refreshed token expires before the token it replaces".into(),
				}
				.into());
			}
		}

		Ok(token)
	}

	async fn bounded<F>(&self, fut: F) -> Result<TokenState>
	where
		F: Future<Output = Result<TokenState, AuthError>>,
	{
		match self.settings.timeout {
			Some(after) => Ok(tokio::time::timeout(after, fut)
				.await
				.map_err(|_| Error::Timeout { stage: Stage::Auth, after })??),
			None => Ok(fut.await?),
		}
	}

	async fn hydrate(&self, id: &CredentialId, slot: &CredentialSlot) {
		if slot.hydrated.swap(true, Ordering::AcqRel) {
			return;
		}

		match self.store.fetch(id).await {
			Ok(Some(token)) => {
				let mut current = slot.token.write();

				if current.is_none() {
					*current = Some(token);

					slot.transition(PkcePhase::Active);
				}
			},
			Ok(None) => (),
			Err(err) => {
				tracing::warn!(credential = %id, error = %err, "failed to load persisted token")
			},
		}
	}

	async fn install(&self, id: &CredentialId, slot: &CredentialSlot, token: TokenState) {
		*slot.token.write() = Some(token.clone());
		slot.failures.store(0, Ordering::Release);
		slot.transition(PkcePhase::Active);

		if let Err(err) = self.store.save(id, token).await {
			tracing::warn!(credential = %id, error = %err, "failed to persist refreshed token");
		}
	}

	fn record_refresh_failure(&self, id: &CredentialId, slot: &CredentialSlot, err: &Error) {
		if matches!(err, Error::Auth(AuthError::AuthorizationRequired { .. })) {
			slot.transition(PkcePhase::Expired);

			return;
		}

		self.refresh_metrics.record_failure();

		let failures = slot.failures.fetch_add(1, Ordering::AcqRel) + 1;

		if matches!(err, Error::Auth(AuthError::InvalidGrant { .. })) {
			slot.transition(PkcePhase::Expired);
		}
		if failures >= self.settings.max_refresh_failures {
			tracing::error!(credential = %id, failures, error = %err, "credential invalidated");
		} else {
			tracing::warn!(credential = %id, failures, error = %err, "token refresh failed");
		}
	}

	/// Returns (and creates on demand) the single-flight guard for a credential.
	fn flow_guard(&self, id: &CredentialId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.flow_guards.lock();

		guards.entry(id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
impl Debug for AuthEngine {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthEngine")
			.field("credentials", &self.slots.keys().collect::<BTreeSet<_>>())
			.field("default", &self.default)
			.field("bindings", &self.bindings.len())
			.field("settings", &self.settings)
			.finish()
	}
}

/// Builder for [`AuthEngine`].
pub struct AuthEngineBuilder {
	exchange: Arc<dyn TokenExchange>,
	credentials: Vec<(CredentialId, Credential)>,
	default: Option<CredentialId>,
	bindings: Vec<(String, CredentialId)>,
	store: Option<Arc<dyn TokenStore>>,
	settings: AuthSettings,
}
impl AuthEngineBuilder {
	/// Registers a credential.
	pub fn with_credential(mut self, id: CredentialId, credential: Credential) -> Self {
		self.credentials.push((id, credential));

		self
	}

	/// Selects the credential used when no binding matches. Defaults to the only credential,
	/// or the one named `default`.
	pub fn with_default(mut self, id: CredentialId) -> Self {
		self.default = Some(id);

		self
	}

	/// Routes endpoints whose id or path matches `pattern` to credential `id`.
	pub fn with_binding(mut self, pattern: impl Into<String>, id: CredentialId) -> Self {
		self.bindings.push((pattern.into(), id));

		self
	}

	/// Persists tokens through `store` instead of process memory.
	pub fn with_store(mut self, store: Arc<dyn TokenStore>) -> Self {
		self.store = Some(store);

		self
	}

	/// Overrides lifecycle tunables.
	pub fn with_settings(mut self, settings: AuthSettings) -> Self {
		self.settings = settings;

		self
	}

	/// Validates every credential and binding.
	pub fn build(self) -> Result<AuthEngine, ConfigError> {
		if self.settings.max_refresh_failures == 0 {
			return Err(ConfigError::invalid("max_refresh_failures", "must be at least 1"));
		}
		if self.settings.refresh_skew.is_negative() {
			return Err(ConfigError::invalid("refresh_skew", "must not be negative"));
		}

		let mut slots = HashMap::with_capacity(self.credentials.len());

		for (id, credential) in &self.credentials {
			let strategy = AuthStrategy::from_credential(credential)?;

			if slots.insert(id.clone(), CredentialSlot::new(strategy)).is_some() {
				return Err(ConfigError::invalid(
					"credentials",
					format!("credential `{id}` is declared twice"),
				));
			}
		}

		let known = |id: &CredentialId| {
			if slots.contains_key(id) {
				Ok(())
			} else {
				Err(ConfigError::UnknownCredential { credential: id.to_string() })
			}
		};
		let default = match self.default {
			Some(id) => {
				known(&id)?;

				Some(id)
			},
			None if slots.len() == 1 => slots.keys().next().cloned(),
			None => slots.contains_key("default").then(CredentialId::primary),
		};
		let mut bindings = Vec::with_capacity(self.bindings.len());

		for (raw, id) in self.bindings {
			known(&id)?;

			let pattern = Pattern::new(&raw)
				.map_err(|source| ConfigError::InvalidPattern { pattern: raw.clone(), source })?;

			bindings.push((pattern, id));
		}

		Ok(AuthEngine {
			slots,
			default,
			bindings,
			store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::default())),
			exchange: self.exchange,
			settings: self.settings,
			flow_guards: Mutex::new(HashMap::new()),
			refresh_metrics: RefreshMetrics::default(),
		})
	}
}

struct NoExchange;
impl TokenExchange for NoExchange {
	fn client_credentials<'a>(&'a self, _: &'a TokenEndpoint) -> ExchangeFuture<'a> {
		unconfigured()
	}

	fn refresh<'a>(&'a self, _: &'a TokenEndpoint, _: &'a Secret) -> ExchangeFuture<'a> {
		unconfigured()
	}

	fn authorization_code<'a>(
		&'a self,
		_: &'a TokenEndpoint,
		_: &'a str,
		_: &'a str,
		_: &'a Url,
	) -> ExchangeFuture<'a> {
		unconfigured()
	}
}

fn unconfigured<'a>() -> ExchangeFuture<'a> {
	oauth::ready(Err(AuthError::TokenResponse { reason: "no token exchange is configured".into() }))
}

fn not_pkce(id: &CredentialId, strategy: &AuthStrategy) -> ConfigError {
	ConfigError::invalid(
		id.to_string(),
		format!("{} credentials have no authorization flow", strategy.kind()),
	)
}
