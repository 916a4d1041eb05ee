//! OAuth 2.0 token-endpoint facade built on the `oauth2` crate.
//!
//! [`TokenExchange`] is the seam the auth engine calls for the three grants it needs
//! (client credentials, refresh token, authorization code + PKCE). [`OAuthFacade`] is the
//! production implementation; tests may substitute their own.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthorizationCode, ClientId, ClientSecret, HttpClientError, PkceCodeVerifier,
	RedirectUrl, RefreshToken, RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;
use crate::{
	_prelude::*,
	auth::{ScopeSet, Secret, TokenState},
	error::AuthError,
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
};

/// Boxed future returned by [`TokenExchange`] operations.
pub type ExchangeFuture<'a> =
	Pin<Box<dyn Future<Output = Result<TokenState, AuthError>> + 'a + Send>>;

/// Wraps an already-known outcome in an [`ExchangeFuture`].
pub fn ready<'a>(result: Result<TokenState, AuthError>) -> ExchangeFuture<'a> {
	Box::pin(async move { result })
}

/// How the client authenticates itself to the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthStyle {
	/// HTTP Basic `Authorization` header (`client_secret_basic`).
	#[default]
	Header,
	/// Credentials in the form body (`client_secret_post`).
	Body,
}

/// Everything needed to talk to one token endpoint.
#[derive(Clone, Debug)]
pub struct TokenEndpoint {
	/// Token endpoint URL.
	pub token_url: Url,
	/// OAuth client identifier.
	pub client_id: String,
	/// Client secret; public (PKCE) clients omit it.
	pub client_secret: Option<Secret>,
	/// Client authentication placement.
	pub auth_style: ClientAuthStyle,
	/// Scopes requested with every grant.
	pub scope: ScopeSet,
	/// Additional form parameters (for example `resource` or `audience`).
	pub extra_params: Vec<(String, String)>,
}
impl TokenEndpoint {
	/// Creates an endpoint description with no secret, scopes, or extra parameters.
	pub fn new(token_url: Url, client_id: impl Into<String>) -> Self {
		Self {
			token_url,
			client_id: client_id.into(),
			client_secret: None,
			auth_style: ClientAuthStyle::default(),
			scope: ScopeSet::default(),
			extra_params: Vec::new(),
		}
	}

	/// Sets the client secret.
	pub fn with_client_secret(mut self, secret: impl Into<Secret>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Sets the requested scopes.
	pub fn with_scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}

	/// Sets the client authentication placement.
	pub fn with_auth_style(mut self, style: ClientAuthStyle) -> Self {
		self.auth_style = style;

		self
	}
}

/// Grant operations the auth engine performs against token endpoints.
pub trait TokenExchange
where
	Self: Send + Sync,
{
	/// `grant_type=client_credentials`.
	fn client_credentials<'a>(&'a self, endpoint: &'a TokenEndpoint) -> ExchangeFuture<'a>;

	/// `grant_type=refresh_token`. The returned state keeps `refresh_token` when the endpoint
	/// does not rotate it.
	fn refresh<'a>(
		&'a self,
		endpoint: &'a TokenEndpoint,
		refresh_token: &'a Secret,
	) -> ExchangeFuture<'a>;

	/// `grant_type=authorization_code` with a PKCE verifier.
	fn authorization_code<'a>(
		&'a self,
		endpoint: &'a TokenEndpoint,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a Url,
	) -> ExchangeFuture<'a>;
}

/// Maps HTTP transport failures into [`AuthError`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport.
	fn map_transport_error(
		&self,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> AuthError;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> AuthError {
		match err {
			HttpClientError::Reqwest(inner) if inner.is_timeout() => AuthError::TokenEndpoint {
				message: "request timed out".into(),
				status: meta_status(meta).or_else(|| inner.status().map(|code| code.as_u16())),
				retry_after: meta_retry_after(meta),
			},
			HttpClientError::Reqwest(inner) => AuthError::Unreachable { source: inner },
			HttpClientError::Http(inner) => AuthError::Unreachable { source: Box::new(inner) },
			HttpClientError::Io(inner) => AuthError::Unreachable { source: Box::new(inner) },
			HttpClientError::Other(message) => AuthError::TokenEndpoint {
				message,
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			},
			_ => AuthError::TokenEndpoint {
				message: "unknown HTTP client failure".into(),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			},
		}
	}
}

/// [`TokenExchange`] backed by the `oauth2` crate's `BasicClient`.
pub struct OAuthFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> OAuthFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a facade over the provided HTTP client and error mapper.
	pub fn new(http_client: impl Into<Arc<C>>, error_mapper: impl Into<Arc<M>>) -> Self {
		Self { http_client: http_client.into(), error_mapper: error_mapper.into() }
	}

	fn map_request_error(
		&self,
		meta: Option<ResponseMetadata>,
		err: BasicRequestTokenError<HttpClientError<C::TransportError>>,
	) -> AuthError {
		let meta = meta.as_ref();

		match err {
			RequestTokenError::ServerResponse(response) => map_server_response(response, meta),
			RequestTokenError::Request(error) => self.error_mapper.map_transport_error(meta, error),
			RequestTokenError::Parse(source, _body) =>
				AuthError::TokenResponseParse { source, status: meta_status(meta) },
			RequestTokenError::Other(message) => AuthError::TokenEndpoint {
				message,
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			},
		}
	}
}
#[cfg(feature = "reqwest")]
impl OAuthFacade<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Facade over a reqwest client with the default error mapper.
	pub fn reqwest(client: ReqwestHttpClient) -> Self {
		Self::new(client, ReqwestTransportErrorMapper)
	}
}
impl<C, M> TokenExchange for OAuthFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn client_credentials<'a>(&'a self, endpoint: &'a TokenEndpoint) -> ExchangeFuture<'a> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let client = basic_client(endpoint);
			let instrumented = self.http_client.with_metadata(meta.clone());
			let mut request = client.exchange_client_credentials();

			for scope in endpoint.scope.iter() {
				request = request.add_scope(Scope::new(scope.to_owned()));
			}
			for (key, value) in &endpoint.extra_params {
				request = request.add_extra_param(key.as_str(), value.as_str());
			}

			let response = request
				.request_async(&instrumented)
				.await
				.map_err(|err| self.map_request_error(meta.take(), err))?;

			token_state_from_response(response, None)
		})
	}

	fn refresh<'a>(
		&'a self,
		endpoint: &'a TokenEndpoint,
		refresh_token: &'a Secret,
	) -> ExchangeFuture<'a> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let client = basic_client(endpoint);
			let instrumented = self.http_client.with_metadata(meta.clone());
			let secret = RefreshToken::new(refresh_token.expose().to_owned());
			let mut request = client.exchange_refresh_token(&secret);

			for scope in endpoint.scope.iter() {
				request = request.add_scope(Scope::new(scope.to_owned()));
			}
			for (key, value) in &endpoint.extra_params {
				request = request.add_extra_param(key.as_str(), value.as_str());
			}

			let response = request
				.request_async(&instrumented)
				.await
				.map_err(|err| self.map_request_error(meta.take(), err))?;

			token_state_from_response(response, Some(refresh_token))
		})
	}

	fn authorization_code<'a>(
		&'a self,
		endpoint: &'a TokenEndpoint,
		code: &'a str,
		pkce_verifier: &'a str,
		redirect_uri: &'a Url,
	) -> ExchangeFuture<'a> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let client = basic_client(endpoint);
			let instrumented = self.http_client.with_metadata(meta.clone());
			let redirect = RedirectUrl::from_url(redirect_uri.clone());
			let mut request = client
				.exchange_code(AuthorizationCode::new(code.to_owned()))
				.set_pkce_verifier(PkceCodeVerifier::new(pkce_verifier.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect));

			for (key, value) in &endpoint.extra_params {
				request = request.add_extra_param(key.as_str(), value.as_str());
			}

			let response = request
				.request_async(&instrumented)
				.await
				.map_err(|err| self.map_request_error(meta.take(), err))?;

			token_state_from_response(response, None)
		})
	}
}

fn basic_client(
	endpoint: &TokenEndpoint,
) -> BasicClient<
	oauth2::EndpointNotSet,
	oauth2::EndpointNotSet,
	oauth2::EndpointNotSet,
	oauth2::EndpointNotSet,
	oauth2::EndpointSet,
> {
	let mut client = BasicClient::new(ClientId::new(endpoint.client_id.clone()))
		.set_token_uri(TokenUrl::from_url(endpoint.token_url.clone()));

	if let Some(secret) = &endpoint.client_secret {
		client = client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));
	}
	if matches!(endpoint.auth_style, ClientAuthStyle::Body) {
		client = client.set_auth_type(AuthType::RequestBody);
	}

	client
}

fn token_state_from_response(
	response: BasicTokenResponse,
	previous_refresh: Option<&Secret>,
) -> Result<TokenState, AuthError> {
	let issued_at = OffsetDateTime::now_utc();
	let out_of_range = || AuthError::TokenResponse { reason: "expires_in is out of range".into() };
	let expires_in = match response.expires_in() {
		Some(lifetime) => {
			let secs = i64::try_from(lifetime.as_secs()).map_err(|_| out_of_range())?;

			if secs <= 0 {
				return Err(AuthError::TokenResponse {
					reason: "expires_in must be positive".into(),
				});
			}

			let lifetime = Duration::seconds(secs);

			issued_at.checked_add(lifetime).ok_or_else(out_of_range)?;

			Some(lifetime)
		},
		None => None,
	};
	let mut state =
		TokenState::new(response.access_token().secret().to_owned(), issued_at, expires_in);

	if let Some(refresh) = response.refresh_token() {
		state = state.with_refresh_token(refresh.secret().to_owned());
	} else if let Some(previous) = previous_refresh {
		state.refresh_token = Some(previous.clone());
	}
	if let Some(scopes) = response.scopes() {
		let granted = ScopeSet::new(scopes.iter().map(|scope| scope.as_ref()))
			.map_err(|e| AuthError::TokenResponse { reason: e.to_string() })?;

		state = state.with_scope(granted);
	}

	Ok(state)
}

/// Buckets used to pick an [`AuthError`] variant for OAuth error responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenErrorKind {
	InvalidGrant,
	InvalidClient,
	InsufficientScope,
	Transient,
}

fn map_server_response(response: BasicErrorResponse, meta: Option<&ResponseMetadata>) -> AuthError {
	let code = response.error().as_ref().to_owned();
	let description = response.error_description().cloned();
	let reason = description.clone().unwrap_or_else(|| code.clone());
	let status = meta_status(meta);

	match classify_token_error(&code, description.as_deref(), status) {
		TokenErrorKind::InvalidGrant => AuthError::InvalidGrant { reason, status },
		TokenErrorKind::InvalidClient => AuthError::InvalidClient { reason, status },
		TokenErrorKind::InsufficientScope => AuthError::InsufficientScope { reason, status },
		TokenErrorKind::Transient => AuthError::TokenEndpoint {
			message: reason,
			status,
			retry_after: meta_retry_after(meta),
		},
	}
}

fn classify_token_error(
	code: &str,
	description: Option<&str>,
	status: Option<u16>,
) -> TokenErrorKind {
	match_exact_value(code)
		.or_else(|| description.and_then(match_exact_value))
		.or_else(|| description.and_then(classify_text))
		.unwrap_or_else(|| classify_status(status))
}

fn match_exact_value(value: &str) -> Option<TokenErrorKind> {
	let value = value.to_ascii_lowercase();

	match value.as_str() {
		"invalid_grant" | "access_denied" => Some(TokenErrorKind::InvalidGrant),
		"invalid_client" | "unauthorized_client" => Some(TokenErrorKind::InvalidClient),
		"invalid_scope" | "insufficient_scope" => Some(TokenErrorKind::InsufficientScope),
		"temporarily_unavailable" | "server_error" => Some(TokenErrorKind::Transient),
		_ => None,
	}
}

fn classify_text(text: &str) -> Option<TokenErrorKind> {
	let lowered = text.to_ascii_lowercase();

	match lowered.as_str() {
		text if text.contains("invalid_grant") => Some(TokenErrorKind::InvalidGrant),
		text if text.contains("invalid_client") => Some(TokenErrorKind::InvalidClient),
		text if text.contains("insufficient_scope") || text.contains("invalid_scope") =>
			Some(TokenErrorKind::InsufficientScope),
		text if text.contains("temporarily_unavailable") || text.contains("retry") =>
			Some(TokenErrorKind::Transient),
		_ => None,
	}
}

fn classify_status(status: Option<u16>) -> TokenErrorKind {
	match status {
		Some(400 | 404 | 410) => TokenErrorKind::InvalidGrant,
		Some(401) => TokenErrorKind::InvalidClient,
		Some(403) => TokenErrorKind::InsufficientScope,
		_ => TokenErrorKind::Transient,
	}
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}
