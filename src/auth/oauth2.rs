//! Client-credentials style strategies: generic OAuth 2.0 and Azure AD.

// self
use crate::{
	_prelude::*,
	auth::{
		Secret, TokenState,
		credential::{
			AzureAdCredential, OAuth2Credential, parse_url, required, required_secret,
			required_url,
		},
	},
	error::ConfigError,
	oauth::{self, ExchangeFuture, TokenEndpoint, TokenExchange},
};

const AZURE_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Token source for client credentials grants.
#[derive(Clone, Debug)]
pub enum ClientCredentialsAuth {
	/// Pre-issued bearer token that is never refreshed.
	Static(Secret),
	/// Tokens fetched from a token endpoint.
	Endpoint(TokenEndpoint),
}
impl ClientCredentialsAuth {
	/// Validates an `oauth2` credential.
	pub fn from_oauth2(fields: &OAuth2Credential) -> Result<Self, ConfigError> {
		if fields.token_url.is_none() {
			if let Some(token) = fields.token.as_ref().filter(|token| !token.is_empty()) {
				return Ok(Self::Static(token.clone()));
			}
		}

		let token_url = required_url(&fields.token_url, "oauth2", "token_url")?;
		let client_id = required(&fields.client_id, "oauth2", "client_id")?;
		let client_secret = required_secret(&fields.client_secret, "oauth2", "client_secret")?;
		let endpoint = TokenEndpoint::new(token_url, client_id.as_str())
			.with_client_secret(client_secret.clone())
			.with_auth_style(fields.auth_style)
			.with_scope(fields.scope.clone().unwrap_or_default());

		Ok(Self::Endpoint(endpoint))
	}

	/// Validates an `azure_ad` credential, deriving the tenant token endpoint when unset.
	pub fn from_azure(fields: &AzureAdCredential) -> Result<Self, ConfigError> {
		let client_id = required(&fields.client_id, "azure_ad", "client_id")?;
		let client_secret = required_secret(&fields.client_secret, "azure_ad", "client_secret")?;
		let tenant_id = required(&fields.tenant_id, "azure_ad", "tenant_id")?;
		let token_url = match &fields.token_endpoint {
			Some(raw) => parse_url(raw, "token_endpoint")?,
			None => azure_token_endpoint(tenant_id)?,
		};
		let scope = match &fields.scope {
			Some(scope) if !scope.is_empty() => scope.clone(),
			_ => AZURE_DEFAULT_SCOPE.parse()?,
		};
		let endpoint = TokenEndpoint::new(token_url, client_id.as_str())
			.with_client_secret(client_secret.clone())
			.with_scope(scope);

		Ok(Self::Endpoint(endpoint))
	}

	/// Token endpoint, when tokens are fetched dynamically.
	pub fn endpoint(&self) -> Option<&TokenEndpoint> {
		match self {
			Self::Static(_) => None,
			Self::Endpoint(endpoint) => Some(endpoint),
		}
	}

	/// Obtains a new token: `refresh_token` when one is held, `client_credentials` otherwise.
	pub fn fetch<'a>(
		&'a self,
		exchange: &'a dyn TokenExchange,
		current: Option<&'a TokenState>,
	) -> ExchangeFuture<'a> {
		let refresh = current.and_then(|token| token.refresh_token.as_ref());

		match self {
			Self::Static(token) =>
				oauth::ready(Ok(TokenState::new(token.clone(), OffsetDateTime::now_utc(), None))),
			Self::Endpoint(endpoint) => match refresh {
				Some(refresh) if !refresh.is_empty() => exchange.refresh(endpoint, refresh),
				_ => exchange.client_credentials(endpoint),
			},
		}
	}
}

fn azure_token_endpoint(tenant_id: &str) -> Result<Url, ConfigError> {
	if tenant_id.is_empty() || tenant_id.contains(['/', '?', '#']) {
		return Err(ConfigError::invalid("tenant_id", "must be a bare tenant identifier"));
	}

	parse_url(
		&format!("https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token"),
		"tenant_id",
	)
}
