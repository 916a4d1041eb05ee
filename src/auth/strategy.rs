//! Tag-dispatched auth strategy built from a [`Credential`].

// self
use crate::{
	_prelude::*,
	auth::{
		ApiKeyAuth, AwsSigner, BasicAuth, ClientCredentialsAuth, Credential, JwtAuth, PkceAuth,
		TokenState,
	},
	descriptor::RequestDescriptor,
	error::{AuthError, ConfigError},
	id::CredentialId,
	oauth::{self, ExchangeFuture, TokenExchange},
};

/// One credential's runtime behavior.
#[derive(Debug)]
pub enum AuthStrategy {
	/// API key header or query parameter.
	ApiKey(ApiKeyAuth),
	/// HTTP Basic.
	Basic(BasicAuth),
	/// OAuth 2.0 client credentials.
	OAuth2(ClientCredentialsAuth),
	/// OAuth 2.0 authorization code + PKCE.
	OAuth2Pkce(PkceAuth),
	/// Self-issued JWT.
	Jwt(JwtAuth),
	/// AWS SigV4.
	AwsSignature(AwsSigner),
	/// Azure AD client credentials.
	AzureAd(ClientCredentialsAuth),
}
impl AuthStrategy {
	/// Validates `credential` and builds its strategy.
	pub fn from_credential(credential: &Credential) -> Result<Self, ConfigError> {
		Ok(match credential {
			Credential::ApiKey(fields) => Self::ApiKey(ApiKeyAuth::from_credential(fields)?),
			Credential::Basic(fields) => Self::Basic(BasicAuth::from_credential(fields)?),
			Credential::OAuth2(fields) => Self::OAuth2(ClientCredentialsAuth::from_oauth2(fields)?),
			Credential::OAuth2Pkce(fields) => Self::OAuth2Pkce(PkceAuth::from_credential(fields)?),
			Credential::Jwt(fields) => Self::Jwt(JwtAuth::from_credential(fields)?),
			Credential::AwsSignature(fields) =>
				Self::AwsSignature(AwsSigner::from_credential(fields)?),
			Credential::AzureAd(fields) =>
				Self::AzureAd(ClientCredentialsAuth::from_azure(fields)?),
		})
	}

	/// Scheme label.
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::ApiKey(_) => "api_key",
			Self::Basic(_) => "basic",
			Self::OAuth2(_) => "oauth2",
			Self::OAuth2Pkce(_) => "oauth2_pkce",
			Self::Jwt(_) => "jwt",
			Self::AwsSignature(_) => "aws_sig",
			Self::AzureAd(_) => "azure_ad",
		}
	}

	/// Returns `true` for strategies that keep a [`TokenState`].
	pub const fn uses_tokens(&self) -> bool {
		matches!(self, Self::OAuth2(_) | Self::OAuth2Pkce(_) | Self::AzureAd(_))
	}

	/// Returns `true` when `token` cannot be used as of `now`. Tokenless strategies never
	/// expire.
	pub fn is_expired(
		&self,
		token: Option<&TokenState>,
		now: OffsetDateTime,
		skew: Duration,
	) -> bool {
		self.uses_tokens() && token.is_none_or(|token| token.is_expired_at(now, skew))
	}

	/// Applies the credential to `descriptor`.
	pub fn authorize(
		&self,
		credential: &CredentialId,
		descriptor: &mut RequestDescriptor,
		token: Option<&TokenState>,
		now: OffsetDateTime,
	) -> Result<(), AuthError> {
		match self {
			Self::ApiKey(auth) => auth.apply(descriptor),
			Self::Basic(auth) => auth.apply(descriptor),
			Self::Jwt(auth) => auth.apply_at(descriptor, now)?,
			Self::AwsSignature(signer) => signer.sign_at(descriptor, now)?,
			Self::OAuth2(_) | Self::OAuth2Pkce(_) | Self::AzureAd(_) => {
				let token = token.ok_or_else(|| AuthError::AuthorizationRequired {
					credential: credential.to_string(),
				})?;

				descriptor
					.set_header("authorization", format!("Bearer {}", token.access_token.expose()));
			},
		}

		Ok(())
	}

	/// Obtains a replacement token. Only token strategies support this.
	pub fn refresh<'a>(
		&'a self,
		credential: &'a CredentialId,
		exchange: &'a dyn TokenExchange,
		current: Option<&'a TokenState>,
	) -> ExchangeFuture<'a> {
		match self {
			Self::OAuth2(auth) | Self::AzureAd(auth) => auth.fetch(exchange, current),
			Self::OAuth2Pkce(auth) => match current.and_then(|token| token.refresh_token.as_ref()) {
				Some(refresh) if !refresh.is_empty() => exchange.refresh(auth.endpoint(), refresh),
				_ => oauth::ready(Err(AuthError::AuthorizationRequired {
					credential: credential.to_string(),
				})),
			},
			_ => oauth::ready(Err(AuthError::TokenResponse {
				reason: format!("{} credentials have no token lifecycle", self.kind()),
			})),
		}
	}
}
