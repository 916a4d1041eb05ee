//! Credential configuration as it appears under `auth` in the pipeline config.
//!
//! Every scheme keeps its fields optional so a missing secret is reported as
//! [`ConfigError::MissingField`] naming the scheme and field, instead of a generic serde
//! error.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, Secret},
	error::ConfigError,
	oauth::ClientAuthStyle,
};

/// One configured credential, tagged by `type`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credential {
	/// Static API key in a header or query parameter.
	#[serde(rename = "api_key")]
	ApiKey(ApiKeyCredential),
	/// HTTP Basic username and password.
	#[serde(rename = "basic")]
	Basic(BasicCredential),
	/// OAuth 2.0 client credentials (or a static bearer token).
	#[serde(rename = "oauth2")]
	OAuth2(OAuth2Credential),
	/// OAuth 2.0 authorization code with PKCE.
	#[serde(rename = "oauth2_pkce")]
	OAuth2Pkce(PkceCredential),
	/// Self-issued JWT bearer token.
	#[serde(rename = "jwt")]
	Jwt(JwtCredential),
	/// AWS Signature Version 4.
	#[serde(rename = "aws_sig")]
	AwsSignature(AwsCredential),
	/// Azure AD client credentials.
	#[serde(rename = "azure_ad")]
	AzureAd(AzureAdCredential),
}
impl Credential {
	/// Scheme label used in errors and logs.
	pub const fn scheme(&self) -> &'static str {
		match self {
			Credential::ApiKey(_) => "api_key",
			Credential::Basic(_) => "basic",
			Credential::OAuth2(_) => "oauth2",
			Credential::OAuth2Pkce(_) => "oauth2_pkce",
			Credential::Jwt(_) => "jwt",
			Credential::AwsSignature(_) => "aws_sig",
			Credential::AzureAd(_) => "azure_ad",
		}
	}
}

/// Where an API key is placed on the request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyLocation {
	/// Request header (default `X-API-Key`).
	#[default]
	Header,
	/// Query-string parameter.
	Query,
}

/// Fields for [`Credential::ApiKey`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyCredential {
	/// Key value.
	pub api_key: Option<Secret>,
	/// Header name when injecting into headers.
	pub api_key_header: Option<String>,
	/// Placement of the key.
	pub api_key_location: ApiKeyLocation,
	/// Query parameter name when injecting into the URL.
	pub query_param: Option<String>,
}

/// Fields for [`Credential::Basic`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicCredential {
	/// Account name.
	pub username: Option<String>,
	/// Account password.
	pub password: Option<Secret>,
}

/// Fields for [`Credential::OAuth2`].
///
/// A `token` without a `token_url` is sent as a static bearer token.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Credential {
	/// Token endpoint.
	pub token_url: Option<String>,
	/// Client identifier.
	pub client_id: Option<String>,
	/// Client secret.
	pub client_secret: Option<Secret>,
	/// Space-delimited scopes.
	pub scope: Option<ScopeSet>,
	/// Client authentication placement.
	pub auth_style: ClientAuthStyle,
	/// Pre-issued bearer token.
	pub token: Option<Secret>,
}

/// Fields for [`Credential::OAuth2Pkce`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PkceCredential {
	/// Client identifier.
	pub client_id: Option<String>,
	/// Authorization endpoint the user is sent to.
	pub authorization_url: Option<String>,
	/// Token endpoint.
	pub token_url: Option<String>,
	/// Redirect URI registered for the client.
	pub redirect_uri: Option<String>,
	/// Space-delimited scopes.
	pub scope: Option<ScopeSet>,
	/// Optional secret for confidential clients.
	pub client_secret: Option<Secret>,
}

/// Fields for [`Credential::Jwt`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtCredential {
	/// Shared secret for HS* algorithms.
	pub secret: Option<Secret>,
	/// PEM-encoded private key for RS*/ES* algorithms.
	pub private_key: Option<Secret>,
	/// PEM-encoded public key used by verification for RS*/ES* algorithms.
	pub public_key: Option<String>,
	/// Algorithm name (`HS256`, `RS256`, ...).
	pub algorithm: String,
	/// Token lifetime in seconds.
	pub expires_in: u64,
	/// `iss` claim.
	pub issuer: Option<String>,
	/// `aud` claim.
	pub audience: Option<String>,
	/// Extra claims merged into every token.
	pub claims: serde_json::Map<String, serde_json::Value>,
}
impl Default for JwtCredential {
	fn default() -> Self {
		Self {
			secret: None,
			private_key: None,
			public_key: None,
			algorithm: "HS256".into(),
			expires_in: 3_600,
			issuer: None,
			audience: None,
			claims: serde_json::Map::new(),
		}
	}
}

/// Fields for [`Credential::AwsSignature`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsCredential {
	/// Access key id.
	pub access_key: Option<String>,
	/// Secret access key.
	pub secret_key: Option<Secret>,
	/// Session token for temporary credentials.
	pub session_token: Option<Secret>,
	/// Region (`us-east-1`).
	pub region: Option<String>,
	/// Service (`s3`, `execute-api`).
	pub service: Option<String>,
}

/// Fields for [`Credential::AzureAd`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureAdCredential {
	/// Application (client) id.
	pub client_id: Option<String>,
	/// Client secret.
	pub client_secret: Option<Secret>,
	/// Directory (tenant) id.
	pub tenant_id: Option<String>,
	/// Requested scope; defaults to Microsoft Graph.
	pub scope: Option<ScopeSet>,
	/// Token endpoint override.
	pub token_endpoint: Option<String>,
}

pub(crate) fn required<'a, T>(
	value: &'a Option<T>,
	scheme: &'static str,
	field: &'static str,
) -> Result<&'a T, ConfigError> {
	value.as_ref().ok_or(ConfigError::MissingField { scheme, field })
}

pub(crate) fn required_secret<'a>(
	value: &'a Option<Secret>,
	scheme: &'static str,
	field: &'static str,
) -> Result<&'a Secret, ConfigError> {
	value
		.as_ref()
		.filter(|secret| !secret.is_empty())
		.ok_or(ConfigError::MissingField { scheme, field })
}

pub(crate) fn required_url(
	value: &Option<String>,
	scheme: &'static str,
	field: &'static str,
) -> Result<Url, ConfigError> {
	parse_url(required(value, scheme, field)?, field)
}

pub(crate) fn parse_url(raw: &str, field: &'static str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { field, source })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn deserializes_by_type_tag() {
		let credential: Credential = serde_json::from_str(
			r#"{"type":"api_key","api_key":"k-1","api_key_location":"query","query_param":"key"}"#,
		)
		.expect("API key credential should deserialize.");
		let Credential::ApiKey(fields) = &credential else {
			panic!("Expected an api_key credential, got {credential:?}.");
		};

		assert_eq!(credential.scheme(), "api_key");
		assert_eq!(fields.api_key_location, ApiKeyLocation::Query);
		assert!(!format!("{credential:?}").contains("k-1"));
	}

	#[test]
	fn unknown_type_is_rejected() {
		assert!(serde_json::from_str::<Credential>(r#"{"type":"kerberos"}"#).is_err());
	}

	#[test]
	fn jwt_defaults_apply() {
		let credential: Credential = serde_json::from_str(r#"{"type":"jwt","secret":"s"}"#)
			.expect("JWT credential should deserialize.");
		let Credential::Jwt(fields) = credential else {
			panic!("Expected a jwt credential.");
		};

		assert_eq!(fields.algorithm, "HS256");
		assert_eq!(fields.expires_in, 3_600);
	}

	#[test]
	fn empty_secret_counts_as_missing() {
		let err = required_secret(&Some(Secret::new("")), "basic", "password")
			.expect_err("Empty secrets should be rejected.");

		assert!(matches!(err, ConfigError::MissingField { scheme: "basic", field: "password" }));
	}
}
