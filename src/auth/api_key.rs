//! Static credentials: API keys and HTTP Basic.

// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
// self
use crate::{
	_prelude::*,
	auth::{
		Secret,
		credential::{ApiKeyCredential, ApiKeyLocation, BasicCredential, required, required_secret},
	},
	descriptor::RequestDescriptor,
	error::ConfigError,
};

const DEFAULT_HEADER: &str = "X-API-Key";
const DEFAULT_QUERY_PARAM: &str = "api_key";

/// API key injected into a header or the query string.
#[derive(Clone, Debug)]
pub struct ApiKeyAuth {
	key: Secret,
	location: ApiKeyLocation,
	name: String,
}
impl ApiKeyAuth {
	/// Validates the configured fields.
	pub fn from_credential(fields: &ApiKeyCredential) -> Result<Self, ConfigError> {
		let key = required_secret(&fields.api_key, "api_key", "api_key")?.clone();
		let name = match fields.api_key_location {
			ApiKeyLocation::Header => fields.api_key_header.as_deref().unwrap_or(DEFAULT_HEADER),
			ApiKeyLocation::Query => fields.query_param.as_deref().unwrap_or(DEFAULT_QUERY_PARAM),
		};

		if name.is_empty() || name.chars().any(char::is_whitespace) {
			return Err(ConfigError::invalid("api_key_header", "must be a single token"));
		}

		Ok(Self { key, location: fields.api_key_location, name: name.to_owned() })
	}

	/// Adds the key to `descriptor`.
	pub fn apply(&self, descriptor: &mut RequestDescriptor) {
		match self.location {
			ApiKeyLocation::Header => descriptor.set_header(&self.name, self.key.expose()),
			ApiKeyLocation::Query => descriptor.append_query(&self.name, self.key.expose()),
		}
	}
}

/// HTTP Basic credentials, pre-encoded at construction.
#[derive(Clone, Debug)]
pub struct BasicAuth {
	header_value: Secret,
}
impl BasicAuth {
	/// Validates the configured fields.
	pub fn from_credential(fields: &BasicCredential) -> Result<Self, ConfigError> {
		let username = required(&fields.username, "basic", "username")?;
		let password = required_secret(&fields.password, "basic", "password")?;
		let encoded = STANDARD.encode(format!("{username}:{}", password.expose()));

		Ok(Self { header_value: Secret::new(format!("Basic {encoded}")) })
	}

	/// Sets the `Authorization` header.
	pub fn apply(&self, descriptor: &mut RequestDescriptor) {
		descriptor.set_header("authorization", self.header_value.expose());
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::request;
	use crate::descriptor::Method;

	#[test]
	fn header_key_uses_default_name() {
		let auth = ApiKeyAuth::from_credential(&ApiKeyCredential {
			api_key: Some(Secret::new("k-123")),
			..Default::default()
		})
		.expect("API key credential should validate.");
		let mut descriptor = request("pets.list", Method::Get, "https://api.example.com/pets");

		auth.apply(&mut descriptor);

		assert_eq!(descriptor.header("x-api-key"), Some("k-123"));
	}

	#[test]
	fn query_key_is_appended() {
		let auth = ApiKeyAuth::from_credential(&ApiKeyCredential {
			api_key: Some(Secret::new("k 1")),
			api_key_location: ApiKeyLocation::Query,
			query_param: Some("key".into()),
			..Default::default()
		})
		.expect("API key credential should validate.");
		let mut descriptor =
			request("pets.list", Method::Get, "https://api.example.com/pets?limit=5");

		auth.apply(&mut descriptor);

		assert_eq!(descriptor.url.query(), Some("limit=5&key=k+1"));
		assert!(descriptor.headers.is_empty());
	}

	#[test]
	fn missing_key_names_the_field() {
		let err = ApiKeyAuth::from_credential(&ApiKeyCredential::default())
			.expect_err("A missing key should be rejected.");

		assert!(matches!(err, ConfigError::MissingField { scheme: "api_key", field: "api_key" }));
	}

	#[test]
	fn basic_header_is_base64() {
		let auth = BasicAuth::from_credential(&BasicCredential {
			username: Some("aladdin".into()),
			password: Some(Secret::new("opensesame")),
		})
		.expect("Basic credential should validate.");
		let mut descriptor = request("me", Method::Get, "https://api.example.com/me");

		auth.apply(&mut descriptor);

		assert_eq!(descriptor.header("authorization"), Some("Basic YWxhZGRpbjpvcGVuc2VzYW1l"));
	}
}
