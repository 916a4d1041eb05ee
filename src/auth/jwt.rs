//! Self-issued JWT bearer tokens.
//!
//! Tokens are minted per request and never cached or refreshed.

// crates.io
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::credential::{JwtCredential, required_secret},
	descriptor::RequestDescriptor,
	error::{AuthError, ConfigError},
};

/// Claims object accepted and returned by [`JwtAuth`].
pub type Claims = Map<String, Value>;

/// Signs short-lived JWTs with a shared secret or PEM key.
#[derive(Clone)]
pub struct JwtAuth {
	algorithm: Algorithm,
	encoding_key: EncodingKey,
	decoding_key: Option<DecodingKey>,
	expires_in: Duration,
	issuer: Option<String>,
	audience: Option<String>,
	claims: Claims,
}
impl JwtAuth {
	/// Loads keys for the configured algorithm.
	pub fn from_credential(fields: &JwtCredential) -> Result<Self, ConfigError> {
		let algorithm = Algorithm::from_str(&fields.algorithm)
			.map_err(|source| ConfigError::InvalidKey { scheme: "jwt", source })?;
		let invalid_key = |source| ConfigError::InvalidKey { scheme: "jwt", source };
		let (encoding_key, decoding_key) = match algorithm {
			Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
				let secret = required_secret(&fields.secret, "jwt", "secret")?;

				(
					EncodingKey::from_secret(secret.expose().as_bytes()),
					Some(DecodingKey::from_secret(secret.expose().as_bytes())),
				)
			},
			Algorithm::ES256 | Algorithm::ES384 => {
				let pem = required_secret(&fields.private_key, "jwt", "private_key")?;
				let encoding =
					EncodingKey::from_ec_pem(pem.expose().as_bytes()).map_err(invalid_key)?;
				let decoding = fields
					.public_key
					.as_deref()
					.map(|key| DecodingKey::from_ec_pem(key.as_bytes()))
					.transpose()
					.map_err(invalid_key)?;

				(encoding, decoding)
			},
			Algorithm::EdDSA => {
				let pem = required_secret(&fields.private_key, "jwt", "private_key")?;
				let encoding =
					EncodingKey::from_ed_pem(pem.expose().as_bytes()).map_err(invalid_key)?;
				let decoding = fields
					.public_key
					.as_deref()
					.map(|key| DecodingKey::from_ed_pem(key.as_bytes()))
					.transpose()
					.map_err(invalid_key)?;

				(encoding, decoding)
			},
			_ => {
				let pem = required_secret(&fields.private_key, "jwt", "private_key")?;
				let encoding =
					EncodingKey::from_rsa_pem(pem.expose().as_bytes()).map_err(invalid_key)?;
				let decoding = fields
					.public_key
					.as_deref()
					.map(|key| DecodingKey::from_rsa_pem(key.as_bytes()))
					.transpose()
					.map_err(invalid_key)?;

				(encoding, decoding)
			},
		};
		let expires_in = i64::try_from(fields.expires_in)
			.ok()
			.filter(|secs| *secs > 0)
			.map(Duration::seconds)
			.ok_or_else(|| {
				ConfigError::invalid("expires_in", "must be a positive number of seconds")
			})?;

		Ok(Self {
			algorithm,
			encoding_key,
			decoding_key,
			expires_in,
			issuer: fields.issuer.clone(),
			audience: fields.audience.clone(),
			claims: fields.claims.clone(),
		})
	}

	/// Signing algorithm.
	pub fn algorithm(&self) -> Algorithm {
		self.algorithm
	}

	/// Mints a token using the current time.
	pub fn generate_token(&self, claims: Claims) -> Result<String, AuthError> {
		self.generate_token_at(claims, OffsetDateTime::now_utc())
	}

	/// Mints a token issued at `now`.
	///
	/// `iat` and `exp` are set first, then configured and caller claims are layered on top,
	/// and finally `iss`/`aud` from configuration win over everything else.
	pub fn generate_token_at(
		&self,
		claims: Claims,
		now: OffsetDateTime,
	) -> Result<String, AuthError> {
		let issued_at = now.unix_timestamp();
		let mut payload = Claims::new();

		payload.insert("iat".into(), issued_at.into());
		payload.insert("exp".into(), (issued_at + self.expires_in.whole_seconds()).into());
		payload.extend(self.claims.clone());
		payload.extend(claims);

		if let Some(audience) = &self.audience {
			payload.insert("aud".into(), audience.clone().into());
		}
		if let Some(issuer) = &self.issuer {
			payload.insert("iss".into(), issuer.clone().into());
		}

		Ok(jsonwebtoken::encode(&Header::new(self.algorithm), &payload, &self.encoding_key)?)
	}

	/// Decodes `token` and validates its signature, expiry, issuer, and audience.
	pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
		let key = self.decoding_key.as_ref().ok_or_else(|| AuthError::Signing {
			reason: "no verification key is configured".into(),
		})?;
		let mut validation = Validation::new(self.algorithm);

		match &self.audience {
			Some(audience) => validation.set_audience(&[audience]),
			None => validation.validate_aud = false,
		}
		if let Some(issuer) = &self.issuer {
			validation.set_issuer(&[issuer]);
		}

		Ok(jsonwebtoken::decode::<Claims>(token, key, &validation)?.claims)
	}

	/// Sets `Authorization: Bearer <fresh token>`.
	pub fn apply_at(
		&self,
		descriptor: &mut RequestDescriptor,
		now: OffsetDateTime,
	) -> Result<(), AuthError> {
		let token = self.generate_token_at(Claims::new(), now)?;

		descriptor.set_header("authorization", format!("Bearer {token}"));

		Ok(())
	}
}
impl Debug for JwtAuth {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("JwtAuth")
			.field("algorithm", &self.algorithm)
			.field("expires_in", &self.expires_in)
			.field("issuer", &self.issuer)
			.field("audience", &self.audience)
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::Secret;

	fn hs256() -> JwtAuth {
		JwtAuth::from_credential(&JwtCredential {
			secret: Some(Secret::new("top-secret")),
			issuer: Some("oapi".into()),
			audience: Some("petstore".into()),
			expires_in: 600,
			..Default::default()
		})
		.expect("HS256 credential should load.")
	}

	#[test]
	fn exp_minus_iat_matches_lifetime_and_claims_survive() {
		let auth = hs256();
		let mut claims = Claims::new();

		claims.insert("sub".into(), "user-1".into());
		claims.insert("iss".into(), "spoofed".into());

		let token = auth.generate_token(claims).expect("Token generation should succeed.");
		let decoded = auth.verify_token(&token).expect("Freshly minted token should verify.");
		let iat = decoded["iat"].as_i64().expect("iat should be numeric.");
		let exp = decoded["exp"].as_i64().expect("exp should be numeric.");

		assert_eq!(exp - iat, 600);
		assert_eq!(decoded["sub"], "user-1");
		assert_eq!(decoded["iss"], "oapi");
		assert_eq!(decoded["aud"], "petstore");
	}

	#[test]
	fn hour_long_token_keeps_array_claims_and_configured_identity() {
		let auth = JwtAuth::from_credential(&JwtCredential {
			secret: Some(Secret::new("top-secret")),
			issuer: Some("oapi".into()),
			audience: Some("petstore".into()),
			expires_in: 3600,
			..Default::default()
		})
		.expect("HS256 credential should load.");
		let claims = serde_json::from_value::<Claims>(serde_json::json!({
			"sub": "u1",
			"roles": ["admin"],
			"iss": "attacker",
			"aud": "elsewhere",
		}))
		.expect("Claims fixture should parse.");
		let token = auth.generate_token(claims).expect("Token generation should succeed.");
		let decoded = auth.verify_token(&token).expect("Freshly minted token should verify.");
		let iat = decoded["iat"].as_i64().expect("iat should be numeric.");
		let exp = decoded["exp"].as_i64().expect("exp should be numeric.");

		assert_eq!(exp - iat, 3600);
		assert_eq!(decoded["sub"], "u1");
		assert_eq!(decoded["roles"], serde_json::json!(["admin"]));
		assert_eq!(decoded["iss"], "oapi");
		assert_eq!(decoded["aud"], "petstore");
	}

	#[test]
	fn tampered_tokens_fail_verification() {
		let auth = hs256();
		let token = auth.generate_token(Claims::new()).expect("Token generation should succeed.");
		let other = JwtAuth::from_credential(&JwtCredential {
			secret: Some(Secret::new("different")),
			..Default::default()
		})
		.expect("Second credential should load.");

		assert!(matches!(other.verify_token(&token), Err(AuthError::Jwt(_))));
	}

	#[test]
	fn asymmetric_algorithms_require_a_key() {
		let err = JwtAuth::from_credential(&JwtCredential {
			algorithm: "RS256".into(),
			..Default::default()
		})
		.expect_err("RS256 without a key should be rejected.");

		assert!(matches!(err, ConfigError::MissingField { scheme: "jwt", field: "private_key" }));
		assert!(JwtAuth::from_credential(&JwtCredential {
			algorithm: "HS999".into(),
			secret: Some(Secret::new("s")),
			..Default::default()
		})
		.is_err());
	}
}
