//! Token state held per credential.

// self
use crate::{_prelude::*, auth::{ScopeSet, Secret}};

/// Bearer token material plus its lifetime.
///
/// Owned by [`AuthEngine`](crate::auth::AuthEngine); mutated only while the credential's
/// refresh guard is held.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
	/// Access token presented to the API.
	pub access_token: Secret,
	/// Refresh token, when the grant issued one.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<Secret>,
	/// Scopes granted by the token endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scope: Option<ScopeSet>,
	/// Instant the token was issued.
	pub issued_at: OffsetDateTime,
	/// Instant the access token stops being accepted.
	#[serde(default)]
	pub expires_at: Option<OffsetDateTime>,
}
impl TokenState {
	/// Creates a state for a token issued at `issued_at` with an optional lifetime.
	///
	/// A lifetime that runs past the representable calendar leaves the expiry unset; token
	/// endpoint responses are range-checked before they get here.
	pub fn new(
		access_token: impl Into<Secret>,
		issued_at: OffsetDateTime,
		expires_in: Option<Duration>,
	) -> Self {
		Self {
			access_token: access_token.into(),
			refresh_token: None,
			scope: None,
			issued_at,
			expires_at: expires_in.and_then(|ttl| issued_at.checked_add(ttl)),
		}
	}

	/// Attaches a refresh token.
	pub fn with_refresh_token(mut self, refresh_token: impl Into<Secret>) -> Self {
		self.refresh_token = Some(refresh_token.into());

		self
	}

	/// Attaches the granted scopes.
	pub fn with_scope(mut self, scope: ScopeSet) -> Self {
		self.scope = Some(scope);

		self
	}

	/// Returns `true` once `now` is within `skew` of expiry. Tokens without an expiry never
	/// expire.
	pub fn is_expired_at(&self, now: OffsetDateTime, skew: Duration) -> bool {
		self.expires_at.is_some_and(|expires_at| {
			expires_at.checked_sub(skew).is_none_or(|refresh_at| now >= refresh_at)
		})
	}

	/// Returns `true` when a refresh token is held.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.as_ref().is_some_and(|token| !token.is_empty())
	}
}
