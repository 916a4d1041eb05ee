//! Authorization Code + PKCE state machine.
//!
//! ```text
//! Init -> AuthUrlIssued -> TokenExchanged -> Active -> Expired
//!            ^                                           |
//!            +------------- re-authorization ------------+
//! ```
//!
//! The engine drives transitions; this module owns the verifier, challenge, and CSRF state.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{
		ScopeSet,
		credential::{PkceCredential, required, required_url},
	},
	error::{AuthError, ConfigError},
	oauth::TokenEndpoint,
};

const STATE_LEN: usize = 32;
const VERIFIER_LEN: usize = 64;

/// Lifecycle phase of an interactive PKCE credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PkcePhase {
	/// No authorization has been attempted.
	Init,
	/// Authorization URL issued; waiting for the redirect's code.
	AuthUrlIssued,
	/// Code exchanged for tokens.
	TokenExchanged,
	/// Tokens are serving requests.
	Active,
	/// Access token expired and no refresh token is usable.
	Expired,
}
impl PkcePhase {
	/// Returns a stable label.
	pub const fn as_str(self) -> &'static str {
		match self {
			PkcePhase::Init => "init",
			PkcePhase::AuthUrlIssued => "auth_url_issued",
			PkcePhase::TokenExchanged => "token_exchanged",
			PkcePhase::Active => "active",
			PkcePhase::Expired => "expired",
		}
	}
}
impl Display for PkcePhase {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Material issued with one authorization URL.
#[derive(Clone)]
struct Handshake {
	verifier: String,
	state: String,
}

#[derive(Clone)]
struct Session {
	phase: PkcePhase,
	handshake: Option<Handshake>,
}

/// PKCE strategy: static client configuration plus the mutable handshake session.
pub struct PkceAuth {
	endpoint: TokenEndpoint,
	authorization_url: Url,
	redirect_uri: Url,
	session: Mutex<Session>,
}
impl PkceAuth {
	/// Validates a `oauth2_pkce` credential.
	pub fn from_credential(fields: &PkceCredential) -> Result<Self, ConfigError> {
		let client_id = required(&fields.client_id, "oauth2_pkce", "client_id")?;
		let authorization_url =
			required_url(&fields.authorization_url, "oauth2_pkce", "authorization_url")?;
		let token_url = required_url(&fields.token_url, "oauth2_pkce", "token_url")?;
		let redirect_uri = required_url(&fields.redirect_uri, "oauth2_pkce", "redirect_uri")?;
		let mut endpoint = TokenEndpoint::new(token_url, client_id.as_str())
			.with_scope(fields.scope.clone().unwrap_or_default());

		endpoint.client_secret = fields.client_secret.clone().filter(|secret| !secret.is_empty());

		Ok(Self {
			endpoint,
			authorization_url,
			redirect_uri,
			session: Mutex::new(Session { phase: PkcePhase::Init, handshake: None }),
		})
	}

	/// Token endpoint used for code exchange and refresh.
	pub fn endpoint(&self) -> &TokenEndpoint {
		&self.endpoint
	}

	/// Redirect URI sent with the authorization request and code exchange.
	pub fn redirect_uri(&self) -> &Url {
		&self.redirect_uri
	}

	/// Current phase.
	pub fn phase(&self) -> PkcePhase {
		self.session.lock().phase
	}

	/// Generates a fresh verifier, challenge, and state, and returns the URL the user must
	/// visit. Any previously issued URL stops being accepted.
	pub fn issue_authorization_url(&self) -> Url {
		let handshake =
			Handshake { verifier: random_string(VERIFIER_LEN), state: random_string(STATE_LEN) };
		let url = build_authorize_url(
			&self.authorization_url,
			&self.endpoint.client_id,
			&self.redirect_uri,
			&self.endpoint.scope,
			&handshake.state,
			&compute_pkce_challenge(&handshake.verifier),
		);
		let mut session = self.session.lock();

		session.phase = PkcePhase::AuthUrlIssued;
		session.handshake = Some(handshake);

		url
	}

	/// Validates the returned `state` and hands back the verifier for the code exchange.
	pub(crate) fn begin_exchange(
		&self,
		credential: &str,
		returned_state: &str,
	) -> Result<String, AuthError> {
		let session = self.session.lock();

		match (&session.phase, &session.handshake) {
			(PkcePhase::AuthUrlIssued, Some(handshake)) =>
				if handshake.state == returned_state {
					Ok(handshake.verifier.clone())
				} else {
					Err(AuthError::StateMismatch)
				},
			(phase, _) => Err(AuthError::UnexpectedPhase {
				credential: credential.to_owned(),
				operation: "exchange an authorization code",
				phase: phase.as_str(),
			}),
		}
	}

	/// Moves the session to `phase`, dropping the handshake once tokens exist.
	pub(crate) fn transition(&self, phase: PkcePhase) {
		let mut session = self.session.lock();

		if matches!(phase, PkcePhase::TokenExchanged | PkcePhase::Active) {
			session.handshake = None;
		}

		session.phase = phase;
	}

	#[cfg(test)]
	fn verifier(&self) -> Option<String> {
		self.session.lock().handshake.as_ref().map(|handshake| handshake.verifier.clone())
	}
}
impl Debug for PkceAuth {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PkceAuth")
			.field("client_id", &self.endpoint.client_id)
			.field("authorization_url", &self.authorization_url.as_str())
			.field("redirect_uri", &self.redirect_uri.as_str())
			.field("phase", &self.phase())
			.finish()
	}
}

fn build_authorize_url(
	base: &Url,
	client_id: &str,
	redirect_uri: &Url,
	scope: &ScopeSet,
	state: &str,
	challenge: &str,
) -> Url {
	let mut url = base.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("response_type", "code");
	pairs.append_pair("client_id", client_id);
	pairs.append_pair("redirect_uri", redirect_uri.as_str());

	if !scope.is_empty() {
		pairs.append_pair("scope", &scope.normalized());
	}

	pairs.append_pair("state", state);
	pairs.append_pair("code_challenge", challenge);
	pairs.append_pair("code_challenge_method", "S256");

	drop(pairs);

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn pkce() -> PkceAuth {
		PkceAuth::from_credential(&PkceCredential {
			client_id: Some("cli".into()),
			authorization_url: Some("https://auth.example.com/authorize".into()),
			token_url: Some("https://auth.example.com/token".into()),
			redirect_uri: Some("http://localhost:8765/callback".into()),
			scope: Some("read write".parse().expect("Scope fixture should parse.")),
			client_secret: None,
		})
		.expect("PKCE credential should validate.")
	}

	#[test]
	fn challenge_matches_rfc_7636_vector() {
		assert_eq!(
			compute_pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
			"E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
		);
	}

	#[test]
	fn authorization_url_carries_pkce_parameters() {
		let auth = pkce();
		let url = auth.issue_authorization_url();
		let params = url.query_pairs().into_owned().collect::<HashMap<_, _>>();
		let verifier = auth.verifier().expect("Issuing a URL should create a verifier.");

		assert_eq!(auth.phase(), PkcePhase::AuthUrlIssued);
		assert_eq!(params["response_type"], "code");
		assert_eq!(params["client_id"], "cli");
		assert_eq!(params["scope"], "read write");
		assert_eq!(params["code_challenge_method"], "S256");
		assert_eq!(params["code_challenge"], compute_pkce_challenge(&verifier));
		assert!(verifier.len() <= 128);
	}

	#[test]
	fn exchange_requires_matching_state_and_phase() {
		let auth = pkce();

		assert!(matches!(
			auth.begin_exchange("default", "anything"),
			Err(AuthError::UnexpectedPhase { phase: "init", .. })
		));

		let url = auth.issue_authorization_url();
		let state = url
			.query_pairs()
			.find(|(name, _)| name == "state")
			.map(|(_, value)| value.into_owned())
			.expect("Authorization URL should carry a state.");

		assert!(matches!(auth.begin_exchange("default", "forged"), Err(AuthError::StateMismatch)));
		assert_eq!(
			auth.begin_exchange("default", &state).ok(),
			auth.verifier(),
			"Matching state should release the verifier."
		);

		auth.transition(PkcePhase::Active);

		assert!(auth.verifier().is_none());
	}
}
