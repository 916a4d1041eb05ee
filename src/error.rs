//! Pipeline-level error types shared across auth, admission, caching, and transport.

// self
use crate::{
	_prelude::*,
	auth::ScopeValidationError,
	id::IdentifierError,
	obs::Stage,
	store::StoreError,
};

/// Pipeline-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical pipeline error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem; fatal and surfaced immediately.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Credential could not be applied to the request.
	#[error(transparent)]
	Auth(#[from] AuthError),
	/// Admission was denied by the rate limiter.
	#[error("Rate limit `{rule}` exceeded; retry after {retry_after:?}.")]
	RateLimitExceeded {
		/// Endpoint pattern of the rule that denied the request.
		rule: String,
		/// Time until the bucket can admit one more request.
		retry_after: StdDuration,
	},
	/// Cache backend failure. The pipeline itself absorbs these; only direct backend callers
	/// observe them.
	#[error(transparent)]
	CacheBackend(#[from] CacheBackendError),
	/// Network-layer failure while talking to the API.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// A blocking stage exceeded the configured timeout.
	#[error("The {stage} stage timed out after {after:?}.")]
	Timeout {
		/// Stage that was still in flight.
		stage: Stage,
		/// Configured timeout that elapsed.
		after: StdDuration,
	},
}
impl Error {
	/// Returns the taxonomy bucket for this error.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Config(_) => ErrorKind::Config,
			Self::Auth(_) => ErrorKind::Auth,
			Self::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
			Self::CacheBackend(_) => ErrorKind::CacheBackend,
			Self::Transport(_) => ErrorKind::Transport,
			Self::Timeout { .. } => ErrorKind::Timeout,
		}
	}

	/// Underlying HTTP status code, when the failure carried one.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Auth(err) => err.status(),
			_ => None,
		}
	}

	/// Returns `true` when the invocation must be aborted and reported.
	pub fn is_fatal(&self) -> bool {
		!matches!(self.kind(), ErrorKind::RateLimitExceeded | ErrorKind::CacheBackend)
	}

	/// Suggested wait before retrying, for rate-limit denials.
	pub fn retry_after(&self) -> Option<StdDuration> {
		match self {
			Self::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
			_ => None,
		}
	}
}

/// Stable labels for [`Error`] variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// [`Error::Config`].
	Config,
	/// [`Error::Auth`].
	Auth,
	/// [`Error::RateLimitExceeded`].
	RateLimitExceeded,
	/// [`Error::CacheBackend`].
	CacheBackend,
	/// [`Error::Transport`].
	Transport,
	/// [`Error::Timeout`].
	Timeout,
}
impl ErrorKind {
	/// Returns a stable label suitable for logs or exit reporting.
	pub const fn as_str(self) -> &'static str {
		match self {
			ErrorKind::Config => "config",
			ErrorKind::Auth => "auth",
			ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
			ErrorKind::CacheBackend => "cache_backend",
			ErrorKind::Transport => "transport",
			ErrorKind::Timeout => "timeout",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// A scheme-specific required field is absent.
	#[error("The {scheme} credential is missing the `{field}` field.")]
	MissingField {
		/// Auth scheme label (`api_key`, `oauth2`, ...).
		scheme: &'static str,
		/// Missing field name.
		field: &'static str,
	},
	/// A field is present but unusable.
	#[error("Field `{field}` is invalid: {reason}.")]
	InvalidField {
		/// Offending field name.
		field: String,
		/// Human-readable reason.
		reason: String,
	},
	/// A field holds an unparsable URL.
	#[error("Field `{field}` is not a valid URL.")]
	InvalidUrl {
		/// Offending field name.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A glob pattern failed to compile.
	#[error("Pattern `{pattern}` is invalid.")]
	InvalidPattern {
		/// Pattern as written in configuration.
		pattern: String,
		/// Underlying compile failure.
		#[source]
		source: glob::PatternError,
	},
	/// A binding or default references a credential that was never registered.
	#[error("Credential `{credential}` is not registered.")]
	UnknownCredential {
		/// Referenced credential identifier.
		credential: String,
	},
	/// Identifier validation failed.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
	/// Scope string could not be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] ScopeValidationError),
	/// Signing key material could not be loaded.
	#[error("Signing key for the {scheme} credential is invalid.")]
	InvalidKey {
		/// Auth scheme label.
		scheme: &'static str,
		/// Underlying key parsing failure.
		#[source]
		source: jsonwebtoken::errors::Error,
	},
	/// Configuration document could not be parsed.
	#[error("Configuration is malformed at `{path}`.")]
	Parse {
		/// JSON path to the offending value.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: serde_json::Error,
	},
	/// Configuration file could not be read.
	#[error("Failed to read configuration from {path}.")]
	Io {
		/// File that failed to load.
		path: PathBuf,
		/// Underlying I/O failure.
		#[source]
		source: std::io::Error,
	},
	/// Persistent token or cache storage could not be opened.
	#[error("Failed to open persistent storage.")]
	Storage(#[from] StoreError),
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
		Self::InvalidField { field: field.into(), reason: reason.into() }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Failures raised while obtaining or applying credentials.
#[derive(Debug, ThisError)]
pub enum AuthError {
	/// Token endpoint rejected the grant (bad code or refresh token).
	#[error("Token endpoint rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider-supplied reason.
		reason: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Client authentication failed at the token endpoint.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider-supplied reason.
		reason: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Requested scopes were refused.
	#[error("Token endpoint refused the requested scopes: {reason}.")]
	InsufficientScope {
		/// Provider-supplied reason.
		reason: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint answered with an unexpected but possibly temporary failure.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint response is well-formed but unusable.
	#[error("Token endpoint response is unusable: {reason}.")]
	TokenResponse {
		/// Why the response was rejected.
		reason: String,
	},
	/// Token endpoint could not be reached.
	#[error("Token endpoint is unreachable.")]
	Unreachable {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Request signing or self-issued token generation failed.
	#[error("Signing failed: {reason}.")]
	Signing {
		/// Why signing failed.
		reason: String,
	},
	/// Self-issued JWT could not be encoded or verified.
	#[error(transparent)]
	Jwt(#[from] jsonwebtoken::errors::Error),
	/// Interactive authorization must (re)run before the credential can be used.
	#[error("Credential `{credential}` requires authorization.")]
	AuthorizationRequired {
		/// Credential that needs user interaction.
		credential: String,
	},
	/// PKCE state returned by the redirect did not match the issued value.
	#[error("Authorization state mismatch.")]
	StateMismatch,
	/// An interactive operation was attempted from the wrong phase.
	#[error("Credential `{credential}` cannot {operation} while {phase}.")]
	UnexpectedPhase {
		/// Credential identifier.
		credential: String,
		/// Attempted operation.
		operation: &'static str,
		/// Current phase label.
		phase: &'static str,
	},
	/// The credential exhausted its refresh failure budget.
	#[error("Credential `{credential}` is invalid after {failures} consecutive refresh failures.")]
	CredentialInvalidated {
		/// Credential identifier.
		credential: String,
		/// Consecutive failures recorded.
		failures: u32,
	},
}
impl AuthError {
	/// HTTP status code associated with the failure, when available.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::InvalidGrant { status, .. }
			| Self::InvalidClient { status, .. }
			| Self::InsufficientScope { status, .. }
			| Self::TokenEndpoint { status, .. }
			| Self::TokenResponseParse { status, .. } => *status,
			_ => None,
		}
	}
}

/// Cache backend failures; the pipeline degrades these to cache misses.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CacheBackendError {
	/// Entry could not be (de)serialized.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Storage engine failure.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Request could not be converted for the HTTP client.
	#[error("Request is invalid: {reason}.")]
	InvalidRequest {
		/// Why the request was rejected.
		reason: String,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the API.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn rate_limit_denial_is_not_fatal() {
		let err = Error::RateLimitExceeded {
			rule: "*".into(),
			retry_after: StdDuration::from_millis(250),
		};

		assert_eq!(err.kind(), ErrorKind::RateLimitExceeded);
		assert!(!err.is_fatal());
		assert_eq!(err.retry_after(), Some(StdDuration::from_millis(250)));
	}

	#[test]
	fn auth_errors_surface_status_codes() {
		let err: Error =
			AuthError::InvalidClient { reason: "bad secret".into(), status: Some(401) }.into();

		assert_eq!(err.kind(), ErrorKind::Auth);
		assert_eq!(err.status(), Some(401));
		assert!(err.is_fatal());
		assert!(err.to_string().contains("bad secret"));
	}

	#[test]
	fn timeout_reports_stage() {
		let err = Error::Timeout { stage: Stage::Transport, after: StdDuration::from_secs(30) };

		assert_eq!(err.kind().as_str(), "timeout");
		assert!(err.to_string().contains("transport"));
	}
}
