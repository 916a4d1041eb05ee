//! Validated identifiers for credentials and API endpoints.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

const MAX_LEN: usize = 256;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentifierError {
	/// Nothing to identify by.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// `credential` or `endpoint`.
		kind: &'static str,
	},
	/// Whitespace would break glob bindings and log fields.
	#[error("{kind} identifier contains whitespace.")]
	ContainsWhitespace {
		/// `credential` or `endpoint`.
		kind: &'static str,
	},
	/// Longer than 256 bytes.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// `credential` or `endpoint`.
		kind: &'static str,
		/// Permitted length.
		max: usize,
	},
}

fn check(kind: &'static str, raw: &str) -> Result<(), IdentifierError> {
	if raw.is_empty() {
		Err(IdentifierError::Empty { kind })
	} else if raw.contains(char::is_whitespace) {
		Err(IdentifierError::ContainsWhitespace { kind })
	} else if raw.len() > MAX_LEN {
		Err(IdentifierError::TooLong { kind, max: MAX_LEN })
	} else {
		Ok(())
	}
}

// Deserialization goes through `TryFrom<String>` so config files get the same checks as `new`.
macro_rules! identifier {
	($(#[$meta:meta])* $name:ident => $kind:literal) => {
		$(#[$meta])*
		#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String")]
		pub struct $name(String);
		impl $name {
			/// Validates `raw`.
			pub fn new(raw: impl Into<String>) -> Result<Self, IdentifierError> {
				Self::try_from(raw.into())
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(raw: String) -> Result<Self, Self::Error> {
				check($kind, &raw).map(|()| Self(raw))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str {
				&self.0
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

identifier! {
	/// Name of a configured credential; keys token state.
	CredentialId => "credential"
}
identifier! {
	/// Operation identifier, usually the OpenAPI `operationId`.
	EndpointId => "endpoint"
}

impl CredentialId {
	/// Identifier used for the single credential declared under `auth`.
	pub fn primary() -> Self {
		Self("default".into())
	}
}
