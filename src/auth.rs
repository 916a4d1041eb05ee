//! Credential models, per-scheme strategies, and the engine that applies them.

pub mod api_key;
pub mod credential;
pub mod engine;
pub mod jwt;
pub mod metrics;
pub mod oauth2;
pub mod pkce;
pub mod scope;
pub mod secret;
pub mod sigv4;
pub mod strategy;
pub mod token;

pub use api_key::{ApiKeyAuth, BasicAuth};
pub use credential::*;
pub use engine::{AuthEngine, AuthEngineBuilder, AuthSettings};
pub use jwt::{Claims, JwtAuth};
pub use metrics::RefreshMetrics;
pub use oauth2::ClientCredentialsAuth;
pub use pkce::{PkceAuth, PkcePhase};
pub use scope::{ScopeSet, ScopeValidationError};
pub use secret::Secret;
pub use sigv4::AwsSigner;
pub use strategy::AuthStrategy;
pub use token::TokenState;
