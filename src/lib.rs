//! Request pipeline for OpenAPI-generated command-line tools: authorize, admit, cache, and
//! dispatch every outbound call through one shared, concurrency-safe engine.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod http;
pub mod id;
pub mod oauth;
pub mod obs;
pub mod pipeline;
pub mod rate_limit;
pub mod store;
pub mod transport;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and fixtures for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// self
	use crate::{
		auth::{Secret, TokenState},
		descriptor::{EndpointId, Method, RequestDescriptor, ResponseDescriptor},
		error::{AuthError, TransportError},
		oauth::{ExchangeFuture, TokenEndpoint, TokenExchange},
		obs::{Observer, Stage, StageEvent, StageOutcome},
		transport::{Transport, TransportFuture},
	};

	/// Builds a descriptor for `method url` tagged with `endpoint`.
	pub fn request(endpoint: &str, method: Method, url: &str) -> RequestDescriptor {
		RequestDescriptor::new(
			EndpointId::new(endpoint).expect("Endpoint fixture should be a valid identifier."),
			method,
			Url::parse(url).expect("URL fixture should parse successfully."),
		)
	}

	/// Transport double that answers every request with a canned response and counts calls.
	#[derive(Debug)]
	pub struct RecordingTransport {
		status: u16,
		body: Vec<u8>,
		delay: Option<StdDuration>,
		calls: AtomicUsize,
		seen: Mutex<Vec<RequestDescriptor>>,
	}
	impl RecordingTransport {
		/// Creates a transport that returns `status` with `body`.
		pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
			Self {
				status,
				body: body.into(),
				delay: None,
				calls: AtomicUsize::new(0),
				seen: Mutex::new(Vec::new()),
			}
		}

		/// Sleeps for `delay` before answering.
		pub fn with_delay(mut self, delay: StdDuration) -> Self {
			self.delay = Some(delay);

			self
		}

		/// Number of requests that reached the transport.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		/// Requests observed by the transport, in arrival order.
		pub fn seen(&self) -> Vec<RequestDescriptor> {
			self.seen.lock().clone()
		}
	}
	impl Transport for RecordingTransport {
		fn send(&self, request: RequestDescriptor) -> TransportFuture<'_> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);
				self.seen.lock().push(request);

				if let Some(delay) = self.delay {
					tokio::time::sleep(delay).await;
				}

				let mut response = ResponseDescriptor::new(self.status, self.body.clone());

				response.headers.insert("content-type".into(), "application/json".into());

				Ok::<_, TransportError>(response)
			})
		}
	}

	/// Token exchange double that mints `token-N` tokens and counts calls.
	#[derive(Debug)]
	pub struct ScriptedExchange {
		lifetime: Option<Duration>,
		delay: Option<StdDuration>,
		failing: bool,
		calls: AtomicUsize,
	}
	impl ScriptedExchange {
		/// Issues tokens valid for `lifetime`, or forever when `None`.
		pub fn new(lifetime: Option<Duration>) -> Self {
			Self { lifetime, delay: None, failing: false, calls: AtomicUsize::new(0) }
		}

		/// Sleeps for `delay` before answering.
		pub fn with_delay(mut self, delay: StdDuration) -> Self {
			self.delay = Some(delay);

			self
		}

		/// Rejects every grant with `invalid_client`.
		pub fn failing(mut self) -> Self {
			self.failing = true;

			self
		}

		/// Number of grants attempted.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		fn issue(&self) -> ExchangeFuture<'_> {
			Box::pin(async move {
				let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

				if let Some(delay) = self.delay {
					tokio::time::sleep(delay).await;
				}
				if self.failing {
					return Err(AuthError::InvalidClient {
						reason: "client authentication failed".into(),
						status: Some(401),
					});
				}

				let issued_at = OffsetDateTime::now_utc();

				Ok(TokenState::new(format!("token-{call}"), issued_at, self.lifetime)
					.with_refresh_token("refresh"))
			})
		}
	}
	impl TokenExchange for ScriptedExchange {
		fn client_credentials<'a>(&'a self, _: &'a TokenEndpoint) -> ExchangeFuture<'a> {
			self.issue()
		}

		fn refresh<'a>(&'a self, _: &'a TokenEndpoint, _: &'a Secret) -> ExchangeFuture<'a> {
			self.issue()
		}

		fn authorization_code<'a>(
			&'a self,
			_: &'a TokenEndpoint,
			_: &'a str,
			_: &'a str,
			_: &'a Url,
		) -> ExchangeFuture<'a> {
			self.issue()
		}
	}

	/// Observer that keeps `(stage, outcome)` pairs for assertions.
	#[derive(Debug, Default)]
	pub struct CollectingObserver {
		events: Mutex<Vec<(Stage, StageOutcome)>>,
	}
	impl CollectingObserver {
		/// Snapshot of the recorded events.
		pub fn events(&self) -> Vec<(Stage, StageOutcome)> {
			self.events.lock().clone()
		}
	}
	impl Observer for CollectingObserver {
		fn on_event(&self, event: &StageEvent<'_>) {
			self.events.lock().push((event.stage, event.outcome));
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, BTreeSet, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		path::{Path, PathBuf},
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::{Duration as StdDuration, Instant},
	};

	pub use async_lock::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use pipeline::{Pipeline, PipelineBuilder};
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _, oapi_pipeline as _};
