//! Consul-compatible HTTP key/value cache backend.

// crates.io
use reqwest::StatusCode;
// self
use crate::{
	_prelude::*,
	cache::{CacheBackend, CacheEntry, CacheFuture},
	error::{CacheBackendError, ConfigError},
};

/// Stores entries at `{base}/v1/kv/{prefix}/{key}`.
#[derive(Clone, Debug)]
pub struct ExternalBackend {
	client: ReqwestClient,
	base: Url,
	prefix: String,
}
impl ExternalBackend {
	/// Default key prefix.
	pub const DEFAULT_PREFIX: &'static str = "oapi-pipeline";

	/// Targets the KV store rooted at `base`.
	pub fn new(client: ReqwestClient, base: Url) -> Result<Self, ConfigError> {
		if base.cannot_be_a_base() {
			return Err(ConfigError::invalid("cache.external_url", "must be a hierarchical URL"));
		}

		Ok(Self { client, base, prefix: Self::DEFAULT_PREFIX.into() })
	}

	/// Overrides the key prefix.
	pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.prefix = prefix.into().trim_matches('/').to_owned();

		self
	}

	fn url_for(&self, key: Option<&str>) -> Url {
		let mut url = self.base.clone();

		if let Ok(mut segments) = url.path_segments_mut() {
			segments.pop_if_empty().extend(["v1", "kv"]);
			segments.extend(self.prefix.split('/').filter(|segment| !segment.is_empty()));

			if let Some(key) = key {
				segments.push(key);
			}
		}

		url
	}
}
impl CacheBackend for ExternalBackend {
	fn get<'a>(&'a self, key: &'a str) -> CacheFuture<'a, Option<CacheEntry>> {
		Box::pin(async move {
			let mut url = self.url_for(Some(key));

			url.set_query(Some("raw"));

			let response = self.client.get(url).send().await.map_err(network)?;

			if response.status() == StatusCode::NOT_FOUND {
				return Ok(None);
			}

			let response = checked(response)?;
			let bytes = response.bytes().await.map_err(network)?;
			let entry = serde_json::from_slice::<CacheEntry>(&bytes).map_err(|e| {
				CacheBackendError::Serialization { message: format!("Failed to parse entry: {e}") }
			})?;

			Ok(Some(entry))
		})
	}

	fn put(&self, entry: CacheEntry) -> CacheFuture<'_, ()> {
		Box::pin(async move {
			let body = serde_json::to_vec(&entry).map_err(|e| CacheBackendError::Serialization {
				message: format!("Failed to serialize cache entry: {e}"),
			})?;
			let response = self
				.client
				.put(self.url_for(Some(&entry.key)))
				.body(body)
				.send()
				.await
				.map_err(network)?;

			checked(response).map(drop)
		})
	}

	fn remove<'a>(&'a self, key: &'a str) -> CacheFuture<'a, ()> {
		Box::pin(async move {
			let response =
				self.client.delete(self.url_for(Some(key))).send().await.map_err(network)?;

			if response.status() == StatusCode::NOT_FOUND {
				return Ok(());
			}

			checked(response).map(drop)
		})
	}

	fn clear(&self) -> CacheFuture<'_, ()> {
		Box::pin(async move {
			let mut url = self.url_for(None);

			url.set_query(Some("recurse"));

			let response = self.client.delete(url).send().await.map_err(network)?;

			checked(response).map(drop)
		})
	}
}

fn network(e: ReqwestError) -> CacheBackendError {
	CacheBackendError::Backend { message: format!("KV store request failed: {e}") }
}

fn checked(response: reqwest::Response) -> Result<reqwest::Response, CacheBackendError> {
	let status = response.status();

	if status.is_success() {
		Ok(response)
	} else {
		Err(CacheBackendError::Backend { message: format!("KV store answered with {status}") })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn urls_follow_the_kv_layout() {
		let backend = ExternalBackend::new(
			ReqwestClient::new(),
			Url::parse("http://127.0.0.1:8500/").expect("Base URL should parse."),
		)
		.expect("Backend should build.")
		.with_prefix("/team/cli/");

		assert_eq!(
			backend.url_for(Some("abc")).as_str(),
			"http://127.0.0.1:8500/v1/kv/team/cli/abc"
		);
		assert_eq!(backend.url_for(None).as_str(), "http://127.0.0.1:8500/v1/kv/team/cli");
	}
}
