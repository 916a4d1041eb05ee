#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use oapi_pipeline::{
	_preludet::*,
	cache::{CacheBackend, CacheEntry, CacheSettings, ExternalBackend, ResponseCache},
};

fn backend(server: &MockServer) -> ExternalBackend {
	ExternalBackend::new(
		ReqwestClient::new(),
		Url::parse(&server.base_url()).expect("Mock server URL should parse."),
	)
	.expect("External backend should accept the mock server URL.")
	.with_prefix("petstore")
}

#[tokio::test]
async fn external_backend_speaks_the_kv_protocol() {
	let server = MockServer::start_async().await;
	let entry = CacheEntry::new(
		"k1",
		br#"{"id":1}"#.to_vec(),
		StdDuration::from_secs(300),
		OffsetDateTime::now_utc(),
	);
	let stored = serde_json::to_string(&entry).expect("Cache entry should serialize.");
	let put = server
		.mock_async(|when, then| {
			when.method(PUT).path("/v1/kv/petstore/k1");
			then.status(200).body("true");
		})
		.await;
	let get = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/kv/petstore/k1").query_param_exists("raw");
			then.status(200).body(stored.clone());
		})
		.await;
	let missing = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/kv/petstore/k2");
			then.status(404);
		})
		.await;
	let delete = server
		.mock_async(|when, then| {
			when.method(DELETE).path("/v1/kv/petstore/k1");
			then.status(200).body("true");
		})
		.await;
	let backend = backend(&server);

	backend.put(entry.clone()).await.expect("PUT should succeed.");

	let fetched = backend
		.get("k1")
		.await
		.expect("GET should succeed.")
		.expect("Stored entry should be returned.");

	assert_eq!(fetched.value, entry.value);
	assert_eq!(fetched.size, entry.size);
	assert!(backend.get("k2").await.expect("404 should not be an error.").is_none());

	backend.remove("k1").await.expect("DELETE should succeed.");

	put.assert_async().await;
	get.assert_async().await;
	missing.assert_async().await;
	delete.assert_async().await;
}

#[tokio::test]
async fn unavailable_external_backend_degrades_to_misses() {
	let server = MockServer::start_async().await;
	let failing = server
		.mock_async(|when, then| {
			when.path("/v1/kv/petstore/k1");
			then.status(500);
		})
		.await;
	let cache = ResponseCache::new(Arc::new(backend(&server)), CacheSettings::default())
		.expect("Cache should build over the external backend.");

	cache.store("k1", b"payload".to_vec(), None).await;

	let lookup = cache.lookup("k1").await;

	assert!(!lookup.hit);
	assert!(lookup.value.is_none());
	assert_eq!(cache.stats().errors(), 2);
	failing.assert_calls_async(2).await;
}
