#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use oapi_pipeline::{
	_preludet::*,
	Pipeline,
	auth::{AuthEngine, Credential},
	cache::{CacheSettings, ResponseCache},
	config::PipelineConfig,
	descriptor::Method,
	id::CredentialId,
	transport::ReqwestTransport,
};

fn api_key_engine() -> AuthEngine {
	let credential = serde_json::from_str::<Credential>(
		r#"{ "type": "api_key", "api_key": "k-live", "api_key_header": "X-Api-Token" }"#,
	)
	.expect("API key credential fixture should deserialize.");

	AuthEngine::builder(Arc::new(ScriptedExchange::new(None)))
		.with_credential(CredentialId::primary(), credential)
		.build()
		.expect("Auth engine fixture should build successfully.")
}

#[tokio::test]
async fn second_identical_get_is_served_from_cache() {
	let server = MockServer::start_async().await;
	let pets = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/pets")
				.query_param("limit", "2")
				.header("x-api-token", "k-live");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"[{"id":1},{"id":2}]"#);
		})
		.await;
	let cache = ResponseCache::memory(CacheSettings {
		ttl: StdDuration::from_secs(300),
		..CacheSettings::default()
	})
	.expect("Cache fixture should build successfully.");
	let pipeline = Pipeline::builder(Arc::new(ReqwestTransport::default()))
		.with_auth(api_key_engine())
		.with_cache(cache)
		.build();
	let url = server.url("/pets?limit=2");
	let first = pipeline
		.execute(request("pets.list", Method::Get, &url))
		.await
		.expect("First request should reach the mock API.");
	let second = pipeline
		.execute(request("pets.list", Method::Get, &url))
		.await
		.expect("Second request should be served from the cache.");

	pets.assert_calls_async(1).await;

	assert_eq!(first.status, 200);
	assert!(!first.served_from_cache);
	assert!(second.served_from_cache);
	assert_eq!(second.body, first.body);
	assert_eq!(second.header("content-type"), Some("application/json"));
	assert_eq!(pipeline.cache().stats().hits(), 1);

	let pets: Vec<serde_json::Value> =
		second.json().expect("Cached body should still decode as JSON.");

	assert_eq!(pets.len(), 2);
}

#[tokio::test]
async fn pipeline_from_config_applies_headers_and_rate_limits() {
	let server = MockServer::start_async().await;
	let search = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/search")
				.header("user-agent", "petstore-cli/1.0")
				.header("authorization", "Basic cm9vdDpodW50ZXIy");
			then.status(200).body("[]");
		})
		.await;
	let config = PipelineConfig::from_json_str(
		r#"{
			"auth": { "type": "basic", "username": "root", "password": "hunter2" },
			"cache": { "enabled": false },
			"rate_limit": {
				"requests_per_second": 100,
				"rules": [{ "endpoint_pattern": "/search", "rate": 0.01, "burst": 1 }]
			},
			"headers": { "User-Agent": "petstore-cli/1.0" }
		}"#,
	)
	.expect("Config fixture should parse.");
	let pipeline = Pipeline::from_config(&config).expect("Pipeline should build from config.");
	let url = server.url("/search");

	pipeline
		.execute(request("pets.search", Method::Get, &url))
		.await
		.expect("First search should be admitted.");

	let err = pipeline
		.execute(request("pets.search", Method::Get, &url))
		.await
		.expect_err("Second search should exceed the rule.");

	search.assert_calls_async(1).await;

	assert!(matches!(err, Error::RateLimitExceeded { ref rule, .. } if rule == "/search"));
	assert!(!err.is_fatal());
}

#[tokio::test]
async fn file_cache_survives_pipeline_rebuilds() {
	let server = MockServer::start_async().await;
	let pet = server
		.mock_async(|when, then| {
			when.method(GET).path("/pets/7");
			then.status(200).body(r#"{"id":7}"#);
		})
		.await;
	let dir = std::env::temp_dir().join(format!("oapi-pipeline-it-{}", std::process::id()));
	let config = PipelineConfig::from_json_str(&format!(
		r#"{{ "cache": {{ "storage": "file", "path": {:?} }} }}"#,
		dir.display().to_string()
	))
	.expect("Config fixture should parse.");
	let url = server.url("/pets/7");
	let first = Pipeline::from_config(&config)
		.expect("Pipeline should build from config.")
		.execute(request("pets.get", Method::Get, &url))
		.await
		.expect("First request should reach the mock API.");
	let second = Pipeline::from_config(&config)
		.expect("Pipeline should rebuild from config.")
		.execute(request("pets.get", Method::Get, &url))
		.await
		.expect("Second request should be served from disk.");

	pet.assert_calls_async(1).await;

	assert!(!first.served_from_cache);
	assert!(second.served_from_cache);

	let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn file_storage_without_path_is_rejected() {
	let config = PipelineConfig::from_json_str(r#"{ "cache": { "storage": "file" } }"#)
		.expect("Config fixture should parse.");
	let err = Pipeline::from_config(&config).expect_err("File storage needs a directory.");

	assert!(matches!(err, Error::Config(_)));
}
