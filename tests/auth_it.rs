#![cfg(feature = "reqwest")]

// crates.io
use httpmock::prelude::*;
// self
use oapi_pipeline::{
	_preludet::*,
	Pipeline,
	auth::{AuthEngine, AuthSettings, Credential, PkcePhase},
	descriptor::Method,
	error::AuthError,
	http::ReqwestHttpClient,
	id::CredentialId,
	oauth::{OAuthFacade, TokenExchange},
	store::{FileStore, TokenStore},
	transport::ReqwestTransport,
};

const TOKEN_BODY: &str = r#"{
	"access_token": "access-live",
	"refresh_token": "refresh-live",
	"token_type": "bearer",
	"expires_in": 3600
}"#;

fn facade() -> Arc<dyn TokenExchange> {
	Arc::new(OAuthFacade::reqwest(ReqwestHttpClient::default()))
}

fn client_credentials(server: &MockServer) -> Credential {
	serde_json::from_value(serde_json::json!({
		"type": "oauth2",
		"token_url": server.url("/token"),
		"client_id": "cli",
		"client_secret": "s3cret",
		"auth_style": "body",
		"scope": "pets:read"
	}))
	.expect("OAuth2 credential fixture should deserialize.")
}

#[tokio::test]
async fn concurrent_invocations_share_one_token_fetch() {
	let server = MockServer::start_async().await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.body_includes("grant_type=client_credentials")
				.body_includes("client_id=cli");
			then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
		})
		.await;
	let api = server
		.mock_async(|when, then| {
			when.method(GET).path("/pets").header("authorization", "Bearer access-live");
			then.status(200).body("[]");
		})
		.await;
	let engine = AuthEngine::builder(facade())
		.with_credential(CredentialId::primary(), client_credentials(&server))
		.build()
		.expect("Auth engine should build successfully.");
	let pipeline = Pipeline::builder(Arc::new(ReqwestTransport::default()))
		.with_auth(engine)
		.build();
	let url = server.url("/pets");
	let calls = (0..8).map(|_| {
		let pipeline = pipeline.clone();
		let url = url.clone();

		tokio::spawn(async move { pipeline.execute(request("pets.list", Method::Get, &url)).await })
	});

	for call in calls.collect::<Vec<_>>() {
		let response = call
			.await
			.expect("Invocation task should not panic.")
			.expect("Every invocation should be authorized.");

		assert_eq!(response.status, 200);
	}

	token.assert_calls_async(1).await;
	api.assert_calls_async(8).await;

	let metrics = pipeline.auth().refresh_metrics();

	assert_eq!(metrics.successes(), 1);
}

#[tokio::test]
async fn repeated_refresh_failures_invalidate_the_credential() {
	let server = MockServer::start_async().await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(401)
				.header("content-type", "application/json")
				.body(r#"{"error":"invalid_client","error_description":"bad secret"}"#);
		})
		.await;
	let engine = AuthEngine::builder(facade())
		.with_credential(CredentialId::primary(), client_credentials(&server))
		.with_settings(AuthSettings { max_refresh_failures: 2, ..AuthSettings::default() })
		.build()
		.expect("Auth engine should build successfully.");
	let transport = Arc::new(RecordingTransport::new(200, b"[]".to_vec()));
	let pipeline = Pipeline::builder(transport.clone()).with_auth(engine).build();
	let url = server.url("/pets");

	for _ in 0..2 {
		let err = pipeline
			.execute(request("pets.list", Method::Get, &url))
			.await
			.expect_err("Rejected client should fail.");

		assert!(matches!(err, Error::Auth(AuthError::InvalidClient { .. })));
		assert_eq!(err.status(), Some(401));
	}

	let err = pipeline
		.execute(request("pets.list", Method::Get, &url))
		.await
		.expect_err("Exhausted credential should fail fast.");

	assert!(matches!(err, Error::Auth(AuthError::CredentialInvalidated { failures: 2, .. })));
	assert!(pipeline.auth().is_invalidated(&CredentialId::primary()));
	token.assert_calls_async(2).await;
	assert_eq!(transport.calls(), 0);

	pipeline.auth().reset(&CredentialId::primary()).await.expect("Reset should succeed.");

	assert!(!pipeline.auth().is_invalidated(&CredentialId::primary()));
}

#[tokio::test]
async fn pkce_flow_exchanges_code_with_verifier() {
	let server = MockServer::start_async().await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.body_includes("grant_type=authorization_code")
				.body_includes("code=auth-code")
				.body_includes("code_verifier=");
			then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
		})
		.await;
	let credential = serde_json::from_value::<Credential>(serde_json::json!({
		"type": "oauth2_pkce",
		"client_id": "cli",
		"authorization_url": server.url("/authorize"),
		"token_url": server.url("/token"),
		"redirect_uri": "http://localhost:8765/callback",
		"scope": "pets:read"
	}))
	.expect("PKCE credential fixture should deserialize.");
	let id = CredentialId::new("user").expect("Credential identifier should be valid.");
	let engine = AuthEngine::builder(facade())
		.with_credential(id.clone(), credential)
		.build()
		.expect("Auth engine should build successfully.");
	let url = engine.authorization_url(&id).expect("Authorization URL should be issued.");
	let pairs = url.query_pairs().into_owned().collect::<BTreeMap<_, _>>();

	assert_eq!(pairs.get("code_challenge_method").map(String::as_str), Some("S256"));
	assert_eq!(pairs.get("client_id").map(String::as_str), Some("cli"));
	assert_eq!(engine.pkce_phase(&id), Some(PkcePhase::AuthUrlIssued));

	let state = pairs.get("state").expect("Authorization URL should carry a state.");
	let issued = engine
		.complete_authorization(&id, "auth-code", state)
		.await
		.expect("Code exchange should succeed.");

	assert_eq!(issued.access_token.expose(), "access-live");
	assert_eq!(engine.pkce_phase(&id), Some(PkcePhase::Active));
	token.assert_calls_async(1).await;

	let descriptor = engine
		.authorize(request("me", Method::Get, "https://api.example.com/me"))
		.await
		.expect("Active credential should authorize.");

	assert_eq!(descriptor.header("authorization"), Some("Bearer access-live"));
}

#[tokio::test]
async fn persisted_tokens_skip_the_token_endpoint() {
	let server = MockServer::start_async().await;
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(TOKEN_BODY);
		})
		.await;
	let path = std::env::temp_dir()
		.join(format!("oapi-pipeline-tokens-{}", std::process::id()))
		.join("tokens.json");
	let build = || {
		let store: Arc<dyn TokenStore> =
			Arc::new(FileStore::open(&path).expect("Token store should open."));

		AuthEngine::builder(facade())
			.with_credential(CredentialId::primary(), client_credentials(&server))
			.with_store(store)
			.build()
			.expect("Auth engine should build successfully.")
	};
	let first = build();

	first
		.authorize(request("me", Method::Get, "https://api.example.com/me"))
		.await
		.expect("First engine should fetch a token.");
	first.persist().await.expect("Tokens should persist.");

	let second = build();
	let descriptor = second
		.authorize(request("me", Method::Get, "https://api.example.com/me"))
		.await
		.expect("Second engine should reuse the persisted token.");

	assert_eq!(descriptor.header("authorization"), Some("Bearer access-live"));
	token.assert_calls_async(1).await;

	let _ = std::fs::remove_dir_all(path.parent().expect("Token path should have a parent."));
}
