// std
use std::net::IpAddr;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
// self
use session_relay::{
	_preludet::*,
	auth::Credential,
	relay::{ErrorEnvelope, RelayResponse},
	session::{Session, SessionRegistry},
};

fn payload(value: JsonValue) -> JsonMap<String, JsonValue> {
	match value {
		JsonValue::Object(map) => map,
		other => panic!("Payload fixture must be a JSON object, got {other}."),
	}
}

fn open_session(registry: &SessionRegistry, id: &str) -> (Arc<Session>, Arc<RecordingConnection>) {
	let connection = RecordingConnection::new(id, Some(IpAddr::from([127, 0, 0, 1])));
	let session = registry.open(connection.clone());

	(session, connection)
}

fn fresh_credential() -> Credential {
	let exp = OffsetDateTime::now_utc().unix_timestamp() + 3_600;

	Credential::new(jwt_with_exp(exp), "refresh-live")
}

#[tokio::test]
async fn run_action_posts_wrapped_payload_with_bearer() {
	let server = MockServer::start_async().await;
	let relay = build_reqwest_test_relay(&mock_base_url(server.address()));
	let registry = SessionRegistry::default();
	let (session, connection) = open_session(&registry, "conn-action");
	let credential = fresh_credential();
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/websocket/")
				.header("authorization", format!("Bearer {}", credential.access.expose()))
				.json_body(json!({ "action": "list_orders", "data": { "page": 2 } }));
			then.status(200).json_body(json!({ "orders": [1, 2, 3] }));
		})
		.await;
	let response = relay
		.run_action(
			&session,
			"list_orders",
			payload(json!({ "page": 2, "token": credential.to_json() })),
		)
		.await;

	mock.assert_async().await;

	assert_eq!(response, RelayResponse::Success(json!({ "orders": [1, 2, 3] })));
	assert_eq!(session.credentials().current(), Some(credential));
	assert!(connection.events().is_empty());
}

#[tokio::test]
async fn string_encoded_credentials_are_accepted() {
	let server = MockServer::start_async().await;
	let relay = build_reqwest_test_relay(&mock_base_url(server.address()));
	let registry = SessionRegistry::default();
	let (session, _) = open_session(&registry, "conn-cookie");
	let credential = fresh_credential();
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/api/v1/profile/")
				.header("authorization", format!("Bearer {}", credential.access.expose()));
			then.status(200).json_body(json!({ "name": "Ada" }));
		})
		.await;
	let response = relay
		.query_api(
			&session,
			"profile",
			payload(json!({ "token": credential.to_json().to_string() })),
		)
		.await;

	mock.assert_async().await;

	assert!(response.is_success());
}

#[tokio::test]
async fn query_api_sends_get_payload_as_query_parameters() {
	let server = MockServer::start_async().await;
	let relay = build_reqwest_test_relay(&mock_base_url(server.address()));
	let registry = SessionRegistry::default();
	let (session, _) = open_session(&registry, "conn-query");
	let mock = server
		.mock_async(|when, then| {
			when.method(GET)
				.path("/api/v1/products/")
				.query_param("category", "chairs")
				.query_param("limit", "10");
			then.status(200).body("plain text");
		})
		.await;
	let response = relay
		.query_api(&session, "//products", payload(json!({ "category": "chairs", "limit": 10 })))
		.await;

	mock.assert_async().await;

	assert_eq!(response, RelayResponse::Success(json!("plain text")));
}

#[tokio::test]
async fn query_api_method_override_is_case_insensitive() {
	let server = MockServer::start_async().await;
	let relay = build_reqwest_test_relay(&mock_base_url(server.address()));
	let registry = SessionRegistry::default();
	let (session, _) = open_session(&registry, "conn-delete");
	let mock = server
		.mock_async(|when, then| {
			when.method(DELETE).path("/api/v1/products/9/").query_param("hard", "true");
			then.status(204);
		})
		.await;
	let response = relay
		.query_api(&session, "products/9", payload(json!({ "method": "Delete", "hard": true })))
		.await;

	mock.assert_async().await;

	assert_eq!(response, RelayResponse::Success(JsonValue::Null));
}

#[tokio::test]
async fn backend_errors_are_wrapped_in_envelopes() {
	let server = MockServer::start_async().await;
	let relay = build_reqwest_test_relay(&mock_base_url(server.address()));
	let registry = SessionRegistry::default();
	let (session, _) = open_session(&registry, "conn-error");
	let _mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/v1/orders/");
			then.status(400).json_body(json!({ "quantity": ["Must be positive."] }));
		})
		.await;
	let response = relay
		.query_api(&session, "orders", payload(json!({ "method": "post", "quantity": -1 })))
		.await;

	assert_eq!(
		response,
		RelayResponse::Failure(ErrorEnvelope::new(
			400,
			"post",
			json!({ "quantity": ["Must be positive."] })
		))
	);
}

#[tokio::test]
async fn slow_backends_hit_the_request_timeout() {
	let server = MockServer::start_async().await;
	let relay = build_reqwest_test_relay(&mock_base_url(server.address()));
	let registry = SessionRegistry::default();
	let (session, _) = open_session(&registry, "conn-slow");
	let _mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/v1/reports/");
			then.status(200).delay(std::time::Duration::from_secs(5)).json_body(json!({}));
		})
		.await;
	let response = relay.query_api(&session, "reports", JsonMap::new()).await;
	let envelope = response.as_failure().expect("Slow backend should produce a failure.");

	assert_eq!(envelope.status, 500);
	assert_eq!(envelope.error, "Unable to complete get request");
	assert_eq!(envelope.detail, json!("Request timed out after 2s."));
}

#[tokio::test]
async fn unreachable_backends_produce_500_envelopes() {
	let relay = build_reqwest_test_relay("http://127.0.0.1:9/");
	let registry = SessionRegistry::default();
	let (session, _) = open_session(&registry, "conn-down");
	let response = relay.run_action(&session, "ping", JsonMap::new()).await;
	let envelope = response.as_failure().expect("Unreachable backend should produce a failure.");

	assert_eq!(envelope.status, 500);
	assert_eq!(envelope.error, "Unable to complete post request");
	assert!(
		envelope.detail.as_str().is_some_and(|detail| detail.starts_with("Network error")),
		"Unexpected detail: {}",
		envelope.detail
	);
}
