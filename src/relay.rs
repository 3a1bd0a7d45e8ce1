//! Command relay shared by every session.
//!
//! Each command passes through four stages, in order:
//!
//! 1. admission against the [`RateLimiter`] (skipped when no limiter is configured),
//! 2. credential resolution through the session's [`CredentialStore`](crate::session::CredentialStore),
//! 3. dispatch to the backend, bounded by the configured request timeout,
//! 4. normalization of whatever happened into a [`RelayResponse`].
//!
//! None of these stages returns an error to the caller; every failure ends up in the envelope or
//! the log.

mod response;

pub use response::*;

// self
use crate::{
	_prelude::*,
	auth::CredentialPayload,
	config::RelayConfig,
	http::{self, Method, OutboundRequest, RelayHttpClient, UnsupportedMethod},
	limiter::{Admission, ClientIdentity, RateLimiter},
	obs::{self, RelaySpan, RelayStage, StageOutcome},
	refresh::CredentialRefresher,
	session::Session,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Payload key carrying the `query_api` method override.
pub const METHOD_KEY: &str = "method";

#[cfg(feature = "reqwest")]
/// Relay specialized for the crate's default reqwest transport.
pub type ReqwestRelay = RequestRelay<ReqwestHttpClient>;

/// Forwards client commands to the backend on behalf of sessions.
///
/// Cloning is cheap; clones share the transport, refresher, and rate limiter.
pub struct RequestRelay<C>
where
	C: ?Sized + RelayHttpClient,
{
	config: Arc<RelayConfig>,
	http_client: Arc<C>,
	refresher: Arc<CredentialRefresher<C>>,
	rate_limiter: Option<Arc<RateLimiter>>,
}
impl<C> RequestRelay<C>
where
	C: ?Sized + RelayHttpClient,
{
	/// Creates a relay over the caller-provided transport, with rate limiting disabled.
	pub fn with_http_client(config: RelayConfig, http_client: impl Into<Arc<C>>) -> Self {
		let http_client = http_client.into();
		let refresher = Arc::new(CredentialRefresher::new(http_client.clone(), &config));

		Self { config: Arc::new(config), http_client, refresher, rate_limiter: None }
	}

	/// Enables admission control through `limiter`.
	pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
		self.rate_limiter = Some(limiter);

		self
	}

	/// Active configuration.
	pub fn config(&self) -> &RelayConfig {
		&self.config
	}

	/// Credential refresher used for every session.
	pub fn refresher(&self) -> &CredentialRefresher<C> {
		&self.refresher
	}

	/// Rate limiter, when admission control is enabled.
	pub fn rate_limiter(&self) -> Option<&Arc<RateLimiter>> {
		self.rate_limiter.as_ref()
	}

	/// Posts `{action, data: payload}` to the backend's action path.
	pub async fn run_action(
		&self,
		session: &Session,
		action: &str,
		mut payload: JsonMap<String, JsonValue>,
	) -> RelayResponse {
		let supplied = CredentialPayload::take(&mut payload);
		let mut body = JsonMap::new();

		body.insert("action".into(), JsonValue::String(action.to_owned()));
		body.insert("data".into(), JsonValue::Object(payload));

		self.relay(session, Ok(Method::Post), &self.config.action_path, supplied, body).await
	}

	/// Calls `<api_prefix><endpoint>` with the method named by the payload's `method` key
	/// (`GET` by default).
	pub async fn query_api(
		&self,
		session: &Session,
		endpoint: &str,
		mut payload: JsonMap<String, JsonValue>,
	) -> RelayResponse {
		let supplied = CredentialPayload::take(&mut payload);
		let method = match payload.remove(METHOD_KEY) {
			None | Some(JsonValue::Null) => Ok(Method::Get),
			Some(JsonValue::String(raw)) => raw.parse(),
			Some(other) => Err(UnsupportedMethod(other.to_string())),
		};
		let path = format!("{}{}", self.config.api_prefix, endpoint.trim_start_matches('/'));

		self.relay(session, method, &path, supplied, payload).await
	}

	async fn relay(
		&self,
		session: &Session,
		method: Result<Method, UnsupportedMethod>,
		path: &str,
		supplied: CredentialPayload,
		payload: JsonMap<String, JsonValue>,
	) -> RelayResponse {
		let label = match &method {
			Ok(method) => method.as_str().to_owned(),
			Err(UnsupportedMethod(raw)) => raw.to_ascii_lowercase(),
		};

		if let Admission::Denied(reason) = self.admit(session).await {
			tracing::debug!(connection = %session.id(), detail = reason.detail(), "command rejected");

			return RelayResponse::failure(429, &label, reason.detail());
		}

		let credential = session.resolve_credential(supplied, &self.refresher).await;
		let method = match method {
			Ok(method) => method,
			Err(e) => {
				tracing::warn!(connection = %session.id(), error = %e, "command rejected");

				return RelayResponse::failure(500, &label, "Invalid method");
			},
		};
		let url = match self.config.backend_url(&normalize_path(path)) {
			Ok(url) => url,
			Err(e) => return RelayResponse::failure(500, &label, e.to_string()),
		};
		let request = OutboundRequest::new(method, url)
			.with_bearer(credential.map(|credential| credential.access).filter(|t| !t.is_empty()))
			.with_payload(payload);

		self.dispatch(request).await
	}

	async fn admit(&self, session: &Session) -> Admission {
		let Some(limiter) = self.rate_limiter.as_ref() else {
			return Admission::Admitted;
		};
		let held = session.credentials().current();
		let identity = ClientIdentity::resolve(held.as_ref(), session.remote_addr());

		limiter.admit_identity(identity.as_ref()).await
	}

	async fn dispatch(&self, request: OutboundRequest) -> RelayResponse {
		const STAGE: RelayStage = RelayStage::Dispatch;

		let method = request.method;
		let span = RelaySpan::new(STAGE, "dispatch");

		obs::record_stage_outcome(STAGE, StageOutcome::Attempt);
		tracing::debug!(%method, url = %request.url, "dispatching command");

		let result = span
			.instrument(http::execute_with_timeout(
				self.http_client.as_ref(),
				request,
				self.config.request_timeout,
			))
			.await;

		match result {
			Ok(response) if response.is_success() => {
				obs::record_stage_outcome(STAGE, StageOutcome::Success);

				RelayResponse::Success(response.json_body())
			},
			Ok(response) => {
				obs::record_stage_outcome(STAGE, StageOutcome::Failure);
				tracing::debug!(%method, status = response.status, "backend returned an error");

				RelayResponse::failure(response.status, method.as_str(), response.json_body())
			},
			Err(e) => {
				obs::record_stage_outcome(STAGE, StageOutcome::Failure);
				tracing::warn!(%method, error = %e, "backend call failed");

				RelayResponse::failure(500, method.as_str(), e.to_string())
			},
		}
	}
}
#[cfg(feature = "reqwest")]
impl RequestRelay<ReqwestHttpClient> {
	/// Creates a relay that provisions its own reqwest transport.
	pub fn new(config: RelayConfig) -> Self {
		Self::with_http_client(config, ReqwestHttpClient::default())
	}
}
impl<C> Clone for RequestRelay<C>
where
	C: ?Sized + RelayHttpClient,
{
	fn clone(&self) -> Self {
		Self {
			config: self.config.clone(),
			http_client: self.http_client.clone(),
			refresher: self.refresher.clone(),
			rate_limiter: self.rate_limiter.clone(),
		}
	}
}
impl<C> Debug for RequestRelay<C>
where
	C: ?Sized + RelayHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestRelay")
			.field("config", &self.config)
			.field("refresher", &self.refresher)
			.field("rate_limiter", &self.rate_limiter)
			.finish()
	}
}

/// Trims surrounding slashes and appends exactly one trailing slash.
fn normalize_path(path: &str) -> String {
	let trimmed = path.trim_matches('/');

	if trimmed.is_empty() { String::new() } else { format!("{trimmed}/") }
}

#[cfg(test)]
mod tests {
	// std
	use std::net::IpAddr;
	// crates.io
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
	use serde_json::json;
	// self
	use super::*;
	use crate::{
		auth::{ConnectionId, Credential},
		config::RateLimitConfig,
		error::TransportError,
		http::{HttpFuture, OutboundResponse},
		session::{Connection, SessionEvent},
		store::{MemoryStore, RateStore},
	};

	struct ScriptedClient {
		response: OutboundResponse,
		stall: bool,
		requests: Mutex<Vec<OutboundRequest>>,
	}
	impl ScriptedClient {
		fn new(status: u16, body: &str) -> Arc<Self> {
			Arc::new(Self {
				response: OutboundResponse { status, body: body.as_bytes().to_vec() },
				stall: false,
				requests: Mutex::new(Vec::new()),
			})
		}

		fn stalled() -> Arc<Self> {
			Arc::new(Self {
				response: OutboundResponse { status: 200, body: Vec::new() },
				stall: true,
				requests: Mutex::new(Vec::new()),
			})
		}

		fn requests(&self) -> Vec<OutboundRequest> {
			self.requests.lock().clone()
		}
	}
	impl RelayHttpClient for ScriptedClient {
		fn execute(&self, request: OutboundRequest) -> HttpFuture<'_> {
			self.requests.lock().push(request);

			let response = self.response.clone();
			let stall = self.stall;

			Box::pin(async move {
				if stall {
					tokio::time::sleep(std::time::Duration::from_secs(60)).await;
				}

				Ok::<_, TransportError>(response)
			})
		}
	}

	struct NullConnection {
		id: ConnectionId,
		addr: Option<IpAddr>,
		events: Mutex<Vec<SessionEvent>>,
	}
	impl Connection for NullConnection {
		fn id(&self) -> &ConnectionId {
			&self.id
		}

		fn remote_addr(&self) -> Option<IpAddr> {
			self.addr
		}

		fn notify(&self, event: SessionEvent) {
			self.events.lock().push(event);
		}
	}

	fn session(addr: Option<IpAddr>) -> Session {
		Session::new(Arc::new(NullConnection {
			id: ConnectionId::new("conn-1").expect("Connection id should be valid."),
			addr,
			events: Mutex::new(Vec::new()),
		}))
	}

	fn relay(client: Arc<ScriptedClient>) -> RequestRelay<ScriptedClient> {
		let config = RelayConfig::builder(
			Url::parse("http://backend.test/").expect("Fixture URL should parse."),
		)
		.build()
		.expect("Fixture config should be valid.");

		RequestRelay::with_http_client(config, client)
	}

	fn payload(value: JsonValue) -> JsonMap<String, JsonValue> {
		match value {
			JsonValue::Object(map) => map,
			other => panic!("Payload fixture must be an object, got {other}."),
		}
	}

	#[test]
	fn paths_are_normalized() {
		assert_eq!(normalize_path("/api/v1/items"), "api/v1/items/");
		assert_eq!(normalize_path("websocket/"), "websocket/");
		assert_eq!(normalize_path("//nested//"), "nested/");
		assert_eq!(normalize_path("/"), "");
	}

	#[tokio::test]
	async fn run_action_wraps_payload_and_strips_token() {
		let client = ScriptedClient::new(200, r#"{"ok":true}"#);
		let relay = relay(client.clone());
		let response = relay
			.run_action(
				&session(None),
				"fetch_profile",
				payload(json!({ "user": 7, "token": { "access": "a", "refresh": "" } })),
			)
			.await;

		assert_eq!(response, RelayResponse::Success(json!({ "ok": true })));

		let requests = client.requests();

		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0].method, Method::Post);
		assert_eq!(requests[0].url.as_str(), "http://backend.test/websocket/");
		assert_eq!(requests[0].body, Some(json!({ "action": "fetch_profile", "data": { "user": 7 } })));
	}

	#[tokio::test]
	async fn query_api_honors_method_override() {
		let client = ScriptedClient::new(201, "");
		let relay = relay(client.clone());
		let response = relay
			.query_api(&session(None), "/items", payload(json!({ "method": "PUT", "name": "chair" })))
			.await;

		assert_eq!(response, RelayResponse::Success(JsonValue::Null));

		let requests = client.requests();

		assert_eq!(requests[0].method, Method::Put);
		assert_eq!(requests[0].url.as_str(), "http://backend.test/api/v1/items/");
		assert_eq!(requests[0].body, Some(json!({ "name": "chair" })));
	}

	#[tokio::test]
	async fn unknown_methods_never_reach_the_backend() {
		let client = ScriptedClient::new(200, "{}");
		let relay = relay(client.clone());
		let response =
			relay.query_api(&session(None), "items", payload(json!({ "method": "PATCH" }))).await;

		assert_eq!(
			response,
			RelayResponse::Failure(ErrorEnvelope::new(500, "patch", "Invalid method"))
		);
		assert!(client.requests().is_empty());
	}

	#[tokio::test]
	async fn non_success_statuses_carry_the_backend_body() {
		let client = ScriptedClient::new(404, r#"{"detail":"Not found."}"#);
		let relay = relay(client);
		let response = relay.query_api(&session(None), "items/9", JsonMap::new()).await;

		assert_eq!(
			response,
			RelayResponse::Failure(ErrorEnvelope::new(404, "get", json!({ "detail": "Not found." })))
		);
	}

	#[tokio::test(start_paused = true)]
	async fn stalled_backends_time_out() {
		let relay = relay(ScriptedClient::stalled());
		let response = relay.query_api(&session(None), "slow", JsonMap::new()).await;
		let envelope = response.as_failure().expect("Stalled call should fail.");

		assert_eq!(envelope.status, 500);
		assert_eq!(envelope.error, "Unable to complete get request");
		assert_eq!(envelope.detail, json!("Request timed out after 10s."));
	}

	#[tokio::test]
	async fn held_credentials_are_sent_as_bearer() {
		let client = ScriptedClient::new(200, "[]");
		let relay = relay(client.clone());
		let session = session(None);
		let exp = OffsetDateTime::now_utc().unix_timestamp() + 3_600;
		let far_future = format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}")));

		session.credentials().replace_if_changed(Some(Credential::new(far_future.clone(), "r")));
		relay.query_api(&session, "items", JsonMap::new()).await;

		assert_eq!(
			client.requests()[0].bearer.as_ref().map(|token| token.expose().to_owned()),
			Some(far_future)
		);
	}

	#[tokio::test]
	async fn absolute_endpoints_never_leave_the_backend() {
		let client = ScriptedClient::new(200, "{}");
		let config = RelayConfig::builder(
			Url::parse("http://backend.test/").expect("Fixture URL should parse."),
		)
		.api_prefix("")
		.build()
		.expect("Fixture config should be valid.");
		let relay = RequestRelay::<ScriptedClient>::with_http_client(config, client.clone());
		let response =
			relay.query_api(&session(None), "https://attacker.test/collect", JsonMap::new()).await;
		let envelope = response.as_failure().expect("Foreign endpoint should fail.");

		assert_eq!(envelope.status, 500);
		assert_eq!(
			envelope.detail,
			json!("The path https://attacker.test/collect/ resolves outside the backend origin.")
		);
		assert!(client.requests().is_empty());
	}

	#[tokio::test]
	async fn rejected_admission_skips_credential_work_and_dispatch() {
		let client = ScriptedClient::new(200, "{}");
		let backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn RateStore> = backend.clone();
		let limiter = Arc::new(
			RateLimiter::new(store, RateLimitConfig::default())
				.expect("Limiter config should be valid."),
		);
		let relay = relay(client.clone()).with_rate_limiter(limiter);
		let session = session(Some(IpAddr::from([192, 0, 2, 1])));

		assert!(relay.query_api(&session, "items", JsonMap::new()).await.is_success());

		let response = relay
			.query_api(
				&session,
				"items",
				payload(json!({ "token": { "access": "expired", "refresh": "r" } })),
			)
			.await;

		assert_eq!(
			response,
			RelayResponse::Failure(ErrorEnvelope::new(429, "get", "Rate limit exceeded"))
		);
		assert_eq!(client.requests().len(), 1);
		assert_eq!(session.credentials().current(), None);
	}

	#[tokio::test]
	async fn sessions_without_identity_are_rejected_when_limited() {
		let client = ScriptedClient::new(200, "{}");
		let store: Arc<dyn RateStore> = Arc::new(MemoryStore::default());
		let limiter = Arc::new(
			RateLimiter::new(store, RateLimitConfig::default())
				.expect("Limiter config should be valid."),
		);
		let relay = relay(client.clone()).with_rate_limiter(limiter);
		let response = relay.run_action(&session(None), "ping", JsonMap::new()).await;

		assert_eq!(
			response,
			RelayResponse::Failure(ErrorEnvelope::new(
				429,
				"post",
				"Client identity unavailable"
			))
		);
		assert!(client.requests().is_empty());
	}
}
