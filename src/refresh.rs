//! Access-token staleness checks and refresh-token exchange.
//!
//! [`CredentialRefresher::refresh_if_needed`] reads the `exp` claim of the access token and, once
//! the token is inside the configured skew of its expiry, exchanges the refresh token at the
//! backend's refresh endpoint. Failures never surface as errors to callers: a credential that
//! cannot be refreshed simply becomes absent, and the reason is logged.

mod metrics;

pub use metrics::RefreshMetrics;

// self
use crate::{
	_prelude::*,
	auth::{AccessClaims, Credential},
	config::RelayConfig,
	error::RefreshError,
	http::{self, Method, OutboundRequest, RelayHttpClient},
	obs::{self, RelaySpan, RelayStage, StageOutcome},
};

#[derive(Deserialize)]
struct RefreshResponse {
	access: String,
}

/// Keeps credentials usable by exchanging refresh tokens before access tokens expire.
pub struct CredentialRefresher<C>
where
	C: ?Sized + RelayHttpClient,
{
	http_client: Arc<C>,
	endpoint: Url,
	skew: Duration,
	timeout: Duration,
	metrics: RefreshMetrics,
}
impl<C> CredentialRefresher<C>
where
	C: ?Sized + RelayHttpClient,
{
	/// Creates a refresher that calls the endpoint, skew, and timeout from `config`.
	pub fn new(http_client: impl Into<Arc<C>>, config: &RelayConfig) -> Self {
		Self {
			http_client: http_client.into(),
			endpoint: config.refresh_endpoint.clone(),
			skew: config.token_skew,
			timeout: config.request_timeout,
			metrics: Default::default(),
		}
	}

	/// Refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Returns `true` when `credential` needs refreshing at `now`.
	///
	/// Tokens whose claims cannot be decoded, or that carry no representable `exp`, are always
	/// stale.
	pub fn is_stale_at(&self, credential: &Credential, now: OffsetDateTime) -> bool {
		match AccessClaims::decode(&credential.access) {
			Ok(claims) => match claims.expires_at().and_then(|exp| exp.checked_sub(self.skew)) {
				Some(deadline) => now.unix_timestamp() > deadline.unix_timestamp(),
				None => true,
			},
			Err(e) => {
				tracing::debug!(error = %e, "access token claims unreadable; treating as stale");

				true
			},
		}
	}

	/// Returns `credential` unchanged while it is fresh, a refreshed copy once it is stale, or
	/// `None` when a stale credential cannot be refreshed.
	pub async fn refresh_if_needed(&self, credential: Credential) -> Option<Credential> {
		self.refresh_if_needed_at(credential, OffsetDateTime::now_utc()).await
	}

	/// Same as [`refresh_if_needed`](Self::refresh_if_needed) with an explicit clock.
	pub async fn refresh_if_needed_at(
		&self,
		credential: Credential,
		now: OffsetDateTime,
	) -> Option<Credential> {
		const STAGE: RelayStage = RelayStage::Refresh;

		if !self.is_stale_at(&credential, now) {
			return Some(credential);
		}

		obs::record_stage_outcome(STAGE, StageOutcome::Attempt);

		let result =
			RelaySpan::new(STAGE, "refresh_if_needed").instrument(self.exchange(&credential)).await;

		match result {
			Ok(refreshed) => {
				obs::record_stage_outcome(STAGE, StageOutcome::Success);

				Some(refreshed)
			},
			Err(e) => {
				self.metrics.record_failure();
				obs::record_stage_outcome(STAGE, StageOutcome::Failure);
				tracing::warn!(
					access = %credential.access.fingerprint(),
					error = %e,
					"stale credential could not be refreshed"
				);

				None
			},
		}
	}

	/// Exchanges the refresh token of `credential` for a new access token.
	pub async fn exchange(&self, credential: &Credential) -> Result<Credential> {
		let refresh = credential.refresh_token().ok_or(RefreshError::MissingRefreshToken)?;

		self.metrics.record_attempt();

		let request = OutboundRequest::new(Method::Post, self.endpoint.clone())
			.with_json(serde_json::json!({ "refresh": refresh.expose() }));
		let response =
			http::execute_with_timeout(self.http_client.as_ref(), request, self.timeout).await?;

		if !response.is_success() {
			return Err(RefreshError::Rejected { status: response.status }.into());
		}

		let mut de = serde_json::Deserializer::from_slice(&response.body);
		let parsed: RefreshResponse = serde_path_to_error::deserialize(&mut de)
			.map_err(|source| RefreshError::ResponseParse { source })?;

		self.metrics.record_success();

		Ok(credential.with_access(parsed.access))
	}
}
impl<C> Debug for CredentialRefresher<C>
where
	C: ?Sized + RelayHttpClient,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialRefresher")
			.field("endpoint", &self.endpoint.as_str())
			.field("skew", &self.skew)
			.field("timeout", &self.timeout)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
	use serde_json::json;
	use time::macros;
	// self
	use super::*;
	use crate::{
		error::TransportError,
		http::{HttpFuture, OutboundResponse},
	};

	const NOW: OffsetDateTime = macros::datetime!(2025-06-01 12:00 UTC);

	/// Replies with a canned response and records every request body.
	struct ScriptedClient {
		status: u16,
		body: Vec<u8>,
		requests: Mutex<Vec<OutboundRequest>>,
	}
	impl ScriptedClient {
		fn new(status: u16, body: &str) -> Arc<Self> {
			Arc::new(Self { status, body: body.as_bytes().to_vec(), requests: Mutex::new(Vec::new()) })
		}

		fn calls(&self) -> usize {
			self.requests.lock().len()
		}
	}
	impl RelayHttpClient for ScriptedClient {
		fn execute(&self, request: OutboundRequest) -> HttpFuture<'_> {
			self.requests.lock().push(request);

			let response = OutboundResponse { status: self.status, body: self.body.clone() };

			Box::pin(async move { Ok::<_, TransportError>(response) })
		}
	}

	fn refresher(client: Arc<ScriptedClient>) -> CredentialRefresher<ScriptedClient> {
		let config = RelayConfig::builder(
			Url::parse("http://backend.test/").expect("Fixture URL should parse."),
		)
		.build()
		.expect("Fixture config should be valid.");

		CredentialRefresher::new(client, &config)
	}

	fn credential_expiring_at(exp: i64, refresh: &str) -> Credential {
		let claims = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp}}}"));

		Credential::new(format!("e30.{claims}.sig"), refresh)
	}

	#[test]
	fn staleness_honors_skew() {
		let refresher = refresher(ScriptedClient::new(200, "{}"));
		let now = NOW.unix_timestamp();

		assert!(!refresher.is_stale_at(&credential_expiring_at(now + 3_600, "r"), NOW));
		assert!(!refresher.is_stale_at(&credential_expiring_at(now + 3, "r"), NOW));
		assert!(refresher.is_stale_at(&credential_expiring_at(now + 2, "r"), NOW));
		assert!(refresher.is_stale_at(&credential_expiring_at(now - 10, "r"), NOW));
		assert!(refresher.is_stale_at(&Credential::new("opaque-token", "r"), NOW));
	}

	#[test]
	fn out_of_range_expiry_is_stale() {
		let refresher = refresher(ScriptedClient::new(200, "{}"));

		assert!(refresher.is_stale_at(&credential_expiring_at(i64::MIN + 2, "r"), NOW));
		assert!(refresher.is_stale_at(&credential_expiring_at(i64::MAX, "r"), NOW));
	}

	#[tokio::test]
	async fn fresh_credentials_skip_the_network() {
		let client = ScriptedClient::new(200, r#"{"access":"unused"}"#);
		let refresher = refresher(client.clone());
		let credential = credential_expiring_at(NOW.unix_timestamp() + 3_600, "refresh-1");
		let result = refresher.refresh_if_needed_at(credential.clone(), NOW).await;

		assert_eq!(result, Some(credential));
		assert_eq!(client.calls(), 0);
		assert_eq!(refresher.metrics().attempts(), 0);
	}

	#[tokio::test]
	async fn stale_credentials_keep_their_refresh_token() {
		let client = ScriptedClient::new(200, r#"{"access":"access-2"}"#);
		let refresher = refresher(client.clone());
		let credential = credential_expiring_at(NOW.unix_timestamp() - 60, "refresh-1");
		let result = refresher
			.refresh_if_needed_at(credential, NOW)
			.await
			.expect("Stale credential should be refreshed.");

		assert_eq!(result, Credential::new("access-2", "refresh-1"));

		let requests = client.requests.lock();

		assert_eq!(requests.len(), 1);
		assert_eq!(requests[0].method, Method::Post);
		assert_eq!(requests[0].url.as_str(), "http://backend.test/api/v1/token/refresh/");
		assert_eq!(requests[0].body, Some(json!({ "refresh": "refresh-1" })));
		assert!(requests[0].bearer.is_none());
		assert_eq!(refresher.metrics().successes(), 1);
	}

	#[tokio::test]
	async fn stale_credentials_without_refresh_token_become_absent() {
		let client = ScriptedClient::new(200, r#"{"access":"unused"}"#);
		let refresher = refresher(client.clone());
		let credential = credential_expiring_at(NOW.unix_timestamp() - 60, "");

		assert_eq!(refresher.refresh_if_needed_at(credential, NOW).await, None);
		assert_eq!(client.calls(), 0);
		assert_eq!(refresher.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn endpoint_failures_become_absent() {
		for (status, body) in [(401, r#"{"detail":"Token is invalid"}"#), (200, r#"{"token":1}"#)] {
			let client = ScriptedClient::new(status, body);
			let refresher = refresher(client.clone());
			let credential = credential_expiring_at(NOW.unix_timestamp() - 60, "refresh-1");

			assert_eq!(refresher.refresh_if_needed_at(credential, NOW).await, None);
			assert_eq!(client.calls(), 1, "No retry may follow a failed refresh.");
			assert_eq!(refresher.metrics().attempts(), 1);
			assert_eq!(refresher.metrics().failures(), 1);
		}
	}

	#[tokio::test]
	async fn exchange_reports_structured_errors() {
		let refresher = refresher(ScriptedClient::new(403, ""));
		let credential = credential_expiring_at(NOW.unix_timestamp() - 60, "refresh-1");
		let err = refresher.exchange(&credential).await.expect_err("Rejected refresh should fail.");

		assert!(matches!(err, Error::Refresh(RefreshError::Rejected { status: 403 })));

		let refresher = refresher_with_body(r#"{"access":42}"#);
		let err = refresher.exchange(&credential).await.expect_err("Malformed body should fail.");

		match err {
			Error::Refresh(RefreshError::ResponseParse { source }) =>
				assert_eq!(source.path().to_string(), "access"),
			other => panic!("Unexpected error: {other:?}"),
		}
	}

	fn refresher_with_body(body: &str) -> CredentialRefresher<ScriptedClient> {
		refresher(ScriptedClient::new(200, body))
	}
}
