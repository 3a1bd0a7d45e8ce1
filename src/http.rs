//! Transport primitives for backend and token-refresh calls.
//!
//! [`RelayHttpClient`] is the relay's only dependency on an HTTP stack. The relay and the
//! refresher hand it fully resolved [`OutboundRequest`]s and wrap every call in
//! [`execute_with_timeout`], so implementations do not need to enforce deadlines themselves.
//! Non-success statuses are returned as ordinary [`OutboundResponse`]s; only failures to obtain a
//! response at all surface as [`TransportError`].

// std
#[cfg(feature = "reqwest")] use std::ops::Deref;
// self
use crate::{_prelude::*, auth::TokenSecret, error::TransportError};

/// Boxed future returned by [`RelayHttpClient::execute`].
pub type HttpFuture<'a> =
	Pin<Box<dyn Future<Output = Result<OutboundResponse, TransportError>> + 'a + Send>>;

/// HTTP methods the relay forwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
	/// `GET`; the payload travels as query parameters.
	Get,
	/// `POST`; the payload travels as a JSON body.
	Post,
	/// `PUT`; the payload travels as a JSON body.
	Put,
	/// `DELETE`; the payload travels as query parameters.
	Delete,
}
impl Method {
	/// Lowercase label used in error envelopes.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "get",
			Self::Post => "post",
			Self::Put => "put",
			Self::Delete => "delete",
		}
	}

	/// Returns `true` when the payload is carried in the query string.
	pub const fn uses_query(self) -> bool {
		matches!(self, Self::Get | Self::Delete)
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
impl FromStr for Method {
	type Err = UnsupportedMethod;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"get" => Ok(Self::Get),
			"post" => Ok(Self::Post),
			"put" => Ok(Self::Put),
			"delete" => Ok(Self::Delete),
			_ => Err(UnsupportedMethod(s.to_owned())),
		}
	}
}

/// Error returned when a client asks for a method outside [`Method`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Unsupported HTTP method `{0}`.")]
pub struct UnsupportedMethod(pub String);

/// Fully resolved outbound call.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute target URL.
	pub url: Url,
	/// Bearer token attached as the `Authorization` header.
	pub bearer: Option<TokenSecret>,
	/// Query parameters appended to the URL.
	pub query: Vec<(String, String)>,
	/// JSON body.
	pub body: Option<JsonValue>,
}
impl OutboundRequest {
	/// Creates a request without credentials, query, or body.
	pub fn new(method: Method, url: Url) -> Self {
		Self { method, url, bearer: None, query: Vec::new(), body: None }
	}

	/// Attaches a bearer token.
	pub fn with_bearer(mut self, token: Option<TokenSecret>) -> Self {
		self.bearer = token;

		self
	}

	/// Places `payload` in the query string or body depending on the method.
	pub fn with_payload(mut self, payload: JsonMap<String, JsonValue>) -> Self {
		if self.method.uses_query() {
			self.query = payload
				.into_iter()
				.filter(|(_, value)| !value.is_null())
				.map(|(key, value)| match value {
					JsonValue::String(text) => (key, text),
					other => (key, other.to_string()),
				})
				.collect();
		} else {
			self.body = Some(JsonValue::Object(payload));
		}

		self
	}

	/// Sets a JSON body regardless of method.
	pub fn with_json(mut self, body: JsonValue) -> Self {
		self.body = Some(body);

		self
	}
}

/// Response returned by a [`RelayHttpClient`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundResponse {
	/// HTTP status code.
	pub status: u16,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl OutboundResponse {
	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Body as JSON: `null` when empty, a JSON string when the body is not JSON.
	pub fn json_body(&self) -> JsonValue {
		if self.body.is_empty() {
			return JsonValue::Null;
		}

		serde_json::from_slice(&self.body)
			.unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&self.body).into_owned()))
	}
}

/// Abstraction over HTTP transports able to execute relay calls.
pub trait RelayHttpClient
where
	Self: 'static + Send + Sync,
{
	/// Executes `request` and returns the backend's response, whatever its status.
	fn execute(&self, request: OutboundRequest) -> HttpFuture<'_>;
}

/// Runs `request` on `client`, abandoning it once `timeout` elapses.
pub async fn execute_with_timeout<C>(
	client: &C,
	request: OutboundRequest,
	timeout: Duration,
) -> Result<OutboundResponse, TransportError>
where
	C: ?Sized + RelayHttpClient,
{
	tokio::time::timeout(timeout.unsigned_abs(), client.execute(request))
		.await
		.map_err(|_| TransportError::Timeout { after: timeout })?
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestHttpClient {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestHttpClient {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl Deref for ReqwestHttpClient {
	type Target = ReqwestClient;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl RelayHttpClient for ReqwestHttpClient {
	fn execute(&self, request: OutboundRequest) -> HttpFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let method = match request.method {
				Method::Get => reqwest::Method::GET,
				Method::Post => reqwest::Method::POST,
				Method::Put => reqwest::Method::PUT,
				Method::Delete => reqwest::Method::DELETE,
			};
			let mut builder = client.request(method, request.url);

			if !request.query.is_empty() {
				builder = builder.query(&request.query);
			}
			if let Some(token) = request.bearer.as_ref() {
				builder = builder.bearer_auth(token.expose());
			}
			if let Some(body) = request.body.as_ref() {
				builder = builder.json(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let body = response.bytes().await?.to_vec();

			Ok(OutboundResponse { status, body })
		})
	}
}
