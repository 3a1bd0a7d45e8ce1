//! Relay-level error types shared across stores, the refresher, and transports.

// self
use crate::_prelude::*;

/// Relay-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Canonical relay error exposed by public APIs.
///
/// None of these ever cross the [`RequestRelay`](crate::relay::RequestRelay) boundary; the relay
/// folds them into a [`RelayResponse`](crate::relay::RelayResponse) or logs them.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Token refresh endpoint failure.
	#[error(transparent)]
	Refresh(#[from] RefreshError),
}

/// Configuration and validation failures raised while assembling the relay.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A configured URL could not be parsed or joined.
	#[error("The {field} URL is invalid.")]
	InvalidUrl {
		/// Which configuration field failed.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// The backend base URL cannot carry relative paths.
	#[error("The backend URL must be an http(s) base URL: {url}.")]
	UnsupportedBaseUrl {
		/// Offending URL.
		url: String,
	},
	/// A path resolved to a URL outside the backend origin.
	#[error("The path {path} resolves outside the backend origin.")]
	ForeignOrigin {
		/// Offending path.
		path: String,
	},
	/// A duration that must be positive was zero or negative.
	#[error("The {field} duration must be positive.")]
	NonPositiveDuration {
		/// Which configuration field failed.
		field: &'static str,
	},
	/// The token skew must not be negative.
	#[error("The token skew must not be negative.")]
	NegativeSkew,
	/// The configured request rate is not a finite positive number.
	#[error("The maximum request rate must be a finite positive number, got {value}.")]
	InvalidRate {
		/// Offending rate.
		value: f64,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO, timeout).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the backend: {source}")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The call did not complete before the configured deadline.
	#[error("Request timed out after {after}.")]
	Timeout {
		/// Deadline that elapsed.
		after: Duration,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Failures talking to the token refresh endpoint.
#[derive(Debug, ThisError)]
pub enum RefreshError {
	/// The credential carries no refresh token.
	#[error("Credential is missing a refresh token.")]
	MissingRefreshToken,
	/// The endpoint answered with a non-success status.
	#[error("Token refresh endpoint rejected the request with status {status}.")]
	Rejected {
		/// HTTP status returned by the endpoint.
		status: u16,
	},
	/// The endpoint answered with a body that is not `{"access": ...}`.
	#[error("Token refresh endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
}
