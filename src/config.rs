//! Relay and rate-limit configuration with validation.

// std
use std::env;
// crates.io
use serde::{Deserializer, Serializer};
// self
use crate::{_prelude::*, error::ConfigError};

/// Environment variable holding the backend base URL.
pub const API_URL_ENV: &str = "API_URL";
/// Backend base URL used when [`API_URL_ENV`] is unset.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/";

/// Validated relay settings shared by every session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
	/// Backend base URL; always ends with `/`.
	pub api_base: Url,
	/// Prefix prepended to `query_api` endpoints (e.g. `api/v1/`).
	pub api_prefix: String,
	/// Backend path receiving `run_action` commands.
	pub action_path: String,
	/// Absolute token refresh endpoint.
	pub refresh_endpoint: Url,
	/// Deadline applied to every outbound call, including token refreshes.
	pub request_timeout: Duration,
	/// Leeway subtracted from token expiry so tokens refresh early.
	pub token_skew: Duration,
}
impl RelayConfig {
	/// Default `query_api` prefix.
	pub const DEFAULT_API_PREFIX: &'static str = "api/v1/";
	/// Default `run_action` path.
	pub const DEFAULT_ACTION_PATH: &'static str = "websocket/";
	/// Default token refresh path, relative to the base URL.
	pub const DEFAULT_REFRESH_PATH: &'static str = "api/v1/token/refresh/";
	/// Default outbound deadline.
	pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::seconds(10);
	/// Default expiry leeway.
	pub const DEFAULT_TOKEN_SKEW: Duration = Duration::seconds(3);

	/// Returns a builder seeded with the backend base URL.
	pub fn builder(api_base: Url) -> RelayConfigBuilder {
		RelayConfigBuilder::new(api_base)
	}

	/// Builds a config from the process environment ([`API_URL_ENV`]), defaults elsewhere.
	pub fn from_env() -> Result<Self, ConfigError> {
		let raw = env::var(API_URL_ENV).unwrap_or_else(|_| DEFAULT_API_URL.to_owned());
		let api_base = Url::parse(&raw)
			.map_err(|source| ConfigError::InvalidUrl { field: "api_base", source })?;

		Self::builder(api_base).build()
	}

	/// Resolves a backend path (already normalized, no leading slash) against the base URL.
	///
	/// Paths that resolve to another origin are rejected.
	pub fn backend_url(&self, path: &str) -> Result<Url, ConfigError> {
		let url = self
			.api_base
			.join(path)
			.map_err(|source| ConfigError::InvalidUrl { field: "path", source })?;

		if url.origin() != self.api_base.origin() {
			return Err(ConfigError::ForeignOrigin { path: path.to_owned() });
		}

		Ok(url)
	}
}

/// Builder for [`RelayConfig`] values.
#[derive(Debug)]
pub struct RelayConfigBuilder {
	api_base: Url,
	api_prefix: String,
	action_path: String,
	refresh_path: String,
	request_timeout: Duration,
	token_skew: Duration,
}
impl RelayConfigBuilder {
	fn new(api_base: Url) -> Self {
		Self {
			api_base,
			api_prefix: RelayConfig::DEFAULT_API_PREFIX.into(),
			action_path: RelayConfig::DEFAULT_ACTION_PATH.into(),
			refresh_path: RelayConfig::DEFAULT_REFRESH_PATH.into(),
			request_timeout: RelayConfig::DEFAULT_REQUEST_TIMEOUT,
			token_skew: RelayConfig::DEFAULT_TOKEN_SKEW,
		}
	}

	/// Overrides the `query_api` prefix.
	pub fn api_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.api_prefix = prefix.into();

		self
	}

	/// Overrides the `run_action` path.
	pub fn action_path(mut self, path: impl Into<String>) -> Self {
		self.action_path = path.into();

		self
	}

	/// Overrides the token refresh path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Overrides the outbound deadline.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Overrides the expiry leeway.
	pub fn token_skew(mut self, skew: Duration) -> Self {
		self.token_skew = skew;

		self
	}

	/// Consumes the builder and validates the resulting config.
	pub fn build(self) -> Result<RelayConfig, ConfigError> {
		let mut api_base = self.api_base;

		if !matches!(api_base.scheme(), "http" | "https") || api_base.cannot_be_a_base() {
			return Err(ConfigError::UnsupportedBaseUrl { url: api_base.to_string() });
		}
		if !api_base.path().ends_with('/') {
			let path = format!("{}/", api_base.path());

			api_base.set_path(&path);
		}
		if !self.request_timeout.is_positive() {
			return Err(ConfigError::NonPositiveDuration { field: "request_timeout" });
		}
		if self.token_skew.is_negative() {
			return Err(ConfigError::NegativeSkew);
		}

		let refresh_endpoint = api_base
			.join(self.refresh_path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidUrl { field: "refresh_path", source })?;
		let mut api_prefix = self.api_prefix.trim_matches('/').to_owned();

		if !api_prefix.is_empty() {
			api_prefix.push('/');
		}

		Ok(RelayConfig {
			api_base,
			api_prefix,
			action_path: self.action_path,
			refresh_endpoint,
			request_timeout: self.request_timeout,
			token_skew: self.token_skew,
		})
	}
}

/// How an admitted request moves a record's window start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowAnchor {
	/// Keep the window anchored at the first request until the sweep purges the record.
	First,
	/// Move the window start to every admitted request.
	#[default]
	Latest,
}

/// Rate limiter settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
	/// Highest sustained average rate a key may reach before being rejected.
	pub max_requests_per_second: f64,
	/// Records older than this are purged by the sweep.
	#[serde(with = "duration_secs")]
	pub retention: Duration,
	/// Period between sweeps.
	#[serde(with = "duration_secs")]
	pub sweep_interval: Duration,
	/// Window start policy for admitted requests.
	pub anchor: WindowAnchor,
}
impl RateLimitConfig {
	/// Placeholder rate (one request per ~1000 seconds); tune before production use.
	pub const DEFAULT_MAX_REQUESTS_PER_SECOND: f64 = 0.001;
	/// Default record retention.
	pub const DEFAULT_RETENTION: Duration = Duration::seconds(60);
	/// Default sweep period.
	pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::seconds(60);

	/// Overrides the maximum sustained rate.
	pub fn with_max_requests_per_second(mut self, rate: f64) -> Self {
		self.max_requests_per_second = rate;

		self
	}

	/// Overrides the window anchor policy.
	pub fn with_anchor(mut self, anchor: WindowAnchor) -> Self {
		self.anchor = anchor;

		self
	}

	/// Checks that every setting is usable.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if !self.max_requests_per_second.is_finite() || self.max_requests_per_second <= 0. {
			return Err(ConfigError::InvalidRate { value: self.max_requests_per_second });
		}
		if !self.retention.is_positive() {
			return Err(ConfigError::NonPositiveDuration { field: "retention" });
		}
		if !self.sweep_interval.is_positive() {
			return Err(ConfigError::NonPositiveDuration { field: "sweep_interval" });
		}

		Ok(())
	}
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self {
			max_requests_per_second: Self::DEFAULT_MAX_REQUESTS_PER_SECOND,
			retention: Self::DEFAULT_RETENTION,
			sweep_interval: Self::DEFAULT_SWEEP_INTERVAL,
			anchor: WindowAnchor::default(),
		}
	}
}

mod duration_secs {
	// self
	use super::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(value.whole_seconds())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::seconds)
	}
}
