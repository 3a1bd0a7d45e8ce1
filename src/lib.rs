//! Per-connection request relay: forwards client commands to a backend HTTP API, keeps each
//! connection's bearer credential fresh, and throttles clients through durable rate records.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod limiter;
pub mod obs;
pub mod refresh;
pub mod relay;
pub mod session;
pub mod store;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::net::{IpAddr, SocketAddr};
	// self
	use crate::{
		auth::{ConnectionId, Credential},
		config::{RateLimitConfig, RelayConfig},
		http::ReqwestHttpClient,
		limiter::RateLimiter,
		relay::RequestRelay,
		session::{Connection, SessionEvent},
		store::{MemoryStore, RateStore},
	};

	/// Relay type alias used by reqwest-backed integration tests.
	pub type ReqwestTestRelay = RequestRelay<ReqwestHttpClient>;

	/// [`Connection`] double that records every event pushed to it.
	#[derive(Debug)]
	pub struct RecordingConnection {
		id: ConnectionId,
		remote_addr: Option<IpAddr>,
		events: Mutex<Vec<SessionEvent>>,
	}
	impl RecordingConnection {
		/// Creates a connection with the provided identifier and remote address.
		pub fn new(id: &str, remote_addr: Option<IpAddr>) -> Arc<Self> {
			Arc::new(Self {
				id: ConnectionId::new(id).expect("Test connection identifier should be valid."),
				remote_addr,
				events: Mutex::new(Vec::new()),
			})
		}

		/// Returns a snapshot of the events received so far.
		pub fn events(&self) -> Vec<SessionEvent> {
			self.events.lock().clone()
		}

		/// Returns the credentials pushed through `CredentialUpdated` events.
		pub fn pushed_credentials(&self) -> Vec<Credential> {
			self.events()
				.into_iter()
				.filter_map(|event| match event {
					SessionEvent::CredentialUpdated(credential) => Some(credential),
					SessionEvent::CredentialCleared => None,
				})
				.collect()
		}
	}
	impl Connection for RecordingConnection {
		fn id(&self) -> &ConnectionId {
			&self.id
		}

		fn remote_addr(&self) -> Option<IpAddr> {
			self.remote_addr
		}

		fn notify(&self, event: SessionEvent) {
			self.events.lock().push(event);
		}
	}

	/// Builds an unsigned JWT-shaped token whose payload carries the provided `exp` claim.
	pub fn jwt_with_exp(exp: i64) -> String {
		use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

		let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
		let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{exp},\"sub\":\"user-1\"}}"));

		format!("{header}.{payload}.signature")
	}

	/// Plain-HTTP base URL for a mock server listening on `address`.
	pub fn mock_base_url(address: &SocketAddr) -> String {
		format!("http://{address}/")
	}

	/// Builds a relay config pointing at `base`, with a short request timeout for tests.
	pub fn test_relay_config(base: &str) -> RelayConfig {
		RelayConfig::builder(Url::parse(base).expect("Mock server URL should parse."))
			.request_timeout(Duration::seconds(2))
			.build()
			.expect("Test relay config should be valid.")
	}

	/// Constructs a reqwest-backed relay without rate limiting.
	pub fn build_reqwest_test_relay(base: &str) -> ReqwestTestRelay {
		RequestRelay::with_http_client(test_relay_config(base), ReqwestHttpClient::default())
	}

	/// Constructs a reqwest-backed relay with an in-memory rate limiter.
	pub fn build_limited_test_relay(
		base: &str,
		limits: RateLimitConfig,
	) -> (ReqwestTestRelay, Arc<RateLimiter>, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let store: Arc<dyn RateStore> = store_backend.clone();
		let limiter = Arc::new(
			RateLimiter::new(store, limits).expect("Test rate limit config should be valid."),
		);
		let relay = build_reqwest_test_relay(base).with_rate_limiter(limiter.clone());

		(relay, limiter, store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::{Map as JsonMap, Value as JsonValue};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
