//! Per-identity admission control backed by durable rate records.
//!
//! [`RateLimiter::admit`] reads the caller's [`RateRecord`], compares the average request rate
//! since the window start with the configured ceiling, and persists the updated record before
//! answering. Every read-modify-write cycle holds a per-key async guard, so concurrent checks for
//! one identity are serialized while different identities never contend. The background sweep
//! (see [`RateLimiter::spawn_sweeper`]) takes the same guards before deleting expired records.

mod metrics;
mod sweep;

pub use metrics::AdmissionMetrics;
pub use sweep::SweepHandle;

// std
use std::net::IpAddr;
// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	config::{RateLimitConfig, WindowAnchor},
	error::ConfigError,
	obs::{self, RelaySpan, RelayStage, StageOutcome},
	store::{RateRecord, RateStore, StoreError},
};

/// Identity a request is accounted against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientIdentity {
	/// The session's current access token.
	AccessToken(TokenSecret),
	/// The connection's remote address.
	RemoteAddr(IpAddr),
}
impl ClientIdentity {
	/// Prefers the access token, then the remote address; `None` when neither is known.
	pub fn resolve(credential: Option<&Credential>, remote_addr: Option<IpAddr>) -> Option<Self> {
		match (credential, remote_addr) {
			(Some(credential), _) if !credential.access.is_empty() =>
				Some(Self::AccessToken(credential.access.clone())),
			(_, Some(addr)) => Some(Self::RemoteAddr(addr)),
			_ => None,
		}
	}

	/// Store key for the identity. Tokens are reduced to their fingerprint so raw secrets are
	/// never persisted or logged.
	pub fn key(&self) -> String {
		match self {
			Self::AccessToken(token) => format!("token:{}", token.fingerprint()),
			Self::RemoteAddr(addr) => format!("addr:{addr}"),
		}
	}
}

/// Why a request was not admitted.
#[derive(Clone, Debug, PartialEq)]
pub enum DenyReason {
	/// The key's average rate exceeds the configured ceiling.
	RateExceeded {
		/// Observed average requests per second.
		average_per_second: f64,
	},
	/// No identity could be resolved for the request.
	NoIdentity,
	/// The rate record could not be read or written; admission fails closed.
	StorageUnavailable,
}
impl DenyReason {
	/// Client-facing description used as the error envelope detail.
	pub const fn detail(&self) -> &'static str {
		match self {
			Self::RateExceeded { .. } => "Rate limit exceeded",
			Self::NoIdentity => "Client identity unavailable",
			Self::StorageUnavailable => "Rate limit state unavailable",
		}
	}
}

/// Admission decision for a single request.
#[derive(Clone, Debug, PartialEq)]
pub enum Admission {
	/// The request may proceed.
	Admitted,
	/// The request must be rejected.
	Denied(DenyReason),
}
impl Admission {
	/// Returns `true` for [`Admission::Admitted`].
	pub fn is_admitted(&self) -> bool {
		matches!(self, Self::Admitted)
	}
}

/// Average request rate of `record` as observed at `now`.
///
/// Elapsed time is rounded to whole seconds and floored at one second, so a burst inside the
/// first half second is measured as a one-second average instead of dividing by zero.
pub fn average_per_second(record: &RateRecord, now: OffsetDateTime) -> f64 {
	let elapsed_ms = record.age_at(now).whole_milliseconds() as f64;
	let elapsed_secs = (elapsed_ms / 1_000.).round().max(1.);

	record.count as f64 / elapsed_secs
}

/// Sliding-window rate limiter shared by every session.
pub struct RateLimiter {
	store: Arc<dyn RateStore>,
	config: RateLimitConfig,
	metrics: AdmissionMetrics,
	guards: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}
impl RateLimiter {
	/// Creates a limiter over `store` after validating `config`.
	pub fn new(store: Arc<dyn RateStore>, config: RateLimitConfig) -> Result<Self, ConfigError> {
		config.validate()?;

		Ok(Self { store, config, metrics: Default::default(), guards: Default::default() })
	}

	/// Active configuration.
	pub fn config(&self) -> &RateLimitConfig {
		&self.config
	}

	/// Admission counters.
	pub fn metrics(&self) -> &AdmissionMetrics {
		&self.metrics
	}

	/// Decides whether a request for `key` may proceed, using the current clock.
	pub async fn admit(&self, key: &str) -> Admission {
		self.admit_at(key, OffsetDateTime::now_utc()).await
	}

	/// Decides admission for a resolved client identity; requests without one are rejected.
	pub async fn admit_identity(&self, identity: Option<&ClientIdentity>) -> Admission {
		match identity {
			Some(identity) => self.admit(&identity.key()).await,
			None => {
				tracing::warn!("no client identity available, rejecting");
				self.metrics.record_denied();
				obs::record_stage_outcome(RelayStage::Admission, StageOutcome::Failure);

				Admission::Denied(DenyReason::NoIdentity)
			},
		}
	}

	/// Decides whether a request for `key` may proceed at `now`.
	pub async fn admit_at(&self, key: &str, now: OffsetDateTime) -> Admission {
		const STAGE: RelayStage = RelayStage::Admission;

		obs::record_stage_outcome(STAGE, StageOutcome::Attempt);

		let span = RelaySpan::new(STAGE, "admit");
		let guard = self.guard(key);
		let decision = span
			.instrument(async {
				let _held = guard.lock().await;

				self.decide(key, now).await
			})
			.await;

		self.release_guard(key, guard);

		let admission = match decision {
			Ok(admission) => admission,
			Err(e) => {
				tracing::error!(identity = key, error = %e, "rate record unavailable, rejecting");
				self.metrics.record_storage_failure();

				Admission::Denied(DenyReason::StorageUnavailable)
			},
		};

		match &admission {
			Admission::Admitted => {
				self.metrics.record_admitted();
				obs::record_stage_outcome(STAGE, StageOutcome::Success);
			},
			Admission::Denied(_) => {
				self.metrics.record_denied();
				obs::record_stage_outcome(STAGE, StageOutcome::Failure);
			},
		}

		admission
	}

	async fn decide(&self, key: &str, now: OffsetDateTime) -> Result<Admission, StoreError> {
		let existing = match self.store.fetch(key).await {
			Ok(existing) => existing,
			Err(e) if e.is_corrupt() => {
				tracing::warn!(identity = key, error = %e, "discarding unreadable rate record");

				None
			},
			Err(e) => return Err(e),
		};
		let record = match existing {
			None => RateRecord::first(key, now),
			Some(mut record) => {
				let average = average_per_second(&record, now);

				tracing::debug!(
					identity = key,
					count = record.count,
					average_per_second = average,
					max = self.config.max_requests_per_second,
					"rate limit check"
				);

				if average > self.config.max_requests_per_second {
					return Ok(Admission::Denied(DenyReason::RateExceeded {
						average_per_second: average,
					}));
				}

				record.count += 1;

				if self.config.anchor == WindowAnchor::Latest {
					record.window_start = now;
				}

				record
			},
		};

		self.store.save(record).await?;

		Ok(Admission::Admitted)
	}

	/// Returns (and creates on demand) the guard serializing work on `key`.
	fn guard(&self, key: &str) -> Arc<AsyncMutex<()>> {
		let mut guards = self.guards.lock();

		guards.entry(key.to_owned()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}

	/// Drops the caller's guard handle and forgets the guard when nobody else holds it.
	fn release_guard(&self, key: &str, guard: Arc<AsyncMutex<()>>) {
		drop(guard);

		let mut guards = self.guards.lock();

		if guards.get(key).is_some_and(|guard| Arc::strong_count(guard) == 1) {
			guards.remove(key);
		}
	}

	#[cfg(test)]
	fn tracked_guards(&self) -> usize {
		self.guards.lock().len()
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("config", &self.config)
			.field("metrics", &self.metrics)
			.finish()
	}
}
