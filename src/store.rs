//! Storage contracts and built-in stores for per-client rate records.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::_prelude::*;

/// Boxed future returned by [`RateStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Durable backend contract for rate records.
///
/// Implementations only provide point lookup, point write, point delete, and enumeration; the
/// [`RateLimiter`](crate::limiter::RateLimiter) serializes read-modify-write cycles per key.
pub trait RateStore
where
	Self: Send + Sync,
{
	/// Fetches the record stored for `key`, if present.
	fn fetch<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<RateRecord>>;

	/// Persists or replaces the record for `record.key`.
	fn save(&self, record: RateRecord) -> StoreFuture<'_, ()>;

	/// Deletes the record for `key`, returning whether one existed.
	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;

	/// Enumerates every stored record.
	fn records(&self) -> StoreFuture<'_, RecordScan>;
}

/// Request-accounting state for one client identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateRecord {
	/// Client identity the record accounts for.
	pub key: String,
	/// Requests admitted inside the current window.
	pub count: u64,
	/// Instant the window is measured from.
	pub window_start: OffsetDateTime,
}
impl RateRecord {
	/// Creates the record for a key's first admitted request.
	pub fn first(key: impl Into<String>, now: OffsetDateTime) -> Self {
		Self { key: key.into(), count: 1, window_start: now }
	}

	/// Time elapsed since the window started, as observed at `now`.
	pub fn age_at(&self, now: OffsetDateTime) -> Duration {
		now - self.window_start
	}
}

/// Result of enumerating a store.
#[derive(Debug, Default)]
pub struct RecordScan {
	/// Records that decoded successfully.
	pub records: Vec<RateRecord>,
	/// Entries that could not be read, labelled by their storage location.
	pub unreadable: Vec<(String, StoreError)>,
}

/// Error type produced by [`RateStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Stored bytes could not be decoded or encoded.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
impl StoreError {
	/// Returns `true` when the failure stems from unreadable record contents rather than I/O.
	pub fn is_corrupt(&self) -> bool {
		matches!(self, Self::Serialization { .. })
	}
}
