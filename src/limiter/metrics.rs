// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for admission decisions and sweeps.
#[derive(Debug, Default)]
pub struct AdmissionMetrics {
	admitted: AtomicU64,
	denied: AtomicU64,
	storage_failures: AtomicU64,
	swept: AtomicU64,
}
impl AdmissionMetrics {
	/// Returns the number of admitted requests.
	pub fn admitted(&self) -> u64 {
		self.admitted.load(Ordering::Relaxed)
	}

	/// Returns the number of rejected requests (including storage failures).
	pub fn denied(&self) -> u64 {
		self.denied.load(Ordering::Relaxed)
	}

	/// Returns the number of admissions rejected because the store failed.
	pub fn storage_failures(&self) -> u64 {
		self.storage_failures.load(Ordering::Relaxed)
	}

	/// Returns the number of records deleted by sweeps.
	pub fn swept(&self) -> u64 {
		self.swept.load(Ordering::Relaxed)
	}

	pub(crate) fn record_admitted(&self) {
		self.admitted.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_denied(&self) {
		self.denied.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_storage_failure(&self) {
		self.storage_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_swept(&self, count: u64) {
		self.swept.fetch_add(count, Ordering::Relaxed);
	}
}
