//! Thread-safe in-memory [`RateStore`] implementation for single-process deployments and tests.

// self
use crate::{
	_prelude::*,
	store::{RateRecord, RateStore, RecordScan, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<String, RateRecord>>>;

/// Storage backend that keeps rate records in-process; state is lost on restart.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of records currently held.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no records are held.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	fn fetch_now(map: StoreMap, key: &str) -> Option<RateRecord> {
		map.read().get(key).cloned()
	}

	fn save_now(map: StoreMap, record: RateRecord) -> Result<(), StoreError> {
		map.write().insert(record.key.clone(), record);

		Ok(())
	}

	fn scan_now(map: StoreMap) -> RecordScan {
		RecordScan { records: map.read().values().cloned().collect(), unreadable: Vec::new() }
	}
}
impl RateStore for MemoryStore {
	fn fetch<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<RateRecord>> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::fetch_now(map, key)) })
	}

	fn save(&self, record: RateRecord) -> StoreFuture<'_, ()> {
		let map = self.0.clone();

		Box::pin(async move { Self::save_now(map, record) })
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().remove(key).is_some()) })
	}

	fn records(&self) -> StoreFuture<'_, RecordScan> {
		let map = self.0.clone();

		Box::pin(async move { Ok(Self::scan_now(map)) })
	}
}
