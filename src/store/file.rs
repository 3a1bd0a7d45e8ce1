//! Directory-backed [`RateStore`] keeping one JSON file per client identity.

// std
use std::{
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
};
// crates.io
use tokio::{fs as async_fs, io::AsyncWriteExt};
// self
use crate::{
	_prelude::*,
	auth,
	store::{RateRecord, RateStore, RecordScan, StoreError, StoreFuture},
};

const RECORD_EXTENSION: &str = "json";

/// On-disk shape of a record; `timestamp` is the window start in Unix milliseconds.
#[derive(Serialize, Deserialize)]
struct RecordFile {
	key: String,
	count: u64,
	timestamp: i64,
}
impl From<&RateRecord> for RecordFile {
	fn from(record: &RateRecord) -> Self {
		let millis = record.window_start.unix_timestamp_nanos() / 1_000_000;

		Self {
			key: record.key.clone(),
			count: record.count,
			timestamp: i64::try_from(millis).unwrap_or(i64::MAX),
		}
	}
}
impl TryFrom<RecordFile> for RateRecord {
	type Error = StoreError;

	fn try_from(file: RecordFile) -> Result<Self, Self::Error> {
		let window_start =
			OffsetDateTime::from_unix_timestamp_nanos(i128::from(file.timestamp) * 1_000_000)
				.map_err(|e| StoreError::Serialization {
					message: format!("Timestamp {} is out of range: {e}", file.timestamp),
				})?;

		Ok(Self { key: file.key, count: file.count, window_start })
	}
}

/// Persists rate records under a directory, one file per identity.
///
/// File names are the base64url SHA-256 of the identity so raw access tokens never touch the
/// filesystem namespace. Writes go through a temporary file followed by a rename.
#[derive(Clone, Debug)]
pub struct FileStore {
	dir: PathBuf,
}
impl FileStore {
	/// Opens (or creates) a store rooted at `dir`.
	pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let dir = dir.into();

		fs::create_dir_all(&dir).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", dir.display()),
		})?;

		Ok(Self { dir })
	}

	/// Directory the store writes into.
	pub fn dir(&self) -> &Path {
		&self.dir
	}

	fn path_for(&self, key: &str) -> PathBuf {
		self.dir.join(format!("{}.{RECORD_EXTENSION}", auth::fingerprint(key)))
	}

	async fn read_record(path: &Path) -> Result<Option<RateRecord>, StoreError> {
		let bytes = match async_fs::read(path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) => {
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", path.display()),
				});
			},
		};
		let file: RecordFile =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		RateRecord::try_from(file).map(Some)
	}

	async fn persist(&self, record: &RateRecord) -> Result<(), StoreError> {
		let path = self.path_for(&record.key);
		let serialized = serde_json::to_vec(&RecordFile::from(record)).map_err(|e| {
			StoreError::Serialization { message: format!("Failed to serialize record: {e}") }
		})?;
		let mut tmp_path = path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = async_fs::File::create(&tmp_path).await.map_err(|e| {
				StoreError::Backend { message: format!("Failed to create {}: {e}", tmp_path.display()) }
			})?;

			file.write_all(&serialized).await.map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().await.map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		async_fs::rename(&tmp_path, &path).await.map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", path.display()),
		})
	}
}
impl RateStore for FileStore {
	fn fetch<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<RateRecord>> {
		Box::pin(async move {
			let path = self.path_for(key);

			match Self::read_record(&path).await? {
				Some(record) if record.key != key => Err(StoreError::Serialization {
					message: format!("{} belongs to a different key", path.display()),
				}),
				found => Ok(found),
			}
		})
	}

	fn save(&self, record: RateRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.persist(&record).await })
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			let path = self.path_for(key);

			match async_fs::remove_file(&path).await {
				Ok(()) => Ok(true),
				Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
				Err(e) => Err(StoreError::Backend {
					message: format!("Failed to remove {}: {e}", path.display()),
				}),
			}
		})
	}

	fn records(&self) -> StoreFuture<'_, RecordScan> {
		Box::pin(async move {
			let mut entries = async_fs::read_dir(&self.dir).await.map_err(|e| {
				StoreError::Backend { message: format!("Failed to list {}: {e}", self.dir.display()) }
			})?;
			let mut scan = RecordScan::default();

			while let Some(entry) = entries.next_entry().await.map_err(|e| StoreError::Backend {
				message: format!("Failed to list {}: {e}", self.dir.display()),
			})? {
				let path = entry.path();

				if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
					continue;
				}

				match Self::read_record(&path).await {
					Ok(Some(record)) => scan.records.push(record),
					// Removed between listing and reading.
					Ok(None) => {},
					Err(e) => scan.unreadable.push((path.display().to_string(), e)),
				}
			}

			Ok(scan)
		})
	}
}
