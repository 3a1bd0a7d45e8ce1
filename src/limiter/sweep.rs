// crates.io
use tokio::{
	task::JoinHandle,
	time::{self as tokio_time, Instant, MissedTickBehavior},
};
// self
use crate::{
	_prelude::*,
	limiter::RateLimiter,
	obs::{self, RelaySpan, RelayStage, StageOutcome},
	store::{RateRecord, StoreError},
};

/// Handle to the background sweep task; the task is aborted when the handle is dropped.
#[derive(Debug)]
pub struct SweepHandle {
	task: JoinHandle<()>,
}
impl SweepHandle {
	/// Returns `true` once the task has stopped.
	pub fn is_finished(&self) -> bool {
		self.task.is_finished()
	}
}
impl Drop for SweepHandle {
	fn drop(&mut self) {
		self.task.abort();
	}
}

impl RateLimiter {
	/// Deletes every record older than the retention window, using the current clock.
	pub async fn sweep(&self) -> Result<u64, StoreError> {
		self.sweep_at(OffsetDateTime::now_utc()).await
	}

	/// Deletes every record whose age at `now` exceeds the retention window.
	///
	/// Each candidate is re-read under its key guard before deletion, so a record refreshed by a
	/// concurrent admission survives. Unreadable entries are logged and left in place.
	pub async fn sweep_at(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
		const STAGE: RelayStage = RelayStage::Sweep;

		obs::record_stage_outcome(STAGE, StageOutcome::Attempt);

		let result = RelaySpan::new(STAGE, "sweep").instrument(self.sweep_inner(now)).await;

		match &result {
			Ok(removed) => {
				self.metrics.record_swept(*removed);
				obs::record_stage_outcome(STAGE, StageOutcome::Success);
			},
			Err(_) => obs::record_stage_outcome(STAGE, StageOutcome::Failure),
		}

		result
	}

	/// Starts the periodic sweep on the current tokio runtime.
	///
	/// The first sweep runs one interval after the call.
	pub fn spawn_sweeper(self: &Arc<Self>) -> SweepHandle {
		let limiter = Arc::clone(self);
		let period = self.config.sweep_interval.unsigned_abs();
		let task = tokio::spawn(async move {
			let mut ticker = tokio_time::interval_at(Instant::now() + period, period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				ticker.tick().await;

				match limiter.sweep().await {
					Ok(removed) => tracing::debug!(removed, "rate record sweep finished"),
					Err(e) => tracing::error!(error = %e, "rate record sweep failed"),
				}
			}
		});

		SweepHandle { task }
	}

	async fn sweep_inner(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
		let scan = self.store.records().await?;

		for (location, e) in &scan.unreadable {
			tracing::warn!(location = %location, error = %e, "skipping unreadable rate record");
		}

		let mut removed = 0;

		for candidate in scan.records.into_iter().filter(|record| self.is_expired(record, now)) {
			let key = candidate.key;
			let guard = self.guard(&key);
			let outcome = {
				let _held = guard.lock().await;

				match self.store.fetch(&key).await {
					Ok(Some(current)) if self.is_expired(&current, now) =>
						self.store.remove(&key).await,
					Ok(_) => Ok(false),
					Err(e) => Err(e),
				}
			};

			self.release_guard(&key, guard);

			match outcome {
				Ok(true) => removed += 1,
				Ok(false) => {},
				Err(e) => tracing::warn!(identity = %key, error = %e, "failed to purge rate record"),
			}
		}

		Ok(removed)
	}

	fn is_expired(&self, record: &RateRecord, now: OffsetDateTime) -> bool {
		record.age_at(now) > self.config.retention
	}
}
