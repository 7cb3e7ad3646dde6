use std::time::Duration;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{Queue, Result, leader::LeaderTaskFn, micros, worker::sleep_with_jitter};

#[derive(Clone, Debug)]
pub struct MaintenanceConfig {
	pub reap_interval: Duration,
	pub clean_interval: Duration,
	pub retain_succeeded: Duration,
	pub retain_dead: Duration,
	pub clean_batch_size: i64,
	pub max_batches_per_clean: i64,
	pub jitter_pct: f64,
}
impl Default for MaintenanceConfig {
	fn default() -> Self {
		Self {
			reap_interval: Duration::from_secs(30),
			clean_interval: Duration::from_secs(3_600),
			retain_succeeded: Duration::from_secs(7 * 24 * 3_600),
			retain_dead: Duration::from_secs(30 * 24 * 3_600),
			clean_batch_size: 1_000,
			max_batches_per_clean: 10,
			jitter_pct: 0.2,
		}
	}
}

impl Queue {
	/// Requeues `running` jobs whose lease expired. The safety net for
	/// workers that died between claim and finalization.
	pub async fn reap_expired_running(&self) -> Result<u64> {
		let rows = sqlx::query(
			"\
UPDATE jobs
SET status = 'queued',
	locked_by = NULL,
	locked_until = NULL,
	run_after = now(),
	last_error = COALESCE(last_error, '') || ' | requeued after lease expiry'
WHERE status = 'running' AND locked_until IS NOT NULL AND locked_until < now()",
		)
		.execute(self.pool())
		.await?;
		let reaped = rows.rows_affected();

		if reaped > 0 {
			info!(count = reaped, "Requeued jobs with expired leases.");
		}

		Ok(reaped)
	}

	/// Deletes old completed jobs and empty groups in bounded batches so one
	/// tick can never run unboundedly or block workers.
	pub async fn cleanup_once(
		&self,
		retain_succeeded: Duration,
		retain_dead: Duration,
		batch_size: i64,
		max_batches: i64,
	) -> Result<()> {
		let batch_size = if batch_size <= 0 { 1_000 } else { batch_size };
		let max_batches = if max_batches <= 0 { 10 } else { max_batches };

		if !retain_succeeded.is_zero() {
			self.purge_jobs_by_retention("succeeded", retain_succeeded, batch_size, max_batches)
				.await?;
		}
		if !retain_dead.is_zero() {
			self.purge_jobs_by_retention("dead", retain_dead, batch_size, max_batches).await?;
		}

		self.purge_empty_groups(batch_size, max_batches).await
	}

	async fn purge_jobs_by_retention(
		&self,
		status: &str,
		retain: Duration,
		batch_size: i64,
		max_batches: i64,
	) -> Result<()> {
		let threshold_micros = micros(retain);

		for _ in 0..max_batches {
			let rows = sqlx::query(
				"\
DELETE FROM jobs
WHERE id IN (
	SELECT id
	FROM jobs
	WHERE status = $1
		AND finished_at IS NOT NULL
		AND finished_at < now() - ($2::bigint * interval '1 microsecond')
	ORDER BY finished_at
	LIMIT $3
	FOR UPDATE SKIP LOCKED
)",
			)
			.bind(status)
			.bind(threshold_micros)
			.bind(batch_size)
			.execute(self.pool())
			.await?;

			if rows.rows_affected() == 0 {
				return Ok(());
			}
		}

		Ok(())
	}

	/// A group row may go only when it is unlocked and no job references it.
	async fn purge_empty_groups(&self, batch_size: i64, max_batches: i64) -> Result<()> {
		for _ in 0..max_batches {
			let rows = sqlx::query(
				"\
DELETE FROM job_groups
WHERE job_group IN (
	SELECT job_group
	FROM job_groups
	WHERE (locked_until IS NULL OR locked_until < now())
		AND NOT EXISTS (
			SELECT 1 FROM jobs WHERE jobs.job_group = job_groups.job_group
		)
	LIMIT $1
	FOR UPDATE SKIP LOCKED
)",
			)
			.bind(batch_size)
			.execute(self.pool())
			.await?;

			if rows.rows_affected() == 0 {
				return Ok(());
			}
		}

		Ok(())
	}
}

/// Leader task running the reaper on an interval. Errors are logged and
/// retried next tick.
pub fn reaper_task(queue: Queue, cfg: MaintenanceConfig) -> LeaderTaskFn {
	Box::new(move |cancel: CancellationToken| -> BoxFuture<'static, Result<()>> {
		let queue = queue.clone();
		let cfg = cfg.clone();

		Box::pin(async move {
			loop {
				if cancel.is_cancelled() {
					return Ok(());
				}
				if let Err(err) = queue.reap_expired_running().await {
					warn!(error = %err, "Reaper tick failed.");
				}

				sleep_with_jitter(&cancel, cfg.reap_interval, cfg.jitter_pct).await;
			}
		})
	})
}

/// Leader task running bounded cleanup on an interval.
pub fn cleaner_task(queue: Queue, cfg: MaintenanceConfig) -> LeaderTaskFn {
	Box::new(move |cancel: CancellationToken| -> BoxFuture<'static, Result<()>> {
		let queue = queue.clone();
		let cfg = cfg.clone();

		Box::pin(async move {
			loop {
				if cancel.is_cancelled() {
					return Ok(());
				}
				if let Err(err) = queue
					.cleanup_once(
						cfg.retain_succeeded,
						cfg.retain_dead,
						cfg.clean_batch_size,
						cfg.max_batches_per_clean,
					)
					.await
				{
					warn!(error = %err, "Cleanup tick failed.");
				}

				sleep_with_jitter(&cancel, cfg.clean_interval, cfg.jitter_pct).await;
			}
		})
	})
}
