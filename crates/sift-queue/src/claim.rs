use uuid::Uuid;

use crate::{
	Error, Job, Result, micros,
	types::{JOB_COLUMNS, job_from_row},
	worker::Worker,
};

impl Worker {
	/// Picks an unlocked group with a runnable queued job, preferring the
	/// group whose next ordering_seq is smallest, and takes its lease.
	pub(crate) async fn claim_group(&self) -> Result<String> {
		let lease_micros = micros(self.cfg.lease_duration);
		let mut tx = self.pool.begin().await?;
		let row: Option<(String,)> = sqlx::query_as(
			"\
WITH q AS (
	SELECT job_group, min(ordering_seq) AS next_seq
	FROM jobs
	WHERE status = 'queued' AND run_after <= now()
	GROUP BY job_group
),
candidate AS (
	SELECT g.job_group
	FROM job_groups g
	JOIN q ON q.job_group = g.job_group
	WHERE g.locked_until IS NULL OR g.locked_until < now()
	ORDER BY q.next_seq
	LIMIT 1
	FOR UPDATE SKIP LOCKED
)
UPDATE job_groups g
SET locked_by = $1,
	locked_until = now() + ($2::bigint * interval '1 microsecond'),
	updated_at = now()
FROM candidate c
WHERE g.job_group = c.job_group
RETURNING g.job_group",
		)
		.bind(&self.cfg.worker_id)
		.bind(lease_micros)
		.fetch_optional(&mut *tx)
		.await?;
		let Some((group,)) = row else {
			tx.commit().await?;

			return Err(Error::NoWork);
		};

		tx.commit().await?;

		Ok(group)
	}

	/// Claims the earliest queued runnable job in the group, verifying first
	/// that we still hold the group lease.
	pub(crate) async fn claim_next_job_in_group(&self, group: &str) -> Result<Job> {
		let lease_micros = micros(self.cfg.lease_duration);
		let mut tx = self.pool.begin().await?;
		let held: Option<(bool,)> = sqlx::query_as(
			"\
SELECT (locked_by = $1) AND (locked_until IS NOT NULL) AND (locked_until >= now())
FROM job_groups
WHERE job_group = $2
FOR UPDATE",
		)
		.bind(&self.cfg.worker_id)
		.bind(group)
		.fetch_optional(&mut *tx)
		.await?;

		match held {
			None => {
				tx.commit().await?;

				return Err(Error::NoWork);
			},
			Some((false,)) => {
				tx.commit().await?;

				return Err(Error::LeaseLost);
			},
			Some((true,)) => {},
		}

		let sql = format!(
			"\
UPDATE jobs
SET status = 'running',
	attempts = attempts + 1,
	locked_by = $1,
	locked_until = now() + ($2::bigint * interval '1 microsecond'),
	started_at = now()
WHERE id = (
	SELECT id
	FROM jobs
	WHERE job_group = $3
		AND status = 'queued'
		AND run_after <= now()
	ORDER BY ordering_seq
	LIMIT 1
	FOR UPDATE SKIP LOCKED
)
RETURNING {JOB_COLUMNS}"
		);
		let row = sqlx::query(&sql)
			.bind(&self.cfg.worker_id)
			.bind(lease_micros)
			.bind(group)
			.fetch_optional(&mut *tx)
			.await?;
		let Some(row) = row else {
			tx.commit().await?;

			return Err(Error::NoWork);
		};
		let job = job_from_row(&row)?;

		tx.commit().await?;

		Ok(job)
	}

	pub(crate) async fn release_group(&self, group: &str) -> Result<()> {
		sqlx::query(
			"\
UPDATE job_groups
SET locked_by = NULL,
	locked_until = NULL,
	updated_at = now()
WHERE job_group = $1 AND locked_by = $2",
		)
		.bind(group)
		.bind(&self.cfg.worker_id)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// Extends both leases. Returns false when either update touched zero
	/// rows, meaning the lease has been lost.
	pub(crate) async fn heartbeat(&self, group: &str, job_id: Uuid) -> Result<bool> {
		let lease_micros = micros(self.cfg.lease_duration);
		let group_rows = sqlx::query(
			"\
UPDATE job_groups
SET locked_until = now() + ($1::bigint * interval '1 microsecond'),
	updated_at = now()
WHERE job_group = $2 AND locked_by = $3",
		)
		.bind(lease_micros)
		.bind(group)
		.bind(&self.cfg.worker_id)
		.execute(&self.pool)
		.await?;

		if group_rows.rows_affected() == 0 {
			return Ok(false);
		}

		let job_rows = sqlx::query(
			"\
UPDATE jobs
SET locked_until = now() + ($1::bigint * interval '1 microsecond')
WHERE id = $2 AND locked_by = $3 AND status = 'running'",
		)
		.bind(lease_micros)
		.bind(job_id)
		.bind(&self.cfg.worker_id)
		.execute(&self.pool)
		.await?;

		Ok(job_rows.rows_affected() > 0)
	}
}
