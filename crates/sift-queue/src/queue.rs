use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{Error, Result};

pub const DEFAULT_MAX_ATTEMPTS: i32 = 5;

#[derive(Clone)]
pub struct Queue {
	pool: PgPool,
}
impl Queue {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &PgPool {
		&self.pool
	}

	/// Inserts a queued job and its group row (idempotently) in one
	/// transaction. Workers can observe the job only after the commit.
	pub async fn enqueue<P>(
		&self,
		job_group: &str,
		job_type: &str,
		occurred_at: OffsetDateTime,
		payload: &P,
		opts: EnqueueOptions,
	) -> Result<Uuid>
	where
		P: Serialize + ?Sized,
	{
		if job_group.is_empty() {
			return Err(Error::InvalidArgument("job group must not be empty".to_string()));
		}
		if job_type.is_empty() {
			return Err(Error::InvalidArgument("job type must not be empty".to_string()));
		}

		let payload = serde_json::to_value(payload)?;
		let max_attempts = opts.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
		let mut tx = self.pool.begin().await?;

		sqlx::query("INSERT INTO job_groups (job_group) VALUES ($1) ON CONFLICT (job_group) DO NOTHING")
			.bind(job_group)
			.execute(&mut *tx)
			.await?;

		let row: (Uuid,) = sqlx::query_as(
			"\
INSERT INTO jobs (job_group, type, occurred_at, run_after, status, payload, max_attempts)
VALUES ($1, $2, $3, COALESCE($4, now()), 'queued', $5, $6)
RETURNING id",
		)
		.bind(job_group)
		.bind(job_type)
		.bind(occurred_at)
		.bind(opts.run_after)
		.bind(payload)
		.bind(max_attempts)
		.fetch_one(&mut *tx)
		.await?;

		tx.commit().await?;

		Ok(row.0)
	}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EnqueueOptions {
	pub run_after: Option<OffsetDateTime>,
	pub max_attempts: Option<i32>,
}
