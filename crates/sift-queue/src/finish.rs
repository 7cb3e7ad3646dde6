use std::time::Duration;

use crate::{Error, HandlerError, Job, Result, micros, worker::Worker};

impl Worker {
	/// Finalizes a job in one transaction. Every update is gated on
	/// `locked_by = me AND status = 'running'` so a worker that lost its
	/// lease cannot overwrite another worker's decision.
	pub(crate) async fn finish(
		&self,
		group: &str,
		job: &Job,
		run_result: Result<(), HandlerError>,
	) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let held: Option<(bool,)> = sqlx::query_as(
			"\
SELECT (locked_by = $1) AND (locked_until IS NOT NULL) AND (locked_until >= now())
FROM job_groups
WHERE job_group = $2",
		)
		.bind(&self.cfg.worker_id)
		.bind(group)
		.fetch_optional(&mut *tx)
		.await?;

		if let Some((false,)) = held {
			tx.commit().await?;

			return Err(Error::LeaseLost);
		}

		let err = match run_result {
			Ok(()) => {
				let rows = sqlx::query(
					"\
UPDATE jobs
SET status = 'succeeded',
	finished_at = now(),
	locked_until = NULL
WHERE id = $1 AND locked_by = $2 AND status = 'running'",
				)
				.bind(job.id)
				.bind(&self.cfg.worker_id)
				.execute(&mut *tx)
				.await?;

				if rows.rows_affected() == 0 {
					tx.commit().await?;

					return Err(Error::LeaseLost);
				}

				tx.commit().await?;

				return Ok(());
			},
			Err(err) => err,
		};
		let rows = match disposition(&err, job.attempts, job.max_attempts) {
			Disposition::Dead =>
				sqlx::query(
					"\
UPDATE jobs
SET status = 'dead',
	finished_at = now(),
	last_error = $3,
	locked_until = NULL
WHERE id = $1 AND locked_by = $2 AND status = 'running'",
				)
				.bind(job.id)
				.bind(&self.cfg.worker_id)
				.bind(truncate_error(&err.to_string()))
				.execute(&mut *tx)
				.await?,
			Disposition::Requeue(delay) =>
				sqlx::query(
					"\
UPDATE jobs
SET status = 'queued',
	locked_by = NULL,
	locked_until = NULL,
	last_error = $3,
	run_after = now() + ($4::bigint * interval '1 microsecond')
WHERE id = $1 AND locked_by = $2 AND status = 'running'",
				)
				.bind(job.id)
				.bind(&self.cfg.worker_id)
				.bind(truncate_error(&err.to_string()))
				.bind(micros(delay))
				.execute(&mut *tx)
				.await?,
		};

		if rows.rows_affected() == 0 {
			tx.commit().await?;

			return Err(Error::LeaseLost);
		}

		tx.commit().await?;

		Ok(())
	}
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Disposition {
	Dead,
	Requeue(Duration),
}

/// Cancellation requeues immediately; a permanent marker or exhausted
/// attempts sends the job to the dead letter state. Attempts were already
/// incremented at claim time.
pub(crate) fn disposition(err: &HandlerError, attempts: i32, max_attempts: i32) -> Disposition {
	let (retry_after, permanent) = match err {
		HandlerError::Retry { after, .. } => (*after, false),
		HandlerError::Permanent { .. } => (None, true),
		HandlerError::Canceled => (Some(Duration::ZERO), false),
	};

	if permanent || attempts >= max_attempts {
		return Disposition::Dead;
	}

	Disposition::Requeue(retry_after.unwrap_or_else(|| default_backoff(attempts)))
}

/// Capped exponential backoff: 1s, 2s, 4s, ... up to 5 minutes.
pub(crate) fn default_backoff(attempt: i32) -> Duration {
	let exp = attempt.saturating_sub(1).clamp(0, 16) as u32;
	let delay = Duration::from_secs(1u64 << exp);

	delay.min(Duration::from_secs(300))
}

pub(crate) fn truncate_error(raw: &str) -> String {
	const MAX: usize = 2000;

	if raw.len() <= MAX {
		return raw.to_string();
	}

	let mut end = MAX;

	while !raw.is_char_boundary(end) {
		end -= 1;
	}

	format!("{}…", &raw[..end])
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn permanent_errors_go_dead_regardless_of_attempts() {
		let err = HandlerError::permanent("unknown resource");

		assert_eq!(disposition(&err, 1, 5), Disposition::Dead);
	}

	#[test]
	fn exhausted_attempts_go_dead() {
		let err = HandlerError::retry("connection refused");

		assert_eq!(disposition(&err, 5, 5), Disposition::Dead);
		assert_eq!(disposition(&err, 7, 5), Disposition::Dead);
	}

	#[test]
	fn cancellation_requeues_with_zero_delay() {
		assert_eq!(disposition(&HandlerError::Canceled, 1, 5), Disposition::Requeue(Duration::ZERO));
	}

	#[test]
	fn explicit_retry_delay_is_honored() {
		let err = HandlerError::retry_after("not ready yet", Duration::from_secs(90));

		assert_eq!(disposition(&err, 1, 5), Disposition::Requeue(Duration::from_secs(90)));
	}

	#[test]
	fn plain_retries_fall_back_to_exponential_backoff() {
		let err = HandlerError::retry("connection refused");

		assert_eq!(disposition(&err, 1, 5), Disposition::Requeue(Duration::from_secs(1)));
		assert_eq!(disposition(&err, 3, 5), Disposition::Requeue(Duration::from_secs(4)));
	}

	#[test]
	fn backoff_doubles_and_caps_at_five_minutes() {
		assert_eq!(default_backoff(1), Duration::from_secs(1));
		assert_eq!(default_backoff(2), Duration::from_secs(2));
		assert_eq!(default_backoff(3), Duration::from_secs(4));
		assert_eq!(default_backoff(9), Duration::from_secs(256));
		assert_eq!(default_backoff(10), Duration::from_secs(300));
		assert_eq!(default_backoff(100), Duration::from_secs(300));
	}

	#[test]
	fn backoff_tolerates_non_positive_attempts() {
		assert_eq!(default_backoff(0), Duration::from_secs(1));
		assert_eq!(default_backoff(-3), Duration::from_secs(1));
	}

	#[test]
	fn short_errors_are_kept_verbatim() {
		assert_eq!(truncate_error("boom"), "boom");
	}

	#[test]
	fn long_errors_are_truncated_to_2000_chars() {
		let raw = "x".repeat(5000);
		let truncated = truncate_error(&raw);

		assert_eq!(truncated.chars().count(), 2001);
		assert!(truncated.ends_with('…'));
	}

	#[test]
	fn truncation_respects_char_boundaries() {
		let raw = format!("{}é{}", "x".repeat(1999), "y".repeat(100));
		let truncated = truncate_error(&raw);

		assert!(truncated.len() <= 2004);
		assert!(truncated.ends_with('…'));
	}
}
