use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Row, postgres::PgRow};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{Error, HandlerError, Result};

pub(crate) const JOB_COLUMNS: &str = "\
id, job_group, type, ordering_seq, occurred_at, run_after, status, payload, \
attempts, max_attempts, locked_by, locked_until, started_at, finished_at, last_error";

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Queued,
	Running,
	Succeeded,
	Failed,
	Dead,
}
impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Queued => "queued",
			Self::Running => "running",
			Self::Succeeded => "succeeded",
			Self::Failed => "failed",
			Self::Dead => "dead",
		}
	}

	pub fn parse(raw: &str) -> Result<Self> {
		match raw {
			"queued" => Ok(Self::Queued),
			"running" => Ok(Self::Running),
			"succeeded" => Ok(Self::Succeeded),
			"failed" => Ok(Self::Failed),
			"dead" => Ok(Self::Dead),
			other => Err(Error::UnknownStatus(other.to_string())),
		}
	}
}
impl fmt::Display for JobStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct Job {
	pub id: Uuid,
	pub job_group: String,
	#[serde(rename = "type")]
	pub job_type: String,
	pub ordering_seq: i64,
	#[serde(with = "time::serde::rfc3339")]
	pub occurred_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub run_after: OffsetDateTime,
	pub status: JobStatus,
	pub payload: Value,
	pub attempts: i32,
	pub max_attempts: i32,
	pub locked_by: Option<String>,
	#[serde(with = "time::serde::rfc3339::option")]
	pub locked_until: Option<OffsetDateTime>,
	#[serde(with = "time::serde::rfc3339::option")]
	pub started_at: Option<OffsetDateTime>,
	#[serde(with = "time::serde::rfc3339::option")]
	pub finished_at: Option<OffsetDateTime>,
	pub last_error: Option<String>,
}

pub(crate) fn job_from_row(row: &PgRow) -> Result<Job> {
	let status: String = row.try_get("status")?;

	Ok(Job {
		id: row.try_get("id")?,
		job_group: row.try_get("job_group")?,
		job_type: row.try_get("type")?,
		ordering_seq: row.try_get("ordering_seq")?,
		occurred_at: row.try_get("occurred_at")?,
		run_after: row.try_get("run_after")?,
		status: JobStatus::parse(&status)?,
		payload: row.try_get("payload")?,
		attempts: row.try_get("attempts")?,
		max_attempts: row.try_get("max_attempts")?,
		locked_by: row.try_get("locked_by")?,
		locked_until: row.try_get("locked_until")?,
		started_at: row.try_get("started_at")?,
		finished_at: row.try_get("finished_at")?,
		last_error: row.try_get("last_error")?,
	})
}

/// Executes one job. The token is cancelled when the lease is lost or the
/// process shuts down; implementations should stop promptly once it fires.
#[async_trait]
pub trait Handler: Send + Sync {
	async fn handle(&self, cancel: CancellationToken, job: Job) -> Result<(), HandlerError>;
}
