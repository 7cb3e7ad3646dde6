//! Read-only introspection over the queue tables, for operators and the
//! admin HTTP surface.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	Job, JobStatus, Queue, Result, micros,
	types::{JOB_COLUMNS, job_from_row},
};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSort {
	OrderingAsc,
	#[default]
	OrderingDesc,
	StartedDesc,
	FinishedDesc,
}
impl JobSort {
	fn clause(&self) -> &'static str {
		match self {
			Self::OrderingAsc => " ORDER BY ordering_seq ASC",
			Self::OrderingDesc => " ORDER BY ordering_seq DESC",
			Self::StartedDesc => " ORDER BY started_at DESC NULLS LAST",
			Self::FinishedDesc => " ORDER BY finished_at DESC NULLS LAST",
		}
	}

	/// Column the since/until window applies to.
	fn time_column(&self) -> &'static str {
		match self {
			Self::StartedDesc => "started_at",
			Self::FinishedDesc => "finished_at",
			Self::OrderingAsc | Self::OrderingDesc => "ordering_seq",
		}
	}
}

#[derive(Clone, Debug, Default)]
pub struct JobFilter {
	pub job_group: Option<String>,
	pub job_type: Option<String>,
	pub statuses: Vec<JobStatus>,
	/// Matches `id::text ILIKE '<prefix>%'`.
	pub id_prefix: Option<String>,
	/// Matches `last_error ILIKE '%<needle>%'`.
	pub error_contains: Option<String>,
	pub locked_by: Option<String>,
	/// Running jobs whose lease has expired.
	pub expired_running: bool,
	pub since: Option<OffsetDateTime>,
	pub until: Option<OffsetDateTime>,
	pub limit: i64,
	pub offset: i64,
	pub include_payload: bool,
	pub sort: JobSort,
}

#[derive(Debug, Serialize)]
pub struct JobListPage {
	pub jobs: Vec<Job>,
	pub total: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct Counts {
	pub total: i64,
	pub by_status: HashMap<JobStatus, i64>,
}

#[derive(Debug, Serialize)]
pub struct TypeStatusCount {
	#[serde(rename = "type")]
	pub job_type: String,
	pub status: JobStatus,
	pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct GroupCounts {
	pub job_group: String,
	pub queued: i64,
	pub running: i64,
	pub dead: i64,
	/// The next queued job's occurred_at, to show backlog ordering.
	#[serde(with = "time::serde::rfc3339::option")]
	pub next_occurred_at: Option<OffsetDateTime>,
}

#[derive(Debug, Serialize)]
pub struct ErrorSummary {
	#[serde(rename = "type")]
	pub job_type: String,
	pub job_group: Option<String>,
	pub status: JobStatus,
	/// Short stable key (md5 prefix) so huge error strings group cleanly.
	pub error_key: String,
	pub error_text: String,
	pub count: i64,
	#[serde(with = "time::serde::rfc3339")]
	pub last_seen: OffsetDateTime,
}

impl Queue {
	pub async fn counts(&self, filter: &JobFilter) -> Result<Counts> {
		let mut total_query = QueryBuilder::<Postgres>::new("SELECT count(*) FROM jobs");

		push_filter(&mut total_query, filter, false);

		let total: i64 = total_query.build_query_scalar().fetch_one(self.pool()).await?;
		let mut status_query =
			QueryBuilder::<Postgres>::new("SELECT status, count(*) FROM jobs");

		push_filter(&mut status_query, filter, false);
		status_query.push(" GROUP BY status");

		let rows: Vec<(String, i64)> =
			status_query.build_query_as().fetch_all(self.pool()).await?;
		let mut by_status = HashMap::new();

		for (status, count) in rows {
			by_status.insert(JobStatus::parse(&status)?, count);
		}

		Ok(Counts { total, by_status })
	}

	pub async fn type_status_counts(
		&self,
		filter: &JobFilter,
		limit_types: i64,
	) -> Result<Vec<TypeStatusCount>> {
		let mut query =
			QueryBuilder::<Postgres>::new("SELECT type, status, count(*) FROM jobs");

		push_filter(&mut query, filter, false);

		if limit_types > 0 {
			// Keep only the busiest types.
			query.push(" AND type IN (SELECT type FROM jobs");
			push_filter(&mut query, filter, false);
			query.push(" GROUP BY type ORDER BY count(*) DESC LIMIT ");
			query.push_bind(limit_types);
			query.push(")");
		}

		query.push(" GROUP BY type, status ORDER BY type, status");

		let rows: Vec<(String, String, i64)> =
			query.build_query_as().fetch_all(self.pool()).await?;
		let mut out = Vec::with_capacity(rows.len());

		for (job_type, status, count) in rows {
			out.push(TypeStatusCount { job_type, status: JobStatus::parse(&status)?, count });
		}

		Ok(out)
	}

	/// Groups ordered by queued backlog.
	pub async fn list_groups(
		&self,
		job_type: Option<&str>,
		limit: i64,
		offset: i64,
	) -> Result<Vec<GroupCounts>> {
		let limit = limit.clamp(1, 500);
		let offset = offset.max(0);
		let mut query = QueryBuilder::<Postgres>::new(
			"\
SELECT
	g.job_group,
	COALESCE(SUM(CASE WHEN j.status = 'queued' THEN 1 ELSE 0 END), 0) AS queued,
	COALESCE(SUM(CASE WHEN j.status = 'running' THEN 1 ELSE 0 END), 0) AS running,
	COALESCE(SUM(CASE WHEN j.status = 'dead' THEN 1 ELSE 0 END), 0) AS dead,
	MIN(j.occurred_at) FILTER (WHERE j.status = 'queued') AS next_occurred_at
FROM job_groups g
LEFT JOIN jobs j ON j.job_group = g.job_group
WHERE 1 = 1",
		);

		if let Some(job_type) = job_type {
			query.push(
				" AND EXISTS (SELECT 1 FROM jobs j2 WHERE j2.job_group = g.job_group AND j2.type = ",
			);
			query.push_bind(job_type.to_string());
			query.push(")");
		}

		query.push(
			"\
 GROUP BY g.job_group
ORDER BY queued DESC, next_occurred_at ASC NULLS LAST, g.job_group
LIMIT ",
		);
		query.push_bind(limit);
		query.push(" OFFSET ");
		query.push_bind(offset);

		let rows: Vec<(String, i64, i64, i64, Option<OffsetDateTime>)> =
			query.build_query_as().fetch_all(self.pool()).await?;

		Ok(rows
			.into_iter()
			.map(|(job_group, queued, running, dead, next_occurred_at)| GroupCounts {
				job_group,
				queued,
				running,
				dead,
				next_occurred_at,
			})
			.collect())
	}

	/// Top errors of failed/dead jobs within the window, grouped by
	/// `(type[, group], status, md5(last_error))`.
	pub async fn recent_errors(
		&self,
		window: Duration,
		include_group: bool,
		limit: i64,
	) -> Result<Vec<ErrorSummary>> {
		let window = if window.is_zero() { Duration::from_secs(24 * 3_600) } else { window };
		let limit = limit.clamp(1, 500);
		let (select_cols, group_cols) = if include_group {
			("type, job_group, status", "type, job_group, status")
		} else {
			("type, NULL::text AS job_group, status", "type, status")
		};
		let sql = format!(
			"\
SELECT
	{select_cols},
	substr(md5(COALESCE(last_error, '')), 1, 12) AS error_key,
	left(COALESCE(last_error, ''), 240) AS error_text,
	count(*) AS cnt,
	max(finished_at) AS last_seen
FROM jobs
WHERE status IN ('failed', 'dead')
	AND finished_at IS NOT NULL
	AND finished_at >= now() - ($1::bigint * interval '1 microsecond')
	AND COALESCE(last_error, '') <> ''
GROUP BY {group_cols}, error_key, error_text
ORDER BY cnt DESC, last_seen DESC
LIMIT $2"
		);
		let rows: Vec<(String, Option<String>, String, String, String, i64, OffsetDateTime)> =
			sqlx::query_as(&sql)
				.bind(micros(window))
				.bind(limit)
				.fetch_all(self.pool())
				.await?;
		let mut out = Vec::with_capacity(rows.len());

		for (job_type, job_group, status, error_key, error_text, count, last_seen) in rows {
			out.push(ErrorSummary {
				job_type,
				job_group,
				status: JobStatus::parse(&status)?,
				error_key,
				error_text,
				count,
				last_seen,
			});
		}

		Ok(out)
	}

	pub async fn list_jobs(&self, filter: &JobFilter) -> Result<JobListPage> {
		let limit = filter.limit.clamp(1, 500);
		let offset = filter.offset.max(0);
		let mut total_query = QueryBuilder::<Postgres>::new("SELECT count(*) FROM jobs");

		push_filter(&mut total_query, filter, true);

		let total: i64 = total_query.build_query_scalar().fetch_one(self.pool()).await?;
		let columns = if filter.include_payload {
			JOB_COLUMNS.to_string()
		} else {
			JOB_COLUMNS.replace("payload,", "'null'::jsonb AS payload,")
		};
		let mut query = QueryBuilder::<Postgres>::new(format!("SELECT {columns} FROM jobs"));

		push_filter(&mut query, filter, true);
		query.push(filter.sort.clause());
		query.push(" LIMIT ");
		query.push_bind(limit);
		query.push(" OFFSET ");
		query.push_bind(offset);

		let rows = query.build().fetch_all(self.pool()).await?;
		let mut jobs = Vec::with_capacity(rows.len());

		for row in &rows {
			jobs.push(job_from_row(row)?);
		}

		Ok(JobListPage { jobs, total })
	}

	pub async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
		let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1");
		let row = sqlx::query(&sql).bind(id).fetch_optional(self.pool()).await?;

		row.as_ref().map(job_from_row).transpose()
	}

	/// Jobs that are still to be executed. Tests use this to drain.
	pub async fn active_count(&self) -> Result<i64> {
		let count: i64 =
			sqlx::query_scalar("SELECT count(*) FROM jobs WHERE status IN ('queued', 'running')")
				.fetch_one(self.pool())
				.await?;

		Ok(count)
	}
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &JobFilter, allow_time: bool) {
	query.push(" WHERE 1 = 1");

	if let Some(job_group) = &filter.job_group {
		query.push(" AND job_group = ");
		query.push_bind(job_group.clone());
	}
	if let Some(job_type) = &filter.job_type {
		query.push(" AND type = ");
		query.push_bind(job_type.clone());
	}
	if !filter.statuses.is_empty() {
		query.push(" AND status IN (");

		{
			let mut separated = query.separated(", ");

			for status in &filter.statuses {
				separated.push_bind(status.as_str());
			}
		}

		query.push(")");
	}
	if allow_time {
		let column = filter.sort.time_column();

		// The window only makes sense against a timestamp column.
		if column != "ordering_seq" {
			if let Some(since) = filter.since {
				query.push(format!(" AND {column} >= "));
				query.push_bind(since);
			}
			if let Some(until) = filter.until {
				query.push(format!(" AND {column} <= "));
				query.push_bind(until);
			}
		}
	}
	if let Some(id_prefix) = &filter.id_prefix {
		query.push(" AND id::text ILIKE ");
		query.push_bind(format!("{}%", id_prefix.trim()));
	}
	if let Some(error_contains) = &filter.error_contains {
		query.push(" AND COALESCE(last_error, '') ILIKE ");
		query.push_bind(format!("%{}%", error_contains.trim()));
	}
	if let Some(locked_by) = &filter.locked_by {
		query.push(" AND locked_by = ");
		query.push_bind(locked_by.trim().to_string());
	}
	if filter.expired_running {
		query.push(" AND status = 'running' AND locked_until IS NOT NULL AND locked_until < now()");
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sort_clauses_are_well_formed() {
		assert_eq!(JobSort::OrderingAsc.clause(), " ORDER BY ordering_seq ASC");
		assert_eq!(JobSort::FinishedDesc.time_column(), "finished_at");
		assert_eq!(JobSort::default(), JobSort::OrderingDesc);
	}

	#[test]
	fn filter_renders_every_condition() {
		let filter = JobFilter {
			job_group: Some("a|1".to_string()),
			job_type: Some("create".to_string()),
			statuses: vec![JobStatus::Queued, JobStatus::Dead],
			id_prefix: Some("abc".to_string()),
			error_contains: Some("timeout".to_string()),
			locked_by: Some("worker-1".to_string()),
			expired_running: true,
			..Default::default()
		};
		let mut query = QueryBuilder::<Postgres>::new("SELECT count(*) FROM jobs");

		push_filter(&mut query, &filter, true);

		let sql = query.sql();

		assert!(sql.contains("job_group = "));
		assert!(sql.contains("type = "));
		assert!(sql.contains("status IN ("));
		assert!(sql.contains("id::text ILIKE "));
		assert!(sql.contains("last_error, '') ILIKE "));
		assert!(sql.contains("locked_by = "));
		assert!(sql.contains("locked_until < now()"));
	}

	#[test]
	fn time_window_is_skipped_for_ordering_sorts() {
		let filter = JobFilter {
			since: Some(OffsetDateTime::UNIX_EPOCH),
			sort: JobSort::OrderingDesc,
			..Default::default()
		};
		let mut query = QueryBuilder::<Postgres>::new("SELECT count(*) FROM jobs");

		push_filter(&mut query, &filter, true);
		assert!(!query.sql().contains(">="));

		let filter = JobFilter { sort: JobSort::FinishedDesc, ..filter };
		let mut query = QueryBuilder::<Postgres>::new("SELECT count(*) FROM jobs");

		push_filter(&mut query, &filter, true);
		assert!(query.sql().contains("finished_at >= "));
	}
}
