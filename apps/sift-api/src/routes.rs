use std::time::Duration;

use axum::{
	Json, Router,
	extract::{Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sift_queue::{JobStatus, api::{JobFilter, JobSort}};
use sift_service::event::ChangeEvent;
use sift_storage::search::{SearchRequest, SearchResponse};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/index/publish", post(publish))
		.route("/v1/index/publish_batch", post(publish_batch))
		.route("/v1/search", post(search))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new()
		.route("/v1/admin/queue/counts", get(queue_counts))
		.route("/v1/admin/queue/types", get(queue_type_counts))
		.route("/v1/admin/queue/groups", get(queue_groups))
		.route("/v1/admin/queue/errors", get(queue_errors))
		.route("/v1/admin/jobs", get(list_jobs))
		.route("/v1/admin/jobs/{id}", get(get_job))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

#[derive(Debug, Serialize)]
struct PublishResponse {}

async fn publish(
	State(state): State<AppState>,
	Json(event): Json<ChangeEvent>,
) -> Result<Json<PublishResponse>, ApiError> {
	state.service.publish(event).await?;

	Ok(Json(PublishResponse {}))
}

#[derive(Debug, Deserialize)]
struct PublishBatchRequest {
	#[serde(default)]
	events: Vec<ChangeEvent>,
}

async fn publish_batch(
	State(state): State<AppState>,
	Json(req): Json<PublishBatchRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
	state.service.publish_batch(req.events).await?;

	Ok(Json(PublishResponse {}))
}

async fn search(
	State(state): State<AppState>,
	Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
	let response = state.service.search(req).await?;

	Ok(Json(response))
}

#[derive(Debug, Default, Deserialize)]
struct QueueFilterQuery {
	group: Option<String>,
	r#type: Option<String>,
	/// Comma-separated list of statuses.
	statuses: Option<String>,
	id_prefix: Option<String>,
	error_contains: Option<String>,
	locked_by: Option<String>,
	#[serde(default)]
	expired_running: bool,
	/// RFC 3339 timestamps; applied to the active sort's time column.
	since: Option<String>,
	until: Option<String>,
	#[serde(default)]
	limit: i64,
	#[serde(default)]
	offset: i64,
	#[serde(default)]
	include_payload: bool,
	sort: Option<JobSort>,
	/// Only used by the type-counts endpoint.
	#[serde(default)]
	limit_types: i64,
}
impl QueueFilterQuery {
	fn into_filter(self) -> Result<JobFilter, ApiError> {
		let mut statuses = Vec::new();

		if let Some(raw) = &self.statuses {
			for part in raw.split(',') {
				let part = part.trim();

				if part.is_empty() {
					continue;
				}

				statuses.push(JobStatus::parse(part).map_err(|err| {
					ApiError::new(
						StatusCode::BAD_REQUEST,
						"invalid_argument",
						err.to_string(),
					)
				})?);
			}
		}

		Ok(JobFilter {
			job_group: self.group,
			job_type: self.r#type,
			statuses,
			id_prefix: self.id_prefix,
			error_contains: self.error_contains,
			locked_by: self.locked_by,
			expired_running: self.expired_running,
			since: parse_timestamp("since", self.since.as_deref())?,
			until: parse_timestamp("until", self.until.as_deref())?,
			limit: if self.limit > 0 { self.limit } else { 50 },
			offset: self.offset,
			include_payload: self.include_payload,
			sort: self.sort.unwrap_or_default(),
		})
	}
}

fn parse_timestamp(
	name: &str,
	raw: Option<&str>,
) -> Result<Option<time::OffsetDateTime>, ApiError> {
	let Some(raw) = raw else {
		return Ok(None);
	};

	time::OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339)
		.map(Some)
		.map_err(|err| {
			ApiError::new(
				StatusCode::BAD_REQUEST,
				"invalid_argument",
				format!("{name} must be an RFC 3339 timestamp: {err}"),
			)
		})
}

async fn queue_counts(
	State(state): State<AppState>,
	Query(query): Query<QueueFilterQuery>,
) -> Result<Json<sift_queue::api::Counts>, ApiError> {
	let filter = query.into_filter()?;
	let counts = state.queue.counts(&filter).await?;

	Ok(Json(counts))
}

async fn queue_type_counts(
	State(state): State<AppState>,
	Query(query): Query<QueueFilterQuery>,
) -> Result<Json<Vec<sift_queue::api::TypeStatusCount>>, ApiError> {
	let limit_types = query.limit_types;
	let filter = query.into_filter()?;
	let counts = state.queue.type_status_counts(&filter, limit_types).await?;

	Ok(Json(counts))
}

#[derive(Debug, Deserialize)]
struct GroupsQuery {
	r#type: Option<String>,
	#[serde(default)]
	limit: i64,
	#[serde(default)]
	offset: i64,
}

async fn queue_groups(
	State(state): State<AppState>,
	Query(query): Query<GroupsQuery>,
) -> Result<Json<Vec<sift_queue::api::GroupCounts>>, ApiError> {
	let limit = if query.limit > 0 { query.limit } else { 50 };
	let groups =
		state.queue.list_groups(query.r#type.as_deref(), limit, query.offset).await?;

	Ok(Json(groups))
}

#[derive(Debug, Deserialize)]
struct ErrorsQuery {
	#[serde(default)]
	window_hours: u64,
	#[serde(default)]
	include_group: bool,
	#[serde(default)]
	limit: i64,
}

async fn queue_errors(
	State(state): State<AppState>,
	Query(query): Query<ErrorsQuery>,
) -> Result<Json<Vec<sift_queue::api::ErrorSummary>>, ApiError> {
	let window = Duration::from_secs(query.window_hours * 3_600);
	let limit = if query.limit > 0 { query.limit } else { 50 };
	let errors = state.queue.recent_errors(window, query.include_group, limit).await?;

	Ok(Json(errors))
}

async fn list_jobs(
	State(state): State<AppState>,
	Query(query): Query<QueueFilterQuery>,
) -> Result<Json<sift_queue::api::JobListPage>, ApiError> {
	let filter = query.into_filter()?;
	let page = state.queue.list_jobs(&filter).await?;

	Ok(Json(page))
}

async fn get_job(
	State(state): State<AppState>,
	Path(id): Path<Uuid>,
) -> Result<Json<sift_queue::Job>, ApiError> {
	let job = state.queue.get_job(id).await?;
	let Some(job) = job else {
		return Err(ApiError::new(StatusCode::NOT_FOUND, "not_found", format!("job {id}")));
	};

	Ok(Json(job))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}
impl From<sift_service::Error> for ApiError {
	fn from(err: sift_service::Error) -> Self {
		match err {
			sift_service::Error::UnknownResource => Self::new(
				StatusCode::PRECONDITION_FAILED,
				"failed_precondition",
				"unknown resource",
			),
			sift_service::Error::InvalidArgument(message) =>
				Self::new(StatusCode::BAD_REQUEST, "invalid_argument", message),
			err => {
				tracing::error!(error = %err, "Request failed.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
			},
		}
	}
}
impl From<sift_queue::Error> for ApiError {
	fn from(err: sift_queue::Error) -> Self {
		match err {
			sift_queue::Error::InvalidArgument(message) =>
				Self::new(StatusCode::BAD_REQUEST, "invalid_argument", message),
			err => {
				tracing::error!(error = %err, "Admin request failed.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
			},
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}
