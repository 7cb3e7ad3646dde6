use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error(transparent)]
	Json(#[from] serde_json::Error),
	#[error("no work available")]
	NoWork,
	#[error("lease lost")]
	LeaseLost,
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("unknown job status: {0}")]
	UnknownStatus(String),
}

/// Handler outcome for a failed job. `Retry` without a delay falls back to
/// the queue's exponential backoff; `Permanent` sends the job to the dead
/// letter state regardless of remaining attempts.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
	#[error("{message}")]
	Retry { message: String, after: Option<Duration> },
	#[error("{message}")]
	Permanent { message: String },
	#[error("handler canceled")]
	Canceled,
}
impl HandlerError {
	pub fn retry(err: impl std::fmt::Display) -> Self {
		Self::Retry { message: err.to_string(), after: None }
	}

	pub fn retry_after(err: impl std::fmt::Display, after: Duration) -> Self {
		Self::Retry { message: err.to_string(), after: Some(after) }
	}

	pub fn permanent(err: impl std::fmt::Display) -> Self {
		Self::Permanent { message: err.to_string() }
	}
}
