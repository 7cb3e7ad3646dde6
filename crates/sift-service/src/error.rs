pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("unknown resource")]
	UnknownResource,
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Search backend error: {0}")]
	Search(String),
	#[error("Queue error: {0}")]
	Queue(String),
}
impl From<sift_storage::Error> for Error {
	fn from(err: sift_storage::Error) -> Self {
		match err {
			sift_storage::Error::Sqlx(inner) => Self::Storage(inner.to_string()),
			sift_storage::Error::InvalidArgument(message) => Self::InvalidArgument(message),
			sift_storage::Error::Json(inner) => Self::InvalidArgument(inner.to_string()),
			sift_storage::Error::Http(inner) => Self::Search(inner.to_string()),
			sift_storage::Error::NotFound(message) => Self::Search(format!("not found: {message}")),
			err @ sift_storage::Error::Backend { .. } => Self::Search(err.to_string()),
		}
	}
}
impl From<sift_queue::Error> for Error {
	fn from(err: sift_queue::Error) -> Self {
		Self::Queue(err.to_string())
	}
}
