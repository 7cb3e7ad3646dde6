//! Durable, at-least-once job queue on Postgres with strict per-group
//! ordering. Groups are leased by workers, leases are extended by heartbeats,
//! expired leases are reclaimed by the reaper, and completed rows are purged
//! by bounded cleanup. A single-writer leader elector hosts the maintenance
//! tasks.

pub mod api;
pub mod leader;
pub mod maintenance;
pub mod queue;
pub mod types;
pub mod worker;

mod claim;
mod error;
mod finish;

pub use error::{Error, HandlerError};
pub use queue::{EnqueueOptions, Queue};
pub use types::{Handler, Job, JobStatus};
pub use worker::{Worker, WorkerConfig};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn micros(duration: std::time::Duration) -> i64 {
	duration.as_micros().min(i64::MAX as u128) as i64
}
