use std::{
	collections::HashMap,
	sync::{
		Arc, Mutex,
		atomic::{AtomicBool, Ordering},
	},
	time::Duration,
};

use rand::Rng;
use sqlx::PgPool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

use crate::{Error, Handler, HandlerError, Job, Queue};

#[derive(Clone, Debug)]
pub struct WorkerConfig {
	pub worker_id: String,
	pub concurrency: usize,
	/// How long a group/job lease lasts without heartbeats.
	pub lease_duration: Duration,
	/// How often leases are extended while a job is running.
	pub heartbeat_interval: Duration,
	/// Base sleep when no work is found.
	pub poll_interval: Duration,
	/// How many jobs to run back-to-back while holding a group lease.
	pub max_batch_per_group: usize,
}
impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			worker_id: format!("worker-{}", Uuid::new_v4().simple()),
			concurrency: 4,
			lease_duration: Duration::from_secs(30),
			heartbeat_interval: Duration::from_secs(5),
			poll_interval: Duration::from_millis(250),
			max_batch_per_group: 10,
		}
	}
}

pub struct Worker {
	pub(crate) pool: PgPool,
	pub(crate) queue: Queue,
	pub(crate) handler: Arc<dyn Handler>,
	pub(crate) cfg: WorkerConfig,
	stop_fetch: AtomicBool,
	in_flight: Mutex<HashMap<Uuid, CancellationToken>>,
}
impl Worker {
	pub fn new(pool: PgPool, handler: Arc<dyn Handler>, cfg: WorkerConfig) -> Arc<Self> {
		Arc::new(Self {
			queue: Queue::new(pool.clone()),
			pool,
			handler,
			cfg,
			stop_fetch: AtomicBool::new(false),
			in_flight: Mutex::new(HashMap::new()),
		})
	}

	/// Runs `concurrency` fetch loops until the token fires or
	/// [`Worker::shutdown`] stops fetching. Blocks until every loop exits.
	pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
		let mut loops = JoinSet::new();

		for _ in 0..self.cfg.concurrency.max(1) {
			let worker = self.clone();
			let cancel = cancel.clone();

			loops.spawn(async move { worker.run_loop(cancel).await });
		}

		while loops.join_next().await.is_some() {}
	}

	/// Graceful shutdown: stop fetching, wait for in-flight jobs up to
	/// `grace`, then cancel the scopes of anything still running. Cancelled
	/// jobs are finalized as retry with zero delay.
	pub async fn shutdown(&self, grace: Duration) {
		self.stop_fetch.store(true, Ordering::SeqCst);

		let deadline = tokio::time::Instant::now() + grace;

		loop {
			let remaining = {
				let in_flight = self.in_flight.lock().unwrap_or_else(|err| err.into_inner());

				in_flight.len()
			};

			if remaining == 0 {
				return;
			}
			if tokio::time::Instant::now() >= deadline {
				warn!(remaining, "Shutdown deadline reached; cancelling in-flight jobs.");

				break;
			}

			tokio::time::sleep(Duration::from_millis(50)).await;
		}

		let in_flight = self.in_flight.lock().unwrap_or_else(|err| err.into_inner());

		for token in in_flight.values() {
			token.cancel();
		}
	}

	async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
		// Spread the loops out so they do not poll in lockstep.
		let startup = {
			let mut rng = rand::rng();

			self.cfg.poll_interval.mul_f64(rng.random::<f64>() / 2.0)
		};

		tokio::select! {
			_ = cancel.cancelled() => return,
			_ = tokio::time::sleep(startup) => {},
		}

		loop {
			if cancel.is_cancelled() || self.stop_fetch.load(Ordering::SeqCst) {
				return;
			}

			let group = match self.claim_group().await {
				Ok(group) => group,
				Err(Error::NoWork) => {
					sleep_with_jitter(&cancel, self.cfg.poll_interval, 0.3).await;

					continue;
				},
				Err(err) => {
					warn!(error = %err, "Group claim failed.");
					sleep_with_jitter(&cancel, self.cfg.poll_interval, 0.5).await;

					continue;
				},
			};

			// We hold the group lease; run up to max_batch_per_group jobs
			// back-to-back before giving other workers a chance.
			for _ in 0..self.cfg.max_batch_per_group {
				if cancel.is_cancelled() || self.stop_fetch.load(Ordering::SeqCst) {
					let _ = self.release_group(&group).await;

					return;
				}

				match self.claim_next_job_in_group(&group).await {
					Ok(job) => self.run_one(&cancel, &group, job).await,
					Err(Error::NoWork) => {
						let _ = self.release_group(&group).await;

						break;
					},
					Err(err) => {
						warn!(group, error = %err, "Job claim failed.");

						let _ = self.release_group(&group).await;

						break;
					},
				}
			}
		}
	}

	async fn run_one(self: &Arc<Self>, cancel: &CancellationToken, group: &str, job: Job) {
		let job_cancel = cancel.child_token();

		{
			let mut in_flight = self.in_flight.lock().unwrap_or_else(|err| err.into_inner());

			in_flight.insert(job.id, job_cancel.clone());
		}

		// Heartbeat task: extends both leases until the job scope ends. A
		// heartbeat that updates zero rows means the lease is gone; cancel
		// the handler and report the loss.
		let heartbeat = tokio::spawn({
			let worker = self.clone();
			let group = group.to_string();
			let job_id = job.id;
			let token = job_cancel.clone();

			async move {
				let mut ticker = tokio::time::interval(worker.cfg.heartbeat_interval);

				ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
				// The first tick completes immediately.
				ticker.tick().await;

				loop {
					tokio::select! {
						_ = token.cancelled() => return false,
						_ = ticker.tick() => match worker.heartbeat(&group, job_id).await {
							Ok(true) => {},
							Ok(false) => {
								token.cancel();

								return true;
							},
							Err(err) => {
								warn!(job = %job_id, group, error = %err, "Heartbeat failed.");
							},
						},
					}
				}
			}
		});

		let run_result = tokio::select! {
			result = self.handler.handle(job_cancel.clone(), job.clone()) => result,
			_ = job_cancel.cancelled() => Err(HandlerError::Canceled),
		};

		job_cancel.cancel();

		let lease_lost = heartbeat.await.unwrap_or(false);

		{
			let mut in_flight = self.in_flight.lock().unwrap_or_else(|err| err.into_inner());

			in_flight.remove(&job.id);
		}

		if lease_lost {
			// Another worker has likely taken over; the reaper or the new
			// holder finalizes the job.
			warn!(job = %job.id, group, "Lease lost while running job.");

			return;
		}

		match self.finish(group, &job, run_result).await {
			Ok(()) => {},
			Err(Error::LeaseLost) => warn!(job = %job.id, group, "Lease lost at finalization."),
			Err(err) => error!(job = %job.id, group, error = %err, "Job finalization failed."),
		}
	}
}

pub(crate) async fn sleep_with_jitter(cancel: &CancellationToken, base: Duration, pct: f64) {
	if base.is_zero() {
		return;
	}

	let factor = if pct > 0.0 {
		let mut rng = rand::rng();

		(1.0 - pct) + rng.random::<f64>() * 2.0 * pct
	} else {
		1.0
	};
	let duration = base.mul_f64(factor);

	tokio::select! {
		_ = cancel.cancelled() => {},
		_ = tokio::time::sleep(duration) => {},
	}
}
