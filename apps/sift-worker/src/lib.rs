//! Worker process: runs the queue consumer loops plus a leader-elected
//! maintenance host (reaper and cleanup). Exactly one worker process in a
//! deployment holds the maintenance lock at a time.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sift_queue::{
	Worker, WorkerConfig,
	leader::{LeaderElector, LeaderElectorConfig},
	maintenance::{self, MaintenanceConfig},
};
use sift_schema::Schema;
use sift_service::{IndexHandler, IndexService};
use sift_storage::{db::Db, es::EsStore};

#[derive(Debug, Parser)]
#[command(version, rename_all = "kebab")]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = sift_config::load(&args.config)?;
	let filter = EnvFilter::try_new(&config.service.log_level)
		.unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).init();

	let schema = Schema::load(&config.schema_path)?;
	let db = Db::connect(&config.storage.postgres).await?;

	db.ensure_schema().await?;

	let es = EsStore::new(&config.storage.elasticsearch)?;
	let queue = sift_queue::Queue::new(db.pool.clone());
	let service = IndexService::new(schema, db.clone(), es, queue.clone());
	let handler = IndexHandler::new(service);
	let worker_cfg = WorkerConfig {
		concurrency: config.worker.concurrency,
		lease_duration: Duration::from_secs(config.worker.lease_secs),
		heartbeat_interval: Duration::from_secs(config.worker.heartbeat_secs),
		poll_interval: Duration::from_millis(config.worker.poll_ms),
		max_batch_per_group: config.worker.max_batch_per_group,
		..Default::default()
	};
	let worker = Worker::new(db.pool.clone(), handler, worker_cfg);
	let maintenance_cfg = MaintenanceConfig {
		reap_interval: Duration::from_secs(config.worker.reap_secs),
		clean_interval: Duration::from_secs(config.worker.clean_secs),
		retain_succeeded: Duration::from_secs(config.worker.retain_succeeded_hours * 3_600),
		retain_dead: Duration::from_secs(config.worker.retain_dead_hours * 3_600),
		clean_batch_size: config.worker.clean_batch_size,
		max_batches_per_clean: config.worker.max_batches_per_clean,
		..Default::default()
	};
	let elector = LeaderElector::new(
		&config.storage.postgres.dsn,
		LeaderElectorConfig {
			lock_name: config.leader.lock_name.clone(),
			acquire_interval: Duration::from_secs(config.leader.acquire_secs),
			monitor_interval: Duration::from_secs(config.leader.monitor_secs),
			..Default::default()
		},
	)?;

	elector.add_task("reaper", maintenance::reaper_task(queue.clone(), maintenance_cfg.clone()));
	elector.add_task("cleaner", maintenance::cleaner_task(queue, maintenance_cfg));

	let cancel = CancellationToken::new();
	let worker_task = tokio::spawn(worker.clone().run(cancel.clone()));
	let elector_task = tokio::spawn({
		let cancel = cancel.clone();

		async move { elector.run(cancel).await }
	});

	info!(concurrency = config.worker.concurrency, "Worker running.");
	tokio::signal::ctrl_c().await?;
	info!("Shutting down.");

	// Stop fetching first and give in-flight jobs the grace window before
	// force-cancelling; cancelled jobs are requeued with zero delay.
	worker.shutdown(Duration::from_secs(config.worker.shutdown_grace_secs)).await;
	cancel.cancel();

	let _ = worker_task.await;
	let _ = elector_task.await;

	info!("Worker stopped.");

	Ok(())
}
