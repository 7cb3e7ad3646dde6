use std::{
	sync::{Arc, Mutex},
	time::Duration,
};

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use sift_queue::leader::{LeaderElector, LeaderElectorConfig, LeadershipInfo, TaskErrorPolicy};

fn elector(dsn: &str, id: &str) -> Arc<LeaderElector> {
	let cfg = LeaderElectorConfig {
		id: id.to_string(),
		lock_name: "sift-test-maintenance".to_string(),
		acquire_interval: Duration::from_millis(50),
		monitor_interval: Duration::from_millis(200),
		..Default::default()
	};

	Arc::new(LeaderElector::new(dsn, cfg).expect("Failed to build elector."))
}

async fn wait_for<F>(what: &str, mut check: F)
where
	F: FnMut() -> bool,
{
	for _ in 0..200 {
		if check() {
			return;
		}

		tokio::time::sleep(Duration::from_millis(25)).await;
	}

	panic!("timed out waiting for {what}");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set SIFT_PG_DSN to run."]
async fn only_one_elector_leads_and_leadership_hands_over() {
	let Some(base_dsn) = sift_testkit::env_dsn() else {
		eprintln!("Skipping only_one_elector_leads; set SIFT_PG_DSN to run this test.");
		return;
	};
	let test_db = sift_testkit::TestDatabase::new(&base_dsn)
		.await
		.expect("Failed to create test database.");
	let first = elector(test_db.dsn(), "node-1");
	let second = elector(test_db.dsn(), "node-2");
	let first_cancel = CancellationToken::new();
	let second_cancel = CancellationToken::new();
	let first_run = tokio::spawn({
		let elector = first.clone();
		let cancel = first_cancel.clone();

		async move { elector.run(cancel).await }
	});

	{
		let first = first.clone();

		wait_for("first elector to lead", move || first.is_leader()).await;
	}

	let second_run = tokio::spawn({
		let elector = second.clone();
		let cancel = second_cancel.clone();

		async move { elector.run(cancel).await }
	});

	// The lock is taken; the contender must not become leader.
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert!(first.is_leader());
	assert!(!second.is_leader());

	// Stopping the holder releases the advisory lock with its session and the
	// contender takes over.
	first_cancel.cancel();
	first_run.await.expect("First elector task failed.");

	{
		let second = second.clone();

		wait_for("second elector to take over", move || second.is_leader()).await;
	}

	second_cancel.cancel();
	second_run.await.expect("Second elector task failed.");
	assert!(!second.is_leader());

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set SIFT_PG_DSN to run."]
async fn task_failure_drops_leadership_and_fires_hooks() {
	let Some(base_dsn) = sift_testkit::env_dsn() else {
		eprintln!("Skipping task_failure_drops_leadership_and_fires_hooks; set SIFT_PG_DSN.");
		return;
	};
	let test_db = sift_testkit::TestDatabase::new(&base_dsn)
		.await
		.expect("Failed to create test database.");
	let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
	let record = |events: &Arc<Mutex<Vec<String>>>, entry: String| {
		events.lock().unwrap_or_else(|err| err.into_inner()).push(entry);
	};
	let cfg = LeaderElectorConfig {
		id: "node-hooks".to_string(),
		lock_name: "sift-test-hooks".to_string(),
		acquire_interval: Duration::from_millis(50),
		monitor_interval: Duration::from_millis(200),
		task_error_policy: TaskErrorPolicy::DropLeadership,
		on_start_leading: Some(Box::new({
			let events = events.clone();

			move |info: LeadershipInfo| -> BoxFuture<'static, sift_queue::Result<()>> {
				record(&events, format!("start:{}", info.id));

				Box::pin(async { Ok(()) })
			}
		})),
		on_stop_leading: Some(Box::new({
			let events = events.clone();

			move |info: LeadershipInfo, reason: String| -> BoxFuture<'static, ()> {
				record(&events, format!("stop:{}:{reason}", info.id));

				Box::pin(async {})
			}
		})),
		..Default::default()
	};
	let elector =
		Arc::new(LeaderElector::new(test_db.dsn(), cfg).expect("Failed to build elector."));

	elector.add_task(
		"flaky",
		Box::new(|_cancel: CancellationToken| -> BoxFuture<'static, sift_queue::Result<()>> {
			Box::pin(async {
				tokio::time::sleep(Duration::from_millis(100)).await;

				Err(sift_queue::Error::InvalidArgument("boom".to_string()))
			})
		}),
	);

	let cancel = CancellationToken::new();
	let run = tokio::spawn({
		let elector = elector.clone();
		let cancel = cancel.clone();

		async move { elector.run(cancel).await }
	});

	// The task fails shortly after acquisition; leadership is dropped and
	// re-entered, firing the hooks each cycle.
	wait_for("hooks to fire", {
		let events = events.clone();

		move || {
			let events = events.lock().unwrap_or_else(|err| err.into_inner());

			events.iter().any(|e| e.starts_with("start:node-hooks"))
				&& events.iter().any(|e| e.contains("stop:node-hooks") && e.contains("flaky"))
		}
	})
	.await;

	cancel.cancel();
	run.await.expect("Elector task failed.");

	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
