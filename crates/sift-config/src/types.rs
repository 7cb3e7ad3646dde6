use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub schema_path: PathBuf,
	#[serde(default)]
	pub worker: Worker,
	#[serde(default)]
	pub leader: Leader,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub admin_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub elasticsearch: Elasticsearch,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Elasticsearch {
	pub url: String,
	pub username: Option<String>,
	pub password: Option<String>,
	/// Make every write immediately visible to search. Test environments only.
	#[serde(default)]
	pub refresh: bool,
	#[serde(default = "default_es_timeout_ms")]
	pub timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Worker {
	pub concurrency: usize,
	pub lease_secs: u64,
	pub heartbeat_secs: u64,
	pub poll_ms: u64,
	pub max_batch_per_group: usize,
	pub reap_secs: u64,
	pub clean_secs: u64,
	pub retain_succeeded_hours: u64,
	pub retain_dead_hours: u64,
	pub clean_batch_size: i64,
	pub max_batches_per_clean: i64,
	pub shutdown_grace_secs: u64,
}
impl Default for Worker {
	fn default() -> Self {
		Self {
			concurrency: 4,
			lease_secs: 30,
			heartbeat_secs: 5,
			poll_ms: 250,
			max_batch_per_group: 10,
			reap_secs: 30,
			clean_secs: 3_600,
			retain_succeeded_hours: 7 * 24,
			retain_dead_hours: 30 * 24,
			clean_batch_size: 1_000,
			max_batches_per_clean: 10,
			shutdown_grace_secs: 20,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Leader {
	pub lock_name: String,
	pub acquire_secs: u64,
	pub monitor_secs: u64,
}
impl Default for Leader {
	fn default() -> Self {
		Self { lock_name: "sift-maintenance".to_string(), acquire_secs: 2, monitor_secs: 5 }
	}
}

fn default_es_timeout_ms() -> u64 {
	10_000
}
