mod types;

use std::{env, fs, path::Path};

use color_eyre::eyre;

pub use types::{Config, Elasticsearch, Leader, Postgres, Service, Storage, Worker};

pub fn load(path: &Path) -> color_eyre::Result<Config> {
	let raw = fs::read_to_string(path)?;

	let mut cfg: Config = toml::from_str(&raw)?;

	apply_env_overrides(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

/// Connection secrets can be supplied from the environment instead of the config file.
fn apply_env_overrides(cfg: &mut Config) {
	if let Ok(dsn) = env::var("SIFT_PG_DSN")
		&& !dsn.trim().is_empty()
	{
		cfg.storage.postgres.dsn = dsn;
	}
	if let Ok(url) = env::var("SIFT_ES_URL")
		&& !url.trim().is_empty()
	{
		cfg.storage.elasticsearch.url = url;
	}
	if let Ok(username) = env::var("SIFT_ES_USERNAME")
		&& !username.trim().is_empty()
	{
		cfg.storage.elasticsearch.username = Some(username);
	}
	if let Ok(password) = env::var("SIFT_ES_PASSWORD")
		&& !password.trim().is_empty()
	{
		cfg.storage.elasticsearch.password = Some(password);
	}
}

pub fn validate(cfg: &Config) -> color_eyre::Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(eyre::eyre!("service.http_bind must be non-empty."));
	}
	if cfg.service.admin_bind.trim().is_empty() {
		return Err(eyre::eyre!("service.admin_bind must be non-empty."));
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(eyre::eyre!("storage.postgres.dsn must be non-empty."));
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(eyre::eyre!("storage.postgres.pool_max_conns must be greater than zero."));
	}
	if cfg.storage.elasticsearch.url.trim().is_empty() {
		return Err(eyre::eyre!("storage.elasticsearch.url must be non-empty."));
	}
	if cfg.storage.elasticsearch.timeout_ms == 0 {
		return Err(eyre::eyre!("storage.elasticsearch.timeout_ms must be greater than zero."));
	}
	if cfg.schema_path.as_os_str().is_empty() {
		return Err(eyre::eyre!("schema_path must be non-empty."));
	}
	if cfg.worker.concurrency == 0 {
		return Err(eyre::eyre!("worker.concurrency must be greater than zero."));
	}
	if cfg.worker.lease_secs == 0 {
		return Err(eyre::eyre!("worker.lease_secs must be greater than zero."));
	}
	if cfg.worker.heartbeat_secs >= cfg.worker.lease_secs {
		return Err(eyre::eyre!("worker.heartbeat_secs must be less than worker.lease_secs."));
	}
	if cfg.worker.heartbeat_secs == 0 {
		return Err(eyre::eyre!("worker.heartbeat_secs must be greater than zero."));
	}
	if cfg.worker.poll_ms == 0 {
		return Err(eyre::eyre!("worker.poll_ms must be greater than zero."));
	}
	if cfg.worker.max_batch_per_group == 0 {
		return Err(eyre::eyre!("worker.max_batch_per_group must be greater than zero."));
	}
	if cfg.worker.retain_succeeded_hours == 0 {
		return Err(eyre::eyre!("worker.retain_succeeded_hours must be greater than zero."));
	}
	if cfg.worker.retain_dead_hours == 0 {
		return Err(eyre::eyre!("worker.retain_dead_hours must be greater than zero."));
	}
	if cfg.worker.clean_batch_size <= 0 {
		return Err(eyre::eyre!("worker.clean_batch_size must be greater than zero."));
	}
	if cfg.worker.max_batches_per_clean <= 0 {
		return Err(eyre::eyre!("worker.max_batches_per_clean must be greater than zero."));
	}
	if cfg.leader.lock_name.trim().is_empty() {
		return Err(eyre::eyre!("leader.lock_name must be non-empty."));
	}
	if cfg.leader.acquire_secs == 0 {
		return Err(eyre::eyre!("leader.acquire_secs must be greater than zero."));
	}
	if cfg.leader.monitor_secs == 0 {
		return Err(eyre::eyre!("leader.monitor_secs must be greater than zero."));
	}

	Ok(())
}
