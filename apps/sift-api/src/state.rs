use std::sync::Arc;

use sift_queue::Queue;
use sift_schema::Schema;
use sift_service::IndexService;
use sift_storage::{db::Db, es::EsStore};

#[derive(Clone)]
pub struct AppState {
	pub config: Arc<sift_config::Config>,
	pub service: Arc<IndexService>,
	pub queue: Queue,
}
impl AppState {
	pub async fn new(config: sift_config::Config) -> color_eyre::Result<Self> {
		let schema = Schema::load(&config.schema_path)?;

		for resource in schema.resources() {
			tracing::info!(
				resource = %resource.resource,
				fields = resource.fields.len(),
				relations = resource.relations.len(),
				"Loaded resource configuration.",
			);
		}

		let db = Db::connect(&config.storage.postgres).await?;

		db.ensure_schema().await?;

		let es = EsStore::new(&config.storage.elasticsearch)?;
		let queue = Queue::new(db.pool.clone());
		let service = IndexService::new(schema, db, es, queue.clone());

		Ok(Self { config: Arc::new(config), service, queue })
	}
}
