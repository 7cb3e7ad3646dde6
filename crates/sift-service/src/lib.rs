//! The indexing pipeline. The register side validates change events, writes
//! the relation graph, and enqueues jobs keyed by `<type>|<id>` so everything
//! touching one resource runs in order. The handle side consumes those jobs,
//! reads the graph back, and rebuilds the denormalized search documents.

pub mod event;
pub mod payload;

mod error;
mod handle;
mod register;
mod search;

pub use error::{Error, Result};
pub use handle::IndexHandler;

use std::sync::Arc;

use serde_json::{Map, Value};
use time::OffsetDateTime;

use sift_queue::{EnqueueOptions, Queue};
use sift_schema::{FieldConfig, ResourceConfig, Schema};
use sift_storage::{db::Db, es::EsStore, models::Resource};

use crate::{
	event::{ChangeEvent, EventPayload},
	payload::JobPayload,
};

pub struct IndexService {
	pub(crate) schema: Schema,
	pub(crate) db: Db,
	pub(crate) es: EsStore,
	pub(crate) queue: Queue,
}
impl IndexService {
	pub fn new(schema: Schema, db: Db, es: EsStore, queue: Queue) -> Arc<Self> {
		Arc::new(Self { schema, db, es, queue })
	}

	pub fn schema(&self) -> &Schema {
		&self.schema
	}

	pub async fn publish(&self, event: ChangeEvent) -> Result<()> {
		let occurred_at = event.occurred_at.unwrap_or_else(OffsetDateTime::now_utc);

		match event.payload {
			EventPayload::Create(p) => self.register_create(occurred_at, p).await,
			EventPayload::Update(p) => self.register_update(occurred_at, p).await,
			EventPayload::Delete(p) => self.register_delete(occurred_at, p).await,
			EventPayload::AddRelation(p) => self.register_add_relation(occurred_at, p).await,
			EventPayload::RemoveRelation(p) => self.register_remove_relation(occurred_at, p).await,
			EventPayload::SetRelations(p) => self.register_set_relations(occurred_at, p).await,
		}
	}

	/// Applies events in order; the first failure fails the whole call.
	pub async fn publish_batch(&self, events: Vec<ChangeEvent>) -> Result<()> {
		for event in events {
			self.publish(event).await?;
		}

		Ok(())
	}

	pub(crate) fn verify_resource(&self, resource: &Resource) -> Result<&ResourceConfig> {
		if resource.r#type.is_empty() {
			return Err(Error::InvalidArgument("resource type is required".to_string()));
		}
		if resource.id.is_empty() {
			return Err(Error::InvalidArgument("resource id is required".to_string()));
		}

		self.schema.get(&resource.r#type).ok_or(Error::UnknownResource)
	}

	pub(crate) async fn enqueue_payload(
		&self,
		group: &str,
		occurred_at: OffsetDateTime,
		payload: &JobPayload,
	) -> Result<()> {
		let body = payload.to_value()?;

		self.queue
			.enqueue(group, payload.job_type(), occurred_at, &body, EnqueueOptions::default())
			.await?;

		Ok(())
	}
}

/// Serialization key: all jobs for one resource instance share a group.
pub(crate) fn group_key(resource: &Resource) -> String {
	format!("{}|{}", resource.r#type, resource.id)
}

/// Search collection backing a resource type.
pub(crate) fn collection(resource_type: &str) -> String {
	format!("{resource_type}_search")
}

/// Keeps only the declared fields; undeclared keys never reach the index.
pub(crate) fn project_fields(data: &Map<String, Value>, fields: &[FieldConfig]) -> Map<String, Value> {
	let mut projected = Map::new();

	for field in fields {
		if let Some(value) = data.get(&field.name) {
			projected.insert(field.name.clone(), value.clone());
		}
	}

	projected
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn group_key_joins_type_and_id() {
		assert_eq!(group_key(&Resource::new("a", "1")), "a|1");
	}

	#[test]
	fn collection_appends_search_suffix() {
		assert_eq!(collection("a"), "a_search");
	}

	#[test]
	fn projection_drops_undeclared_fields() {
		let mut data = Map::new();

		data.insert("field1".to_string(), Value::String("value1".to_string()));
		data.insert("rogue".to_string(), Value::String("nope".to_string()));

		let fields = vec![FieldConfig::named("field1"), FieldConfig::named("field2")];
		let projected = project_fields(&data, &fields);

		assert_eq!(projected.len(), 1);
		assert_eq!(projected["field1"], "value1");
	}
}
