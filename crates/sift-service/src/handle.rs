//! Handle side: executed by queue workers. Handlers are idempotent and read
//! the relation graph instead of trusting the event payload, so re-delivery
//! and out-of-order sibling events converge on the same documents.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use sift_queue::{Handler, HandlerError, Job};
use sift_schema::ResourceConfig;
use sift_storage::{
	Error as StorageError,
	models::{Relation, Resource},
	relations,
};

use crate::{
	Error, IndexService, Result, collection, group_key,
	payload::{CreateJob, DeleteJob, JobPayload, RelationJob, UpdateJob},
	project_fields,
};

pub struct IndexHandler {
	service: Arc<IndexService>,
}
impl IndexHandler {
	pub fn new(service: Arc<IndexService>) -> Arc<Self> {
		Arc::new(Self { service })
	}
}
#[async_trait]
impl Handler for IndexHandler {
	async fn handle(&self, _cancel: CancellationToken, job: Job) -> Result<(), HandlerError> {
		let payload =
			JobPayload::decode(&job.job_type, &job.payload).map_err(HandlerError::permanent)?;
		let result = match payload {
			JobPayload::Create(p) => self.service.handle_create(job.occurred_at, p).await,
			JobPayload::Update(p) => self.service.handle_update(p).await,
			JobPayload::Delete(p) => self.service.handle_delete(p).await,
			JobPayload::AddRelation(p) => self.service.handle_add_relation(p).await,
			JobPayload::RemoveRelation(p) => self.service.handle_remove_relation(p).await,
		};

		result.map_err(|err| match err {
			// Validation failures re-detected here will not heal on retry.
			err @ (Error::UnknownResource | Error::InvalidArgument(_)) =>
				HandlerError::permanent(err),
			err => HandlerError::retry(err),
		})
	}
}

impl IndexService {
	pub(crate) async fn handle_create(
		&self,
		occurred_at: OffsetDateTime,
		p: CreateJob,
	) -> Result<()> {
		let cfg = self.verify_resource(&p.resource)?;
		// The child list comes from the store, not the payload: relations
		// registered before this resource existed (the reverse side of a
		// bidirectional create) must show up in the document too.
		let children = relations::get_children(&self.db, &p.resource).await?;
		let doc = self.build_document(cfg, &p.data, &children).await?;

		self.es.upsert(&collection(&p.resource.r#type), &p.resource.id, &doc).await?;
		info!(resource = %p.resource.r#type, id = %p.resource.id, "Indexed resource document.");

		// Each parent gets its own job so its document pulls this new child
		// in under the parent's own group ordering. Parents recorded at
		// register time are unioned with the ones in the store: a relation
		// written before this resource existed has no register-time record
		// here, yet its parent document must still be refreshed.
		let mut fan_out = p.parent_resources.clone();

		for parent in relations::get_parents(&self.db, &p.resource).await? {
			if !fan_out.contains(&parent) {
				fan_out.push(parent);
			}
		}
		for parent in &fan_out {
			let job = JobPayload::AddRelation(RelationJob {
				parent: parent.clone(),
				child: p.resource.clone(),
			});

			self.enqueue_payload(&group_key(parent), occurred_at, &job).await?;
		}

		Ok(())
	}

	pub(crate) async fn handle_update(&self, p: UpdateJob) -> Result<()> {
		let cfg = self.verify_resource(&p.resource)?;
		let projected = project_fields(&p.data, &cfg.fields);

		self.es
			.update_field(
				&collection(&p.resource.r#type),
				&p.resource.id,
				"fields",
				Value::Object(projected),
			)
			.await?;

		for parent in relations::get_parents(&self.db, &p.resource).await? {
			let Some(parent_cfg) = self.schema.get(&parent.r#type) else {
				warn!(parent = %parent.r#type, "Parent resource is not declared in the schema.");

				continue;
			};
			let Some(rel_cfg) = parent_cfg.get_relation(&p.resource.r#type) else {
				// The schema may have changed since the relation was written.
				warn!(
					parent = %parent.r#type,
					child = %p.resource.r#type,
					"Parent no longer declares a relation to this resource.",
				);

				continue;
			};
			let element = project_fields(&p.data, &rel_cfg.fields);
			let result = self
				.es
				.upsert_field_element_by_id(
					&collection(&parent.r#type),
					&parent.id,
					&p.resource.r#type,
					&p.resource.id,
					Value::Object(element),
				)
				.await;

			match result {
				Err(StorageError::NotFound(_)) => {
					// The parent document will inline this child when its own
					// create job runs.
					warn!(
						parent = %parent.r#type,
						parent_id = %parent.id,
						"Parent document missing in index; skipping.",
					);
				},
				other => other?,
			}
		}

		Ok(())
	}

	pub(crate) async fn handle_delete(&self, p: DeleteJob) -> Result<()> {
		self.verify_resource(&p.resource)?;
		self.es.delete(&collection(&p.resource.r#type), &p.resource.id).await?;

		for parent in relations::get_parents(&self.db, &p.resource).await? {
			let result = self
				.es
				.remove_field_element_by_id(
					&collection(&parent.r#type),
					&parent.id,
					&p.resource.r#type,
					&p.resource.id,
				)
				.await;

			match result {
				Err(StorageError::NotFound(_)) => {
					warn!(
						parent = %parent.r#type,
						parent_id = %parent.id,
						"Parent document missing in index; skipping.",
					);
				},
				other => other?,
			}
		}

		relations::remove_resource(&self.db, &p.resource).await?;
		info!(resource = %p.resource.r#type, id = %p.resource.id, "Removed resource from index.");

		Ok(())
	}

	pub(crate) async fn handle_add_relation(&self, p: RelationJob) -> Result<()> {
		let parent_cfg = self.verify_resource(&p.parent)?;

		// The register side may have been followed by a remove before this
		// job ran; a missing relation means there is nothing left to do.
		if !relations::relation_exists(
			&self.db,
			&Relation::new(p.parent.clone(), p.child.clone()),
		)
		.await?
		{
			info!(
				parent = %p.parent.r#type,
				parent_id = %p.parent.id,
				child = %p.child.r#type,
				child_id = %p.child.id,
				"Relation no longer present; skipping.",
			);

			return Ok(());
		}

		let Some(rel_cfg) = parent_cfg.get_relation(&p.child.r#type) else {
			warn!(
				parent = %p.parent.r#type,
				child = %p.child.r#type,
				"Parent no longer declares a relation to this resource.",
			);

			return Ok(());
		};
		let element = self.child_element(rel_cfg, &p.child).await?;
		let result = self
			.es
			.upsert_field_element_by_id(
				&collection(&p.parent.r#type),
				&p.parent.id,
				&p.child.r#type,
				&p.child.id,
				element,
			)
			.await;

		match result {
			Err(StorageError::NotFound(_)) => {
				// The parent's create job reads the relation store, so the
				// child lands in the document once that runs.
				warn!(
					parent = %p.parent.r#type,
					parent_id = %p.parent.id,
					"Parent document missing in index; skipping.",
				);

				Ok(())
			},
			other => {
				other?;

				Ok(())
			},
		}
	}

	pub(crate) async fn handle_remove_relation(&self, p: RelationJob) -> Result<()> {
		self.verify_resource(&p.parent)?;

		let result = self
			.es
			.remove_field_element_by_id(
				&collection(&p.parent.r#type),
				&p.parent.id,
				&p.child.r#type,
				&p.child.id,
			)
			.await;

		match result {
			Err(StorageError::NotFound(_)) => {
				warn!(
					parent = %p.parent.r#type,
					parent_id = %p.parent.id,
					"Parent document missing in index; skipping.",
				);

				Ok(())
			},
			other => {
				other?;

				Ok(())
			},
		}
	}

	/// Builds `{fields, <child_type>: [inlined children]}` from the current
	/// relation graph, fetching each child's fields from the search backend.
	async fn build_document(
		&self,
		cfg: &ResourceConfig,
		fields: &Map<String, Value>,
		children: &[Resource],
	) -> Result<Value> {
		let mut doc = Map::new();

		doc.insert("fields".to_string(), Value::Object(fields.clone()));

		let mut by_type: BTreeMap<String, Vec<String>> = BTreeMap::new();

		for child in children {
			by_type.entry(child.r#type.clone()).or_default().push(child.id.clone());
		}

		for (child_type, ids) in by_type {
			let Some(rel_cfg) = cfg.get_relation(&child_type) else {
				warn!(
					resource = %cfg.resource,
					child = %child_type,
					"Relation is no longer declared in the schema.",
				);

				continue;
			};
			let mut elements = Vec::with_capacity(ids.len());

			for id in ids {
				elements
					.push(self.child_element(rel_cfg, &Resource::new(child_type.clone(), id)).await?);
			}

			doc.insert(child_type, Value::Array(elements));
		}

		Ok(Value::Object(doc))
	}

	/// Inline representation of a child: its declared fields projected from
	/// the search backend, or a bare `{id}` when the child document does not
	/// exist yet.
	async fn child_element(
		&self,
		rel_cfg: &sift_schema::RelationConfig,
		child: &Resource,
	) -> Result<Value> {
		let fetched =
			self.es.get(&collection(&child.r#type), &child.id, &["fields"]).await?;
		let Some(source) = fetched else {
			return Ok(json!({ "id": child.id }));
		};
		let child_fields =
			source.get("fields").and_then(Value::as_object).cloned().unwrap_or_default();
		let mut element = project_fields(&child_fields, &rel_cfg.fields);

		element.insert("id".to_string(), Value::String(child.id.clone()));

		Ok(Value::Object(element))
	}
}
