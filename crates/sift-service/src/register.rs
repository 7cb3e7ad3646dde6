//! Register side: runs synchronously with the publish call. Validates the
//! event against the schema, writes the relation graph, and enqueues the jobs
//! that later rebuild the search documents.

use time::OffsetDateTime;

use sift_schema::ResourceConfig;
use sift_storage::{
	models::{Relation, Resource},
	relations,
};

use crate::{
	Error, IndexService, Result,
	event::{
		AddRelationPayload, CreatePayload, DeletePayload, RelationRef, RemoveRelationPayload,
		SetRelationsPayload, UpdatePayload,
	},
	group_key,
	payload::{CreateJob, DeleteJob, JobPayload, RelationJob, UpdateJob},
	project_fields,
};

impl IndexService {
	pub async fn register_create(
		&self,
		occurred_at: OffsetDateTime,
		p: CreatePayload,
	) -> Result<()> {
		let cfg = self.verify_resource(&p.resource)?;
		let (relation_batch, parent_resources) =
			convert_create_relations(cfg, &p.resource, &p.relations)?;

		relations::add_relations(&self.db, &relation_batch).await?;

		let job = JobPayload::Create(CreateJob {
			data: project_fields(&p.data, &cfg.fields),
			resource: p.resource.clone(),
			parent_resources,
		});

		self.enqueue_payload(&group_key(&p.resource), occurred_at, &job).await
	}

	pub async fn register_update(
		&self,
		occurred_at: OffsetDateTime,
		p: UpdatePayload,
	) -> Result<()> {
		let cfg = self.verify_resource(&p.resource)?;
		let job = JobPayload::Update(UpdateJob {
			data: project_fields(&p.data, &cfg.fields),
			resource: p.resource.clone(),
		});

		self.enqueue_payload(&group_key(&p.resource), occurred_at, &job).await
	}

	pub async fn register_delete(
		&self,
		occurred_at: OffsetDateTime,
		p: DeletePayload,
	) -> Result<()> {
		self.verify_resource(&p.resource)?;

		let job = JobPayload::Delete(DeleteJob { resource: p.resource.clone() });

		self.enqueue_payload(&group_key(&p.resource), occurred_at, &job).await
	}

	pub async fn register_add_relation(
		&self,
		occurred_at: OffsetDateTime,
		p: AddRelationPayload,
	) -> Result<()> {
		let cfg = self.verify_resource(&p.resource)?;
		let child = p.relation.resource;
		let rel_cfg = declared_relation(cfg, &child)?;
		let bidirectional = rel_cfg.bidirectional;

		self.persist_add_relation(
			occurred_at,
			Relation::new(p.resource.clone(), child.clone()),
		)
		.await?;

		if bidirectional {
			self.persist_add_relation(occurred_at, Relation::new(child, p.resource)).await?;
		}

		Ok(())
	}

	pub async fn register_remove_relation(
		&self,
		occurred_at: OffsetDateTime,
		p: RemoveRelationPayload,
	) -> Result<()> {
		let cfg = self.verify_resource(&p.resource)?;
		let child = p.relation.resource;
		let rel_cfg = declared_relation(cfg, &child)?;
		let bidirectional = rel_cfg.bidirectional;

		self.persist_remove_relation(
			occurred_at,
			Relation::new(p.resource.clone(), child.clone()),
		)
		.await?;

		if bidirectional {
			self.persist_remove_relation(occurred_at, Relation::new(child, p.resource)).await?;
		}

		Ok(())
	}

	/// "Set" composes into the same per-operation persists and jobs the
	/// dedicated endpoints produce: every existing child and parent relation
	/// is removed, then the new children are added. Per-group ordering keeps
	/// the resulting jobs serial per resource.
	pub async fn register_set_relations(
		&self,
		occurred_at: OffsetDateTime,
		p: SetRelationsPayload,
	) -> Result<()> {
		let cfg = self.verify_resource(&p.resource)?;
		let mut additions = Vec::with_capacity(p.relations.len());

		for relation in &p.relations {
			let rel_cfg = declared_relation(cfg, &relation.resource)?;

			additions.push((relation.resource.clone(), rel_cfg.bidirectional));
		}

		for child in relations::get_children(&self.db, &p.resource).await? {
			self.persist_remove_relation(
				occurred_at,
				Relation::new(p.resource.clone(), child),
			)
			.await?;
		}
		for parent in relations::get_parents(&self.db, &p.resource).await? {
			self.persist_remove_relation(
				occurred_at,
				Relation::new(parent, p.resource.clone()),
			)
			.await?;
		}

		for (child, bidirectional) in additions {
			self.persist_add_relation(
				occurred_at,
				Relation::new(p.resource.clone(), child.clone()),
			)
			.await?;

			if bidirectional {
				self.persist_add_relation(occurred_at, Relation::new(child, p.resource.clone()))
					.await?;
			}
		}

		Ok(())
	}

	async fn persist_add_relation(
		&self,
		occurred_at: OffsetDateTime,
		relation: Relation,
	) -> Result<()> {
		relations::add_relations(&self.db, std::slice::from_ref(&relation)).await?;

		let group = group_key(&relation.parent);
		let job = JobPayload::AddRelation(RelationJob {
			parent: relation.parent,
			child: relation.child,
		});

		self.enqueue_payload(&group, occurred_at, &job).await
	}

	async fn persist_remove_relation(
		&self,
		occurred_at: OffsetDateTime,
		relation: Relation,
	) -> Result<()> {
		relations::remove_relation(&self.db, &relation).await?;

		let group = group_key(&relation.parent);
		let job = JobPayload::RemoveRelation(RelationJob {
			parent: relation.parent,
			child: relation.child,
		});

		self.enqueue_payload(&group, occurred_at, &job).await
	}
}

/// Converts declared relations into the graph batch plus the reverse parents
/// that need fan-out once this resource's document exists.
fn convert_create_relations(
	cfg: &ResourceConfig,
	resource: &Resource,
	refs: &[RelationRef],
) -> Result<(Vec<Relation>, Vec<Resource>)> {
	let mut batch = Vec::with_capacity(refs.len());
	let mut parents = Vec::new();

	for relation in refs {
		let rel_cfg = declared_relation(cfg, &relation.resource)?;

		batch.push(Relation::new(resource.clone(), relation.resource.clone()));

		if rel_cfg.bidirectional {
			batch.push(Relation::new(relation.resource.clone(), resource.clone()));
			parents.push(relation.resource.clone());
		}
	}

	Ok((batch, parents))
}

fn declared_relation<'a>(
	cfg: &'a ResourceConfig,
	child: &Resource,
) -> Result<&'a sift_schema::RelationConfig> {
	if child.r#type.is_empty() || child.id.is_empty() {
		return Err(Error::InvalidArgument(
			"relation is missing the related resource".to_string(),
		));
	}

	cfg.get_relation(&child.r#type).ok_or_else(|| {
		Error::InvalidArgument(format!(
			"relation to resource '{}' is not declared in the schema for resource '{}'",
			child.r#type, cfg.resource
		))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use sift_schema::{FieldConfig, RelationConfig, Schema};

	fn schema() -> Schema {
		Schema::from_resources(vec![
			ResourceConfig {
				resource: "a".to_string(),
				fields: vec![FieldConfig::named("field1")],
				relations: vec![RelationConfig {
					resource: "b".to_string(),
					bidirectional: false,
					dependance: None,
					fields: vec![FieldConfig::named("field1")],
				}],
			},
			ResourceConfig {
				resource: "b".to_string(),
				fields: vec![FieldConfig::named("field1")],
				relations: vec![RelationConfig {
					resource: "a".to_string(),
					bidirectional: false,
					dependance: None,
					fields: vec![FieldConfig::named("field1")],
				}],
			},
			ResourceConfig {
				resource: "c".to_string(),
				fields: vec![FieldConfig::named("field1")],
				relations: Vec::new(),
			},
		])
		.expect("schema should validate")
	}

	fn relation_ref(r#type: &str, id: &str) -> RelationRef {
		RelationRef { resource: Resource::new(r#type, id) }
	}

	#[test]
	fn bidirectional_create_relations_double_up() {
		let schema = schema();
		let cfg = schema.get("a").unwrap();
		let (batch, parents) = convert_create_relations(
			cfg,
			&Resource::new("a", "1"),
			&[relation_ref("b", "9")],
		)
		.expect("conversion should succeed");

		assert_eq!(
			batch,
			vec![
				Relation::new(Resource::new("a", "1"), Resource::new("b", "9")),
				Relation::new(Resource::new("b", "9"), Resource::new("a", "1")),
			]
		);
		assert_eq!(parents, vec![Resource::new("b", "9")]);
	}

	#[test]
	fn one_way_create_relations_have_no_fanout_parents() {
		let schema = schema();
		let cfg = schema.get("b").unwrap();

		// b -> a is bidirectional in this schema, so use a schema where it is
		// not: relation from a one-way resource.
		let (batch, parents) =
			convert_create_relations(cfg, &Resource::new("b", "2"), &[]).unwrap();

		assert!(batch.is_empty());
		assert!(parents.is_empty());
	}

	#[test]
	fn undeclared_relation_is_an_invalid_argument() {
		let schema = schema();
		let cfg = schema.get("a").unwrap();
		let err = convert_create_relations(
			cfg,
			&Resource::new("a", "1"),
			&[relation_ref("c", "3")],
		)
		.unwrap_err();

		assert!(matches!(err, Error::InvalidArgument(_)));
		assert!(err.to_string().contains("not declared in the schema"));
	}

	#[test]
	fn relation_without_target_is_rejected() {
		let schema = schema();
		let cfg = schema.get("a").unwrap();
		let err = declared_relation(cfg, &Resource::new("", "")).unwrap_err();

		assert!(err.to_string().contains("missing the related resource"));
	}
}
