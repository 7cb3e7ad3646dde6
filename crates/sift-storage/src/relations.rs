//! Durable parent -> child relation graph. The `(resource, resource_id)`
//! columns hold the parent; `(related_resource, related_resource_id)` hold the
//! child. Removing a non-existent relation is not an error.

use crate::{
	Result,
	db::Db,
	models::{Relation, Resource},
};

pub async fn add_relations(db: &Db, relations: &[Relation]) -> Result<()> {
	if relations.is_empty() {
		return Ok(());
	}

	let mut builder = sqlx::QueryBuilder::new(
		"INSERT INTO relations (resource, resource_id, related_resource, related_resource_id) ",
	);

	builder.push_values(relations, |mut b, relation| {
		b.push_bind(relation.parent.r#type.as_str())
			.push_bind(relation.parent.id.as_str())
			.push_bind(relation.child.r#type.as_str())
			.push_bind(relation.child.id.as_str());
	});
	builder.push(" ON CONFLICT (resource, resource_id, related_resource, related_resource_id) DO NOTHING");
	builder.build().execute(&db.pool).await?;

	Ok(())
}

pub async fn remove_relation(db: &Db, relation: &Relation) -> Result<()> {
	sqlx::query(
		"\
DELETE FROM relations
WHERE resource = $1
	AND resource_id = $2
	AND related_resource = $3
	AND related_resource_id = $4",
	)
	.bind(relation.parent.r#type.as_str())
	.bind(relation.parent.id.as_str())
	.bind(relation.child.r#type.as_str())
	.bind(relation.child.id.as_str())
	.execute(&db.pool)
	.await?;

	Ok(())
}

/// Replaces every relation where `parent` is the parent with the given
/// children, in one transaction. An empty child list ends at the delete.
pub async fn set_relations(db: &Db, parent: &Resource, children: &[Resource]) -> Result<()> {
	let mut tx = db.pool.begin().await?;

	sqlx::query("DELETE FROM relations WHERE resource = $1 AND resource_id = $2")
		.bind(parent.r#type.as_str())
		.bind(parent.id.as_str())
		.execute(&mut *tx)
		.await?;

	if !children.is_empty() {
		let mut builder = sqlx::QueryBuilder::new(
			"INSERT INTO relations (resource, resource_id, related_resource, related_resource_id) ",
		);

		builder.push_values(children, |mut b, child| {
			b.push_bind(parent.r#type.as_str())
				.push_bind(parent.id.as_str())
				.push_bind(child.r#type.as_str())
				.push_bind(child.id.as_str());
		});
		builder.push(
			" ON CONFLICT (resource, resource_id, related_resource, related_resource_id) DO NOTHING",
		);
		builder.build().execute(&mut *tx).await?;
	}

	tx.commit().await?;

	Ok(())
}

pub async fn get_parents(db: &Db, child: &Resource) -> Result<Vec<Resource>> {
	let rows: Vec<(String, String)> = sqlx::query_as(
		"\
SELECT resource, resource_id
FROM relations
WHERE related_resource = $1
	AND related_resource_id = $2
ORDER BY resource, resource_id",
	)
	.bind(child.r#type.as_str())
	.bind(child.id.as_str())
	.fetch_all(&db.pool)
	.await?;

	Ok(rows.into_iter().map(|(r#type, id)| Resource { r#type, id }).collect())
}

pub async fn get_children(db: &Db, parent: &Resource) -> Result<Vec<Resource>> {
	let rows: Vec<(String, String)> = sqlx::query_as(
		"\
SELECT related_resource, related_resource_id
FROM relations
WHERE resource = $1
	AND resource_id = $2
ORDER BY related_resource, related_resource_id",
	)
	.bind(parent.r#type.as_str())
	.bind(parent.id.as_str())
	.fetch_all(&db.pool)
	.await?;

	Ok(rows.into_iter().map(|(r#type, id)| Resource { r#type, id }).collect())
}

pub async fn relation_exists(db: &Db, relation: &Relation) -> Result<bool> {
	let exists: bool = sqlx::query_scalar(
		"\
SELECT EXISTS (
	SELECT 1
	FROM relations
	WHERE resource = $1
		AND resource_id = $2
		AND related_resource = $3
		AND related_resource_id = $4
)",
	)
	.bind(relation.parent.r#type.as_str())
	.bind(relation.parent.id.as_str())
	.bind(relation.child.r#type.as_str())
	.bind(relation.child.id.as_str())
	.fetch_one(&db.pool)
	.await?;

	Ok(exists)
}

/// Removes every relation where `resource` is the parent. Rows where it is
/// the child are left for the delete fan-out to clean on the document side.
pub async fn remove_resource(db: &Db, resource: &Resource) -> Result<()> {
	sqlx::query("DELETE FROM relations WHERE resource = $1 AND resource_id = $2")
		.bind(resource.r#type.as_str())
		.bind(resource.id.as_str())
		.execute(&db.pool)
		.await?;

	Ok(())
}
