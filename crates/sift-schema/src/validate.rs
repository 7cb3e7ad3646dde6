use std::collections::BTreeSet;

use crate::{Error, FieldConfig, RelationConfig, ResourceConfig, Result};

/// When the relation `through -> target` changes, `dependant` documents
/// should be refreshed. Reserved; recorded but never acted on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependance {
	pub dependant: String,
	pub through: String,
	pub target: String,
}

pub(crate) fn validate(resources: &mut [ResourceConfig]) -> Result<Vec<Dependance>> {
	if resources.is_empty() {
		return Err(Error::Invalid("at least one resource must be declared".to_string()));
	}

	let mut seen = BTreeSet::new();

	for rc in resources.iter() {
		validate_resource(rc)?;

		if !seen.insert(rc.resource.clone()) {
			return Err(Error::Invalid(format!("resource '{}' is declared twice", rc.resource)));
		}
	}

	verify_relations(resources)
}

fn validate_resource(rc: &ResourceConfig) -> Result<()> {
	if rc.resource.is_empty() {
		return Err(Error::Invalid("resource name must not be empty".to_string()));
	}

	for f in &rc.fields {
		validate_field(&rc.resource, f)?;
	}
	for r in &rc.relations {
		if r.resource.is_empty() {
			return Err(Error::Invalid(format!(
				"resource '{}' declares a relation without a target resource",
				rc.resource
			)));
		}
		if r.fields.is_empty() {
			return Err(Error::Invalid(format!(
				"relation '{}' -> '{}' must declare at least one field",
				rc.resource, r.resource
			)));
		}
		for f in &r.fields {
			validate_field(&rc.resource, f)?;
		}
	}

	Ok(())
}

fn validate_field(resource: &str, f: &FieldConfig) -> Result<()> {
	if f.name.is_empty() {
		return Err(Error::Invalid(format!(
			"resource '{resource}' declares a field without a name"
		)));
	}

	Ok(())
}

/// Checks relation targets and relation fields against the declared
/// resources, derives bidirectionality, and collects dependance records.
fn verify_relations(resources: &mut [ResourceConfig]) -> Result<Vec<Dependance>> {
	let snapshot = resources.to_vec();
	let mut dependances = Vec::new();

	for rc in resources.iter_mut() {
		for relation in rc.relations.iter_mut() {
			let Some(target) = snapshot.iter().find(|c| c.resource == relation.resource) else {
				return Err(Error::Invalid(format!(
					"relation '{}' -> '{}' is declared but resource '{}' does not exist",
					rc.resource, relation.resource, relation.resource
				)));
			};

			for f in &relation.fields {
				if !target.fields.iter().any(|tf| tf.name == f.name) {
					return Err(Error::Invalid(format!(
						"relation '{}' -> '{}' names field '{}.{}' which does not exist",
						rc.resource, relation.resource, relation.resource, f.name
					)));
				}
			}

			if target.relations.iter().any(|back| back.resource == rc.resource) {
				relation.bidirectional = true;
			}

			if let Some(through) = relation.dependance.as_deref() {
				validate_dependance(&snapshot, &rc.resource, relation, through)?;

				dependances.push(Dependance {
					dependant: rc.resource.clone(),
					through: through.to_string(),
					target: relation.resource.clone(),
				});
			}
		}
	}

	Ok(dependances)
}

fn validate_dependance(
	snapshot: &[ResourceConfig],
	dependant: &str,
	relation: &RelationConfig,
	through: &str,
) -> Result<()> {
	let Some(through_cfg) = snapshot.iter().find(|c| c.resource == through) else {
		return Err(Error::Invalid(format!(
			"relation '{}' -> '{}' names dependance '{}' which does not exist",
			dependant, relation.resource, through
		)));
	};

	if !through_cfg.relations.iter().any(|r| r.resource == relation.resource) {
		return Err(Error::Invalid(format!(
			"dependance '{}' on relation '{}' -> '{}' requires relation '{}' -> '{}'",
			through, dependant, relation.resource, through, relation.resource
		)));
	}

	let Some(dependant_cfg) = snapshot.iter().find(|c| c.resource == dependant) else {
		return Err(Error::Invalid(format!("resource '{dependant}' does not exist")));
	};

	if !dependant_cfg.relations.iter().any(|r| r.resource == through) {
		return Err(Error::Invalid(format!(
			"dependance '{}' on relation '{}' -> '{}' requires relation '{}' -> '{}'",
			through, dependant, relation.resource, dependant, through
		)));
	}

	Ok(())
}
