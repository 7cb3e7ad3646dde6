//! Declarative description of indexable resources, their fields, and their
//! relations. Loaded once at startup and validated fail-fast; the rest of the
//! system treats the resulting [`Schema`] as immutable.

mod validate;

use std::{collections::BTreeMap, fs, path::Path};

use serde::Deserialize;

pub use validate::Dependance;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to read schema document: {0}")]
	Io(#[from] std::io::Error),
	#[error("failed to parse schema document: {0}")]
	Toml(#[from] toml::de::Error),
	#[error("{0}")]
	Invalid(String),
}

#[derive(Debug, Deserialize)]
struct SchemaDocument {
	#[serde(default)]
	resources: BTreeMap<String, ResourceDocument>,
}

#[derive(Debug, Deserialize)]
struct ResourceDocument {
	#[serde(default)]
	fields: Vec<FieldConfig>,
	#[serde(default)]
	relations: Vec<RelationConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FieldConfig {
	pub name: String,
	/// Defaults to true.
	pub search: Option<bool>,
}
impl FieldConfig {
	pub fn named(name: &str) -> Self {
		Self { name: name.to_string(), search: None }
	}

	pub fn searchable(&self) -> bool {
		self.search.unwrap_or(true)
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct RelationConfig {
	pub resource: String,
	/// Derived at load time: true iff the related resource declares a relation back.
	#[serde(skip)]
	pub bidirectional: bool,
	pub dependance: Option<String>,
	pub fields: Vec<FieldConfig>,
}

#[derive(Clone, Debug)]
pub struct ResourceConfig {
	pub resource: String,
	pub fields: Vec<FieldConfig>,
	pub relations: Vec<RelationConfig>,
}
impl ResourceConfig {
	pub fn get_relation(&self, resource: &str) -> Option<&RelationConfig> {
		self.relations.iter().find(|r| r.resource == resource)
	}

	/// Dotted field paths the search backend should match free-text queries
	/// against: `fields.<name>` for own fields, `<relation>.<name>` for
	/// inlined relation fields. Non-searchable fields are excluded.
	pub fn searchable_fields(&self) -> Vec<String> {
		let mut fields = Vec::new();

		for f in &self.fields {
			if f.searchable() {
				fields.push(format!("fields.{}", f.name));
			}
		}
		for r in &self.relations {
			for f in &r.fields {
				if f.searchable() {
					fields.push(format!("{}.{}", r.resource, f.name));
				}
			}
		}

		fields
	}
}

#[derive(Clone, Debug)]
pub struct Schema {
	resources: Vec<ResourceConfig>,
	dependances: Vec<Dependance>,
}
impl Schema {
	pub fn load(path: &Path) -> Result<Self> {
		let raw = fs::read_to_string(path)?;
		let document: SchemaDocument = toml::from_str(&raw)?;
		let resources = document
			.resources
			.into_iter()
			.map(|(resource, doc)| ResourceConfig {
				resource,
				fields: doc.fields,
				relations: doc.relations,
			})
			.collect();

		Self::from_resources(resources)
	}

	pub fn from_resources(mut resources: Vec<ResourceConfig>) -> Result<Self> {
		let dependances = validate::validate(&mut resources)?;

		Ok(Self { resources, dependances })
	}

	pub fn get(&self, resource: &str) -> Option<&ResourceConfig> {
		self.resources.iter().find(|r| r.resource == resource)
	}

	pub fn resources(&self) -> &[ResourceConfig] {
		&self.resources
	}

	/// Resources whose documents should be refreshed when the relation
	/// `through -> target` changes. Recorded during validation; no handler
	/// acts on it yet.
	pub fn dependants_of(&self, through: &str, target: &str) -> Vec<&str> {
		self.dependances
			.iter()
			.filter(|d| d.through == through && d.target == target)
			.map(|d| d.dependant.as_str())
			.collect()
	}
}
