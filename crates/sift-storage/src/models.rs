use serde::{Deserialize, Serialize};

/// A resource instance, identified structurally by `(type, id)`.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct Resource {
	pub r#type: String,
	pub id: String,
}
impl Resource {
	pub fn new(r#type: impl Into<String>, id: impl Into<String>) -> Self {
		Self { r#type: r#type.into(), id: id.into() }
	}
}

/// A directed parent -> child edge in the relation graph.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Relation {
	pub parent: Resource,
	pub child: Resource,
}
impl Relation {
	pub fn new(parent: Resource, child: Resource) -> Self {
		Self { parent, child }
	}
}
