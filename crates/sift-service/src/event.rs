//! Wire-level change events as accepted by the publish endpoints. Each event
//! carries exactly one payload, externally tagged by its operation name.

use serde::Deserialize;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use sift_storage::models::Resource;

#[derive(Clone, Debug, Deserialize)]
pub struct ChangeEvent {
	#[serde(default, with = "time::serde::rfc3339::option")]
	pub occurred_at: Option<OffsetDateTime>,
	#[serde(flatten)]
	pub payload: EventPayload,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
	Create(CreatePayload),
	Update(UpdatePayload),
	Delete(DeletePayload),
	AddRelation(AddRelationPayload),
	RemoveRelation(RemoveRelationPayload),
	SetRelations(SetRelationsPayload),
}

#[derive(Clone, Debug, Deserialize)]
pub struct RelationRef {
	pub resource: Resource,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CreatePayload {
	pub resource: Resource,
	#[serde(default)]
	pub data: Map<String, Value>,
	#[serde(default)]
	pub relations: Vec<RelationRef>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UpdatePayload {
	pub resource: Resource,
	#[serde(default)]
	pub data: Map<String, Value>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DeletePayload {
	pub resource: Resource,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AddRelationPayload {
	pub resource: Resource,
	pub relation: RelationRef,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RemoveRelationPayload {
	pub resource: Resource,
	pub relation: RelationRef,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SetRelationsPayload {
	pub resource: Resource,
	#[serde(default)]
	pub relations: Vec<RelationRef>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn create_event_decodes_from_tagged_json() {
		let raw = serde_json::json!({
			"occurred_at": "2025-06-01T12:00:00Z",
			"create": {
				"resource": { "type": "a", "id": "1" },
				"data": { "field1": "value1" },
				"relations": [{ "resource": { "type": "b", "id": "9" } }],
			},
		});
		let event: ChangeEvent = serde_json::from_value(raw).expect("event should decode");

		assert!(event.occurred_at.is_some());

		let EventPayload::Create(create) = event.payload else {
			panic!("expected a create payload");
		};

		assert_eq!(create.resource, Resource::new("a", "1"));
		assert_eq!(create.data["field1"], "value1");
		assert_eq!(create.relations[0].resource, Resource::new("b", "9"));
	}

	#[test]
	fn occurred_at_is_optional() {
		let raw = serde_json::json!({
			"delete": { "resource": { "type": "a", "id": "1" } },
		});
		let event: ChangeEvent = serde_json::from_value(raw).expect("event should decode");

		assert!(event.occurred_at.is_none());
		assert!(matches!(event.payload, EventPayload::Delete(_)));
	}

	#[test]
	fn set_relations_decodes_an_empty_list() {
		let raw = serde_json::json!({
			"set_relations": {
				"resource": { "type": "a", "id": "1" },
				"relations": [],
			},
		});
		let event: ChangeEvent = serde_json::from_value(raw).expect("event should decode");
		let EventPayload::SetRelations(set) = event.payload else {
			panic!("expected a set_relations payload");
		};

		assert!(set.relations.is_empty());
	}

	#[test]
	fn event_without_payload_is_rejected() {
		let raw = serde_json::json!({ "occurred_at": "2025-06-01T12:00:00Z" });

		assert!(serde_json::from_value::<ChangeEvent>(raw).is_err());
	}
}
