//! Queue job payloads. The job row stores the operation name as a
//! discriminator column and the body as opaque JSON; this module is the only
//! place that pairs the two back up.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use sift_storage::models::Resource;

use crate::{Error, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateJob {
	pub resource: Resource,
	pub data: Map<String, Value>,
	/// Parents recorded at register time for bidirectional fan-out.
	#[serde(default)]
	pub parent_resources: Vec<Resource>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateJob {
	pub resource: Resource,
	pub data: Map<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteJob {
	pub resource: Resource,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelationJob {
	pub parent: Resource,
	pub child: Resource,
}

#[derive(Clone, Debug)]
pub enum JobPayload {
	Create(CreateJob),
	Update(UpdateJob),
	Delete(DeleteJob),
	AddRelation(RelationJob),
	RemoveRelation(RelationJob),
}
impl JobPayload {
	pub fn job_type(&self) -> &'static str {
		match self {
			Self::Create(_) => "create",
			Self::Update(_) => "update",
			Self::Delete(_) => "delete",
			Self::AddRelation(_) => "add_relation",
			Self::RemoveRelation(_) => "remove_relation",
		}
	}

	pub fn to_value(&self) -> Result<Value> {
		let encoded = match self {
			Self::Create(p) => serde_json::to_value(p),
			Self::Update(p) => serde_json::to_value(p),
			Self::Delete(p) => serde_json::to_value(p),
			Self::AddRelation(p) | Self::RemoveRelation(p) => serde_json::to_value(p),
		};

		encoded.map_err(|err| Error::InvalidArgument(format!("failed to encode payload: {err}")))
	}

	pub fn decode(job_type: &str, payload: &Value) -> Result<Self> {
		let decode_err =
			|err: serde_json::Error| Error::InvalidArgument(format!("failed to decode payload: {err}"));

		match job_type {
			"create" => Ok(Self::Create(
				serde_json::from_value(payload.clone()).map_err(decode_err)?,
			)),
			"update" => Ok(Self::Update(
				serde_json::from_value(payload.clone()).map_err(decode_err)?,
			)),
			"delete" => Ok(Self::Delete(
				serde_json::from_value(payload.clone()).map_err(decode_err)?,
			)),
			"add_relation" => Ok(Self::AddRelation(
				serde_json::from_value(payload.clone()).map_err(decode_err)?,
			)),
			"remove_relation" => Ok(Self::RemoveRelation(
				serde_json::from_value(payload.clone()).map_err(decode_err)?,
			)),
			other => Err(Error::InvalidArgument(format!("unknown job type: {other}"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn payloads_round_trip_through_their_discriminator() {
		let mut data = Map::new();

		data.insert("field1".to_string(), Value::String("value1".to_string()));

		let payloads = [
			JobPayload::Create(CreateJob {
				resource: Resource::new("a", "1"),
				data: data.clone(),
				parent_resources: vec![Resource::new("b", "9")],
			}),
			JobPayload::Update(UpdateJob { resource: Resource::new("a", "1"), data }),
			JobPayload::Delete(DeleteJob { resource: Resource::new("a", "1") }),
			JobPayload::AddRelation(RelationJob {
				parent: Resource::new("a", "1"),
				child: Resource::new("b", "9"),
			}),
			JobPayload::RemoveRelation(RelationJob {
				parent: Resource::new("b", "9"),
				child: Resource::new("a", "1"),
			}),
		];

		for payload in payloads {
			let job_type = payload.job_type();
			let encoded = payload.to_value().expect("payload should encode");
			let decoded = JobPayload::decode(job_type, &encoded).expect("payload should decode");

			assert_eq!(decoded.job_type(), job_type);
			assert_eq!(decoded.to_value().expect("payload should re-encode"), encoded);
		}
	}

	#[test]
	fn unknown_job_type_is_rejected() {
		let err = JobPayload::decode("set_relation", &Value::Null).unwrap_err();

		assert!(err.to_string().contains("unknown job type"));
	}

	#[test]
	fn malformed_body_is_rejected() {
		let err =
			JobPayload::decode("create", &serde_json::json!({"resource": 5})).unwrap_err();

		assert!(err.to_string().contains("failed to decode payload"));
	}
}
