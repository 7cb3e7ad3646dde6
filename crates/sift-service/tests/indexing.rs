//! End-to-end pipeline tests: publish change events, let a real worker drain
//! the queue, and assert on what search returns. Each test uses its own
//! resource-type names so its indices cannot collide with other tests.

use std::{sync::Arc, time::Duration};

use serde_json::{Map, Value, json};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;

use sift_queue::{Queue, Worker, WorkerConfig};
use sift_schema::{FieldConfig, RelationConfig, ResourceConfig, Schema};
use sift_service::{
	Error, IndexHandler, IndexService,
	event::{
		AddRelationPayload, ChangeEvent, CreatePayload, DeletePayload, EventPayload, RelationRef,
		RemoveRelationPayload, SetRelationsPayload, UpdatePayload,
	},
};
use sift_storage::{
	db::Db,
	es::EsStore,
	models::Resource,
	search::SearchRequest,
};

struct Stack {
	test_db: sift_testkit::TestDatabase,
	service: Arc<IndexService>,
	queue: Queue,
	cancel: CancellationToken,
	run: tokio::task::JoinHandle<()>,
	indices: Vec<String>,
}
impl Stack {
	async fn publish(&self, payload: EventPayload) {
		self.service
			.publish(ChangeEvent { occurred_at: None, payload })
			.await
			.expect("Failed to publish event.");
	}

	async fn drain(&self) {
		for _ in 0..600 {
			let active = self.queue.active_count().await.expect("Failed to count active jobs.");

			if active == 0 {
				return;
			}

			tokio::time::sleep(Duration::from_millis(25)).await;
		}

		panic!("queue did not drain in time");
	}

	async fn search(&self, resource: &str, query: &str) -> sift_storage::search::SearchResponse {
		self.service
			.search(SearchRequest {
				resource: resource.to_string(),
				query: query.to_string(),
				..Default::default()
			})
			.await
			.expect("Search failed.")
	}

	async fn stop(self) {
		self.cancel.cancel();
		self.run.await.expect("Worker run task failed.");
		sift_testkit::delete_indices(&self.indices).await.expect("Failed to delete indices.");
		self.test_db.cleanup().await.expect("Failed to cleanup test database.");
	}
}

/// A two-type schema where `<prefix>_a` and `<prefix>_b` inline each other
/// (bidirectional).
fn two_way_schema(prefix: &str) -> Schema {
	let a = format!("{prefix}_a");
	let b = format!("{prefix}_b");

	Schema::from_resources(vec![
		ResourceConfig {
			resource: a.clone(),
			fields: vec![FieldConfig::named("field1"), FieldConfig::named("field2")],
			relations: vec![RelationConfig {
				resource: b.clone(),
				bidirectional: false,
				dependance: None,
				fields: vec![FieldConfig::named("field1")],
			}],
		},
		ResourceConfig {
			resource: b,
			fields: vec![FieldConfig::named("field1"), FieldConfig::named("field2")],
			relations: vec![RelationConfig {
				resource: a,
				bidirectional: false,
				dependance: None,
				fields: vec![FieldConfig::named("field1")],
			}],
		},
	])
	.expect("schema should validate")
}

async fn start(prefix: &str, schema: Schema) -> Option<Stack> {
	let base_dsn = sift_testkit::env_dsn()?;
	let es_url = sift_testkit::env_es_url()?;
	let test_db = sift_testkit::TestDatabase::new(&base_dsn)
		.await
		.expect("Failed to create test database.");
	let pool = PgPoolOptions::new()
		.max_connections(8)
		.connect(test_db.dsn())
		.await
		.expect("Failed to connect to Postgres.");
	let db = Db::from_pool(pool.clone());

	db.ensure_schema().await.expect("Failed to ensure schema.");

	let es_cfg = sift_config::Elasticsearch {
		url: es_url,
		username: std::env::var("SIFT_ES_USERNAME").ok(),
		password: std::env::var("SIFT_ES_PASSWORD").ok(),
		refresh: true,
		timeout_ms: 10_000,
	};
	let es = EsStore::new(&es_cfg).expect("Failed to build search store.");
	let indices = schema
		.resources()
		.iter()
		.map(|r| format!("{}_search", r.resource))
		.collect::<Vec<_>>();

	// Leftovers from an aborted earlier run would skew totals.
	sift_testkit::delete_indices(&indices).await.expect("Failed to clear indices.");

	let queue = Queue::new(pool.clone());
	let service = IndexService::new(schema, db, es, queue.clone());
	let handler = IndexHandler::new(service.clone());
	let worker = Worker::new(
		pool,
		handler,
		WorkerConfig {
			poll_interval: Duration::from_millis(20),
			..Default::default()
		},
	);
	let cancel = CancellationToken::new();
	let run = tokio::spawn(worker.clone().run(cancel.clone()));

	Some(Stack { test_db, service, queue, cancel, run, indices })
}

fn data(entries: &[(&str, &str)]) -> Map<String, Value> {
	entries
		.iter()
		.map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
		.collect()
}

fn create(resource: Resource, fields: &[(&str, &str)], relations: &[Resource]) -> EventPayload {
	EventPayload::Create(CreatePayload {
		resource,
		data: data(fields),
		relations: relations
			.iter()
			.map(|r| RelationRef { resource: r.clone() })
			.collect(),
	})
}

#[tokio::test]
#[ignore = "Requires external Postgres and Elasticsearch. Set SIFT_PG_DSN and SIFT_ES_URL to run."]
async fn created_resources_are_searchable() {
	let Some(stack) = start("crud", two_way_schema("crud")).await else {
		eprintln!("Skipping created_resources_are_searchable; set SIFT_PG_DSN and SIFT_ES_URL.");
		return;
	};
	let a = "crud_a";

	stack.publish(create(Resource::new(a, "1"), &[("field1", "value1")], &[])).await;
	stack.drain().await;

	let hits = stack.search(a, "value1").await;

	assert_eq!(hits.total, 1);
	assert_eq!(hits.hits[0].id, "1");
	assert_eq!(hits.hits[0].source["fields"]["field1"], "value1");

	stack.publish(create(Resource::new(a, "2"), &[("field1", "value2")], &[])).await;
	stack.drain().await;

	let all = stack.search(a, "").await;

	assert_eq!(all.total, 2);

	let none = stack.search(a, "absent").await;

	assert_eq!(none.total, 0);

	stack.stop().await;
}

#[tokio::test]
#[ignore = "Requires external Postgres and Elasticsearch. Set SIFT_PG_DSN and SIFT_ES_URL to run."]
async fn update_changes_what_matches() {
	let Some(stack) = start("upd", two_way_schema("upd")).await else {
		eprintln!("Skipping update_changes_what_matches; set SIFT_PG_DSN and SIFT_ES_URL.");
		return;
	};
	let a = "upd_a";

	stack.publish(create(Resource::new(a, "1"), &[("field1", "value1")], &[])).await;
	stack.drain().await;
	stack
		.publish(EventPayload::Update(UpdatePayload {
			resource: Resource::new(a, "1"),
			data: data(&[("field1", "updated_value")]),
		}))
		.await;
	stack.drain().await;

	let updated = stack.search(a, "updated_value").await;

	assert_eq!(updated.total, 1);
	assert_eq!(updated.hits[0].id, "1");

	let stale = stack.search(a, "value1").await;

	assert_eq!(stale.total, 0);

	stack.stop().await;
}

#[tokio::test]
#[ignore = "Requires external Postgres and Elasticsearch. Set SIFT_PG_DSN and SIFT_ES_URL to run."]
async fn delete_removes_own_doc_and_parent_inlines() {
	let Some(stack) = start("del", two_way_schema("del")).await else {
		eprintln!("Skipping delete_removes_own_doc_and_parent_inlines; set env vars to run.");
		return;
	};
	let (a, b) = ("del_a", "del_b");

	stack.publish(create(Resource::new(b, "9"), &[("field1", "bee")], &[])).await;
	stack.drain().await;
	stack
		.publish(create(Resource::new(a, "1"), &[("field1", "aye")], &[Resource::new(b, "9")]))
		.await;
	stack.drain().await;

	let before = stack.search(a, "").await;
	let inlined = before.hits[0].source[b].as_array().expect("b inline array should exist");

	assert!(inlined.iter().any(|e| e["id"] == "9"));

	stack.publish(EventPayload::Delete(DeletePayload { resource: Resource::new(b, "9") })).await;
	stack.drain().await;

	let b_hits = stack.search(b, "").await;

	assert_eq!(b_hits.total, 0);

	let after = stack.search(a, "").await;
	let inlined = after.hits[0].source[b].as_array().cloned().unwrap_or_default();

	assert!(!inlined.iter().any(|e| e["id"] == "9"));

	stack.stop().await;
}

#[tokio::test]
#[ignore = "Requires external Postgres and Elasticsearch. Set SIFT_PG_DSN and SIFT_ES_URL to run."]
async fn bidirectional_fanout_converges() {
	let Some(stack) = start("fan", two_way_schema("fan")).await else {
		eprintln!("Skipping bidirectional_fanout_converges; set SIFT_PG_DSN and SIFT_ES_URL.");
		return;
	};
	let (a, b) = ("fan_a", "fan_b");

	// Create a with a relation to a b that does not exist yet.
	stack
		.publish(create(Resource::new(a, "1"), &[("field1", "aye")], &[Resource::new(b, "2")]))
		.await;
	stack.drain().await;

	let a_hits = stack.search(a, "").await;
	let inlined = a_hits.hits[0].source[b].as_array().expect("b inline array should exist");

	// The child document is missing, so only its id is inlined for now.
	assert_eq!(inlined.len(), 1);
	assert_eq!(inlined[0], json!({ "id": "2" }));

	// Creating b later must pick the stored reverse relation up on both
	// sides, even though b's create event never mentioned a.
	stack.publish(create(Resource::new(b, "2"), &[("field1", "hello")], &[])).await;
	stack.drain().await;

	let b_hits = stack.search(b, "").await;

	assert_eq!(b_hits.total, 1);
	assert_eq!(b_hits.hits[0].id, "2");

	let a_inline = b_hits.hits[0].source[a].as_array().expect("a inline array should exist");

	assert!(a_inline.iter().any(|e| e["id"] == "1"));

	let a_hits = stack.search(a, "").await;
	let b_inline = a_hits.hits[0].source[b].as_array().expect("b inline array should exist");

	assert_eq!(b_inline.len(), 1);
	assert_eq!(b_inline[0]["id"], "2");
	assert_eq!(b_inline[0]["field1"], "hello");

	stack.stop().await;
}

#[tokio::test]
#[ignore = "Requires external Postgres and Elasticsearch. Set SIFT_PG_DSN and SIFT_ES_URL to run."]
async fn updates_within_a_group_apply_in_publish_order() {
	let Some(stack) = start("ord", two_way_schema("ord")).await else {
		eprintln!("Skipping updates_within_a_group_apply_in_publish_order; set env vars to run.");
		return;
	};
	let a = "ord_a";

	stack.publish(create(Resource::new(a, "1"), &[("field1", "v0")], &[])).await;

	for value in ["x", "y"] {
		stack
			.publish(EventPayload::Update(UpdatePayload {
				resource: Resource::new(a, "1"),
				data: data(&[("field1", value)]),
			}))
			.await;
	}

	stack.drain().await;

	let hits = stack.search(a, "").await;

	assert_eq!(hits.hits[0].source["fields"]["field1"], "y");

	stack.stop().await;
}

#[tokio::test]
#[ignore = "Requires external Postgres and Elasticsearch. Set SIFT_PG_DSN and SIFT_ES_URL to run."]
async fn relations_can_be_added_removed_and_set() {
	let Some(stack) = start("rel", two_way_schema("rel")).await else {
		eprintln!("Skipping relations_can_be_added_removed_and_set; set env vars to run.");
		return;
	};
	let (a, b) = ("rel_a", "rel_b");

	for id in ["1", "2"] {
		stack.publish(create(Resource::new(b, id), &[("field1", "bee")], &[])).await;
	}

	stack.publish(create(Resource::new(a, "1"), &[("field1", "aye")], &[])).await;
	stack.drain().await;
	stack
		.publish(EventPayload::AddRelation(AddRelationPayload {
			resource: Resource::new(a, "1"),
			relation: RelationRef { resource: Resource::new(b, "1") },
		}))
		.await;
	stack.drain().await;

	let hits = stack.search(a, "").await;
	let inlined = hits.hits[0].source[b].as_array().expect("b inline array should exist");

	assert!(inlined.iter().any(|e| e["id"] == "1"));

	stack
		.publish(EventPayload::RemoveRelation(RemoveRelationPayload {
			resource: Resource::new(a, "1"),
			relation: RelationRef { resource: Resource::new(b, "1") },
		}))
		.await;
	stack.drain().await;

	let hits = stack.search(a, "").await;
	let inlined = hits.hits[0].source[b].as_array().cloned().unwrap_or_default();

	assert!(!inlined.iter().any(|e| e["id"] == "1"));

	stack
		.publish(EventPayload::SetRelations(SetRelationsPayload {
			resource: Resource::new(a, "1"),
			relations: vec![RelationRef { resource: Resource::new(b, "2") }],
		}))
		.await;
	stack.drain().await;

	let hits = stack.search(a, "").await;
	let inlined = hits.hits[0].source[b].as_array().expect("b inline array should exist");

	assert!(inlined.iter().any(|e| e["id"] == "2"));
	assert!(!inlined.iter().any(|e| e["id"] == "1"));

	stack.stop().await;
}

#[tokio::test]
#[ignore = "Requires external Postgres and Elasticsearch. Set SIFT_PG_DSN and SIFT_ES_URL to run."]
async fn unknown_resources_are_rejected_without_side_effects() {
	let Some(stack) = start("unk", two_way_schema("unk")).await else {
		eprintln!("Skipping unknown_resources_are_rejected_without_side_effects; set env vars.");
		return;
	};
	let err = stack
		.service
		.search(SearchRequest { resource: "unk_c".to_string(), ..Default::default() })
		.await
		.expect_err("unknown resource should be rejected");

	assert!(matches!(err, Error::UnknownResource));

	let err = stack
		.service
		.publish(ChangeEvent {
			occurred_at: None,
			payload: create(Resource::new("unk_c", "1"), &[("field1", "v")], &[]),
		})
		.await
		.expect_err("unknown resource should be rejected");

	assert!(matches!(err, Error::UnknownResource));

	// Nothing may have been enqueued for the rejected event.
	assert_eq!(stack.queue.active_count().await.expect("Failed to count."), 0);

	stack.stop().await;
}
