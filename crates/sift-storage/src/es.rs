//! Elasticsearch adapter. Array-element mutations run as server-side painless
//! scripts so each one is atomic on its document; the scripts never leak past
//! this module.

use std::time::Duration;

use serde_json::{Map, Value, json};

use crate::{Error, Result};

const UPSERT_ELEMENT_SCRIPT: &str = "\
params.new_element['id'] = params.element_id;
if (ctx._source[params.field] == null) {
	ctx._source[params.field] = [params.new_element];
} else {
	def found = false;
	for (int i = 0; i < ctx._source[params.field].length; i++) {
		if (ctx._source[params.field][i].id == params.element_id) {
			ctx._source[params.field][i] = params.new_element;
			found = true;
			break;
		}
	}
	if (!found) {
		ctx._source[params.field].add(params.new_element);
	}
}";

const ADD_ELEMENT_SCRIPT: &str = "\
if (ctx._source[params.field] == null) {
	ctx._source[params.field] = [params.new_element];
} else {
	ctx._source[params.field].add(params.new_element);
}";

const REMOVE_ELEMENT_SCRIPT: &str = "\
def f = ctx._source[params.field];
if (f != null) {
	if (f instanceof List) {
		f.removeIf(e -> e != null && e.id == params.element_id);
	} else if (f instanceof Map && f.id == params.element_id) {
		ctx._source.remove(params.field);
	}
}";

pub struct BulkItem {
	pub index: String,
	pub id: String,
	pub doc: Value,
}

pub struct EsStore {
	client: reqwest::Client,
	base_url: String,
	username: Option<String>,
	password: Option<String>,
	refresh: bool,
}
impl EsStore {
	pub fn new(cfg: &sift_config::Elasticsearch) -> Result<Self> {
		let client =
			reqwest::Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;

		Ok(Self {
			client,
			base_url: cfg.url.trim_end_matches('/').to_string(),
			username: cfg.username.clone(),
			password: cfg.password.clone(),
			refresh: cfg.refresh,
		})
	}

	pub async fn upsert(&self, index: &str, doc_id: &str, doc: &Value) -> Result<()> {
		let url = format!("{}/{}/_doc/{}", self.base_url, index, doc_id);
		let res = self
			.request(self.client.put(url))
			.query(&[("refresh", self.refresh_param())])
			.json(doc)
			.send()
			.await?;

		check(res).await?;
		tracing::debug!(index, doc_id, "Upserted document.");

		Ok(())
	}

	/// Deleting a document that is already gone counts as success.
	pub async fn delete(&self, index: &str, doc_id: &str) -> Result<()> {
		let url = format!("{}/{}/_doc/{}", self.base_url, index, doc_id);
		let res = self
			.request(self.client.delete(url))
			.query(&[("refresh", self.refresh_param())])
			.send()
			.await?;

		if res.status().as_u16() == 404 {
			return Ok(());
		}

		check(res).await?;
		tracing::debug!(index, doc_id, "Deleted document.");

		Ok(())
	}

	pub async fn bulk_upsert(&self, items: &[BulkItem]) -> Result<()> {
		if items.is_empty() {
			return Ok(());
		}

		let mut body = String::new();

		for item in items {
			let meta = json!({ "index": { "_index": item.index, "_id": item.id } });

			body.push_str(&meta.to_string());
			body.push('\n');
			body.push_str(&item.doc.to_string());
			body.push('\n');
		}

		let url = format!("{}/_bulk", self.base_url);
		let res = self
			.request(self.client.post(url))
			.query(&[("refresh", self.refresh_param())])
			.header("content-type", "application/x-ndjson")
			.body(body)
			.send()
			.await?;

		check(res).await?;
		tracing::debug!(count = items.len(), "Bulk upserted documents.");

		Ok(())
	}

	/// Replaces one top-level field of the document. Missing document surfaces
	/// as [`Error::NotFound`].
	pub async fn update_field(
		&self,
		index: &str,
		doc_id: &str,
		field: &str,
		value: Value,
	) -> Result<()> {
		let body = json!({ "doc": { field: value } });

		self.update(index, doc_id, &body).await?;
		tracing::debug!(index, doc_id, field, "Updated document field.");

		Ok(())
	}

	/// The target field is an array of objects each carrying an `id`. Creates
	/// the array when absent, replaces the element with a matching `id`, and
	/// appends otherwise. The stored element always has `id = element_id`.
	pub async fn upsert_field_element_by_id(
		&self,
		index: &str,
		doc_id: &str,
		field: &str,
		element_id: &str,
		element: Value,
	) -> Result<()> {
		if element_id.is_empty() {
			return Err(Error::InvalidArgument("element_id must not be empty".to_string()));
		}

		let element = if element.is_null() { json!({ "id": element_id }) } else { element };
		let body = json!({
			"script": {
				"source": UPSERT_ELEMENT_SCRIPT,
				"lang": "painless",
				"params": {
					"field": field,
					"element_id": element_id,
					"new_element": element,
				},
			},
		});

		self.update(index, doc_id, &body).await?;
		tracing::debug!(index, doc_id, field, element_id, "Upserted field element.");

		Ok(())
	}

	/// Appends without deduplication; creates the array when absent.
	pub async fn add_field_element(
		&self,
		index: &str,
		doc_id: &str,
		field: &str,
		element: Value,
	) -> Result<()> {
		if element.is_null() {
			return Err(Error::InvalidArgument("element must not be null".to_string()));
		}

		let body = json!({
			"script": {
				"source": ADD_ELEMENT_SCRIPT,
				"lang": "painless",
				"params": {
					"field": field,
					"new_element": element,
				},
			},
		});

		self.update(index, doc_id, &body).await?;
		tracing::debug!(index, doc_id, field, "Appended field element.");

		Ok(())
	}

	/// Removes by id from an array field, or clears a single-object field
	/// whose id matches.
	pub async fn remove_field_element_by_id(
		&self,
		index: &str,
		doc_id: &str,
		field: &str,
		element_id: &str,
	) -> Result<()> {
		let body = json!({
			"script": {
				"source": REMOVE_ELEMENT_SCRIPT,
				"lang": "painless",
				"params": {
					"field": field,
					"element_id": element_id,
				},
			},
		});

		self.update(index, doc_id, &body).await?;
		tracing::debug!(index, doc_id, field, element_id, "Removed field element.");

		Ok(())
	}

	/// Fetches `_source`, optionally narrowed to the given fields. None on 404.
	pub async fn get(
		&self,
		index: &str,
		doc_id: &str,
		fields: &[&str],
	) -> Result<Option<Map<String, Value>>> {
		let url = format!("{}/{}/_doc/{}", self.base_url, index, doc_id);
		let mut req = self.request(self.client.get(url));

		if !fields.is_empty() {
			req = req.query(&[("_source_includes", fields.join(","))]);
		}

		let res = req.send().await?;

		if res.status().as_u16() == 404 {
			return Ok(None);
		}

		let body: Value = check(res).await?.json().await?;
		let source = body
			.get("_source")
			.and_then(Value::as_object)
			.cloned()
			.unwrap_or_default();

		Ok(Some(source))
	}

	pub(crate) async fn search_raw(&self, index: &str, body: &Value) -> Result<Option<Value>> {
		let url = format!("{}/{}/_search", self.base_url, index);
		let res = self.request(self.client.post(url)).json(body).send().await?;

		// A collection that has never been written to has no index yet.
		if res.status().as_u16() == 404 {
			return Ok(None);
		}

		Ok(Some(check(res).await?.json().await?))
	}

	async fn update(&self, index: &str, doc_id: &str, body: &Value) -> Result<()> {
		let url = format!("{}/{}/_update/{}", self.base_url, index, doc_id);
		let res = self
			.request(self.client.post(url))
			.query(&[("refresh", self.refresh_param())])
			.json(body)
			.send()
			.await?;

		if res.status().as_u16() == 404 {
			return Err(Error::NotFound(format!("document {doc_id} in {index}")));
		}

		check(res).await?;

		Ok(())
	}

	fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		match &self.username {
			Some(username) => builder.basic_auth(username, self.password.as_deref()),
			None => builder,
		}
	}

	fn refresh_param(&self) -> &'static str {
		if self.refresh { "true" } else { "false" }
	}
}

async fn check(res: reqwest::Response) -> Result<reqwest::Response> {
	if res.status().is_success() {
		return Ok(res);
	}

	let status = res.status().as_u16();
	let body = res.text().await.unwrap_or_default();

	Err(Error::Backend { status, body })
}
