use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{Error, Result, es::EsStore};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct SearchRequest {
	pub resource: String,
	#[serde(default)]
	pub query: String,
	#[serde(default)]
	pub filters: Vec<Filter>,
	#[serde(default)]
	pub sort: Vec<Sort>,
	#[serde(default)]
	pub page: i64,
	#[serde(default)]
	pub page_size: i64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
	Eq,
	In,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Filter {
	pub field: String,
	pub op: FilterOp,
	#[serde(default)]
	pub value: String,
	#[serde(default)]
	pub values: Vec<String>,
	#[serde(default)]
	pub nested_path: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Sort {
	pub field: String,
	#[serde(default)]
	pub desc: bool,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct SearchResponse {
	pub total: i64,
	pub hits: Vec<SearchHit>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
	pub id: String,
	pub score: f64,
	pub source: Value,
}

impl EsStore {
	pub async fn search(
		&self,
		index: &str,
		req: &SearchRequest,
		searchable_fields: &[String],
	) -> Result<SearchResponse> {
		let body = build_search_body(req, searchable_fields)?;
		let Some(decoded) = self.search_raw(index, &body).await? else {
			return Ok(SearchResponse::default());
		};

		Ok(decode_search_response(&decoded))
	}
}

fn build_search_body(req: &SearchRequest, searchable_fields: &[String]) -> Result<Value> {
	let mut must = Vec::new();
	let mut filter = Vec::new();

	if !req.query.is_empty() {
		must.push(json!({
			"multi_match": {
				"query": req.query,
				"fields": searchable_fields,
			},
		}));
	}

	for f in &req.filters {
		if f.field.is_empty() {
			continue;
		}

		filter.push(build_filter_clause(f)?);
	}

	let mut body = json!({
		"query": { "bool": { "must": must, "filter": filter } },
		"from": req.page * req.page_size,
		"size": req.page_size,
	});
	let sorts = req
		.sort
		.iter()
		.filter(|s| !s.field.is_empty())
		.map(|s| json!({ (s.field.as_str()): { "order": if s.desc { "desc" } else { "asc" } } }))
		.collect::<Vec<_>>();

	if !sorts.is_empty()
		&& let Some(obj) = body.as_object_mut()
	{
		obj.insert("sort".to_string(), Value::Array(sorts));
	}

	Ok(body)
}

fn build_filter_clause(f: &Filter) -> Result<Value> {
	let inner = match f.op {
		FilterOp::Eq => {
			if f.value.is_empty() {
				return Err(Error::InvalidArgument(format!(
					"eq filter requires a value for field '{}'",
					f.field
				)));
			}

			json!({ "term": { (f.field.as_str()): f.value } })
		},
		FilterOp::In => {
			if f.values.is_empty() {
				return Err(Error::InvalidArgument(format!(
					"in filter requires values for field '{}'",
					f.field
				)));
			}

			json!({ "terms": { (f.field.as_str()): f.values } })
		},
	};

	if f.nested_path.is_empty() {
		return Ok(inner);
	}

	Ok(json!({
		"nested": {
			"path": f.nested_path,
			"query": inner,
		},
	}))
}

fn decode_search_response(decoded: &Value) -> SearchResponse {
	let hits_obj = decoded.get("hits").and_then(Value::as_object);
	let total = hits_obj
		.and_then(|h| h.get("total"))
		.and_then(|t| t.get("value"))
		.and_then(Value::as_i64)
		.unwrap_or(0);
	let mut hits = Vec::new();

	if let Some(raw_hits) = hits_obj.and_then(|h| h.get("hits")).and_then(Value::as_array) {
		for raw in raw_hits {
			let Some(id) = raw.get("_id").and_then(Value::as_str) else {
				continue;
			};

			hits.push(SearchHit {
				id: id.to_string(),
				score: raw.get("_score").and_then(Value::as_f64).unwrap_or(0.0),
				source: raw.get("_source").cloned().unwrap_or(Value::Null),
			});
		}
	}

	SearchResponse { total, hits }
}
