use sift_storage::search::{SearchRequest, SearchResponse};

use crate::{Error, IndexService, Result, collection};

const DEFAULT_PAGE_SIZE: i64 = 25;
const MAX_PAGE_SIZE: i64 = 100;

impl IndexService {
	pub async fn search(&self, mut req: SearchRequest) -> Result<SearchResponse> {
		if req.resource.is_empty() {
			return Err(Error::InvalidArgument("resource is required".to_string()));
		}

		let cfg = self.schema.get(&req.resource).ok_or(Error::UnknownResource)?;

		req.page_size = clamp_page_size(req.page_size);
		req.page = req.page.max(0);

		let index = collection(&cfg.resource);
		let searchable_fields = cfg.searchable_fields();

		Ok(self.es.search(&index, &req, &searchable_fields).await?)
	}
}

fn clamp_page_size(page_size: i64) -> i64 {
	if page_size <= 0 {
		return DEFAULT_PAGE_SIZE;
	}

	page_size.min(MAX_PAGE_SIZE)
}
