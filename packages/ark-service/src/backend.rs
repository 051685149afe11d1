use ark_domain::CompiledPredicate;
use ark_storage::{
	chunks::{self, ChunkQuery},
	db::Db,
	documents,
	models::{ChunkHit, DocumentHit},
};

use crate::{BoxFuture, Result, SearchBackend};

/// `SearchBackend` over the Postgres + pgvector schema in `sql/`.
pub struct PgSearchBackend {
	db: Db,
}
impl PgSearchBackend {
	pub fn new(db: Db) -> Self {
		Self { db }
	}
}
impl SearchBackend for PgSearchBackend {
	fn count_documents<'a>(
		&'a self,
		graph_id: &'a str,
		filter: Option<&'a CompiledPredicate>,
	) -> BoxFuture<'a, Result<i64>> {
		Box::pin(async move {
			Ok(documents::count_matching(&self.db.pool, graph_id, filter).await?)
		})
	}

	fn search_documents<'a>(
		&'a self,
		graph_id: &'a str,
		vector: &'a [f32],
		limit: i64,
	) -> BoxFuture<'a, Result<Vec<DocumentHit>>> {
		Box::pin(async move {
			Ok(documents::search_by_summary(&self.db.pool, graph_id, vector, limit).await?)
		})
	}

	fn search_chunks<'a>(
		&'a self,
		query: &'a ChunkQuery<'a>,
	) -> BoxFuture<'a, Result<Vec<ChunkHit>>> {
		Box::pin(async move { Ok(chunks::search(&self.db.pool, query).await?) })
	}
}
