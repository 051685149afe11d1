use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{Result, documents::COMPLETED, models::ChunkHit, params, vector_to_pg};
use ark_domain::CompiledPredicate;

pub struct ChunkQuery<'a> {
	pub graph_id: &'a str,
	pub vector: &'a [f32],
	pub limit: i64,
	/// Restricts the search to these documents when present. An empty slice matches nothing.
	pub only_doc_ids: Option<&'a [Uuid]>,
	/// Document-level predicate over alias `d`.
	pub filter: Option<&'a CompiledPredicate>,
}

/// Nearest chunks of completed documents, best first.
pub async fn search<'e, E>(executor: E, query: &ChunkQuery<'_>) -> Result<Vec<ChunkHit>>
where
	E: PgExecutor<'e>,
{
	let mut sql = String::from(
		"\
SELECT
	c.chunk_id,
	c.document_id,
	COALESCE(c.title, d.title) AS title,
	c.content,
	(1 - (c.vec <=> $2::text::vector))::real AS score
FROM chunks c
JOIN documents d ON d.document_id = c.document_id
WHERE c.graph_id = $1
	AND d.status = $3
	AND c.vec IS NOT NULL",
	);
	let only_doc_ids = query.only_doc_ids;
	let mut offset = 4;

	if only_doc_ids.is_some() {
		offset += 1;

		sql.push_str(&format!("\n\tAND c.document_id = ANY(${offset})"));
	}

	let mut values = Vec::new();

	if let Some(filter) = query.filter.filter(|filter| !filter.is_empty()) {
		let bound = params::bind_named(&filter.sql, &filter.params, offset)?;

		sql.push_str("\n\tAND (");
		sql.push_str(&bound.sql);
		sql.push(')');

		values = bound.values;
	}

	sql.push_str("\nORDER BY c.vec <=> $2::text::vector ASC, c.chunk_id ASC\nLIMIT $4");

	let mut rows = sqlx::query_as::<_, ChunkHit>(&sql)
		.bind(query.graph_id)
		.bind(vector_to_pg(query.vector))
		.bind(COMPLETED)
		.bind(query.limit);

	if let Some(ids) = only_doc_ids {
		rows = rows.bind(ids.to_vec());
	}
	for value in values {
		rows = rows.bind(value);
	}

	Ok(rows.fetch_all(executor).await?)
}
