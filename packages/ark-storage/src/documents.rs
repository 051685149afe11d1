use sqlx::PgExecutor;

use crate::{Result, models::DocumentHit, params, vector_to_pg};
use ark_domain::CompiledPredicate;

pub const COMPLETED: &str = "completed";

/// Counts completed documents of `graph_id` that satisfy `filter`. An empty or absent filter
/// counts every completed document.
pub async fn count_matching<'e, E>(
	executor: E,
	graph_id: &str,
	filter: Option<&CompiledPredicate>,
) -> Result<i64>
where
	E: PgExecutor<'e>,
{
	let mut sql = String::from(
		"\
SELECT COUNT(*)
FROM documents d
WHERE d.graph_id = $1
	AND d.status = $2",
	);
	let mut values = Vec::new();

	if let Some(filter) = filter.filter(|filter| !filter.is_empty()) {
		let bound = params::bind_named(&filter.sql, &filter.params, 2)?;

		sql.push_str("\n\tAND (");
		sql.push_str(&bound.sql);
		sql.push(')');

		values = bound.values;
	}

	let mut query = sqlx::query_scalar::<_, i64>(&sql).bind(graph_id).bind(COMPLETED);

	for value in values {
		query = query.bind(value);
	}

	Ok(query.fetch_one(executor).await?)
}

/// Nearest completed documents by summary embedding, best first.
pub async fn search_by_summary<'e, E>(
	executor: E,
	graph_id: &str,
	vector: &[f32],
	limit: i64,
) -> Result<Vec<DocumentHit>>
where
	E: PgExecutor<'e>,
{
	let rows = sqlx::query_as::<_, DocumentHit>(
		"\
SELECT
	d.document_id,
	d.title,
	d.summary,
	(1 - (d.summary_vec <=> $2::text::vector))::real AS score
FROM documents d
WHERE d.graph_id = $1
	AND d.status = $3
	AND d.summary_vec IS NOT NULL
ORDER BY d.summary_vec <=> $2::text::vector ASC, d.document_id ASC
LIMIT $4",
	)
	.bind(graph_id)
	.bind(vector_to_pg(vector))
	.bind(COMPLETED)
	.bind(limit)
	.fetch_all(executor)
	.await?;

	Ok(rows)
}
