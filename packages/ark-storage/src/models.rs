use uuid::Uuid;

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct DocumentHit {
	pub document_id: Uuid,
	pub title: Option<String>,
	pub summary: Option<String>,
	pub score: f32,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct ChunkHit {
	pub chunk_id: Uuid,
	pub document_id: Uuid,
	/// The chunk title, or the document title when the chunk has none.
	pub title: Option<String>,
	pub content: String,
	pub score: f32,
}
