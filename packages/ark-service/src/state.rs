use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use ark_domain::CompiledPredicate;
use ark_storage::models::ChunkHit;

/// One executed tool call. Records are only ever appended.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ToolCallRecord {
	pub iteration: u32,
	pub tool: String,
	pub arguments: Value,
	pub summary: Value,
}

/// A retrieved chunk, as shown to the model and as returned to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Source {
	pub id: Uuid,
	pub title: Option<String>,
	pub content: String,
	pub document: Uuid,
	pub score: f32,
}
impl From<ChunkHit> for Source {
	fn from(hit: ChunkHit) -> Self {
		Self {
			id: hit.chunk_id,
			title: hit.title,
			content: hit.content,
			document: hit.document_id,
			score: hit.score,
		}
	}
}

/// Everything one run accumulates. Owned by that run and dropped with it.
#[derive(Debug, Default)]
pub struct LoopState {
	/// Set by summary similarity. Once set, chunk search only sees these documents, so an empty
	/// list means nothing is searchable.
	pub relevant_document_ids: Option<Vec<Uuid>>,
	/// Set by metadata search; restricts chunk search when present.
	pub doc_filter: Option<CompiledPredicate>,
	pub collected_chunks: Vec<Source>,
	pub answer: Option<String>,
	pub error: Option<String>,
	workflow: Vec<ToolCallRecord>,
}
impl LoopState {
	pub fn record(&mut self, record: ToolCallRecord) {
		self.workflow.push(record);
	}

	pub fn workflow(&self) -> &[ToolCallRecord] {
		&self.workflow
	}

	pub fn into_workflow(self) -> Vec<ToolCallRecord> {
		self.workflow
	}
}
