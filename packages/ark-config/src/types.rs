use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub corpora: Vec<Corpus>,
}
impl Config {
	pub fn corpus(&self, corpus_id: &str) -> Option<&Corpus> {
		self.corpora.iter().find(|corpus| corpus.id == corpus_id)
	}
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub http_bind: String,
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
	pub vector_dim: u32,
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub llm: LlmProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

/// One searchable knowledge corpus. `id` doubles as the graph id used by the search backend.
#[derive(Debug, Deserialize)]
pub struct Corpus {
	pub id: String,
	/// Overrides `providers.embedding.model` for this corpus.
	pub embedding_model: Option<String>,
	pub system_prompt: Option<String>,
	#[serde(default)]
	pub retrieval: Retrieval,
	#[serde(default)]
	pub tools: Tools,
	#[serde(default)]
	pub fields: Vec<FieldDefinition>,
}
impl Corpus {
	pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
		self.fields.iter().find(|field| field.name == name)
	}

	/// The model-facing description of the resolution catalog. Chains are omitted; the model only
	/// needs names, hints, and descriptions.
	pub fn field_schema_json(&self) -> Result<String> {
		let fields = self
			.fields
			.iter()
			.map(|field| {
				let mut entry = Map::new();

				entry.insert("name".to_string(), Value::String(field.name.clone()));

				if let Some(kind) = field.r#type {
					entry.insert("type".to_string(), Value::String(kind.as_str().to_string()));
				}
				if let Some(description) = field.description.as_ref() {
					entry.insert("description".to_string(), Value::String(description.clone()));
				}

				Value::Object(entry)
			})
			.collect::<Vec<_>>();

		serde_json::to_string(&serde_json::json!({ "fields": fields }))
			.map_err(|source| Error::RenderFieldSchema { corpus_id: self.id.clone(), source })
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Retrieval {
	pub max_iterations: u32,
	pub response_mode: ResponseMode,
	pub max_sources: u32,
}
impl Default for Retrieval {
	fn default() -> Self {
		Self { max_iterations: 5, response_mode: ResponseMode::AnswerAndSources, max_sources: 5 }
	}
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
	#[default]
	AnswerAndSources,
	AnswerOnly,
	SourcesOnly,
}
impl ResponseMode {
	pub fn includes_answer(self) -> bool {
		!matches!(self, Self::SourcesOnly)
	}

	pub fn includes_sources(self) -> bool {
		!matches!(self, Self::AnswerOnly)
	}
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Tools {
	pub exit: ExitTool,
	pub find_chunks_by_similarity: SimilarityTool,
	pub find_documents_by_summary_similarity: SimilarityTool,
	pub find_documents_by_metadata: MetadataTool,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExitTool {
	pub enabled: bool,
	pub description: Option<String>,
}
impl Default for ExitTool {
	fn default() -> Self {
		Self { enabled: true, description: None }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimilarityTool {
	pub enabled: bool,
	pub description: Option<String>,
	/// `agent` exposes `limit` and `scoreThreshold` to the model; any other mode pins them to the
	/// values below.
	pub search_control: ControlMode,
	pub limit: u32,
	pub score_threshold: f32,
}
impl Default for SimilarityTool {
	fn default() -> Self {
		Self {
			enabled: true,
			description: None,
			search_control: ControlMode::External,
			limit: 10,
			score_threshold: 0.0,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MetadataTool {
	pub enabled: bool,
	pub description: Option<String>,
	pub control_mode: ControlMode,
	pub merge_strategy: MergeStrategy,
}
impl Default for MetadataTool {
	fn default() -> Self {
		Self {
			enabled: true,
			description: None,
			control_mode: ControlMode::Agent,
			merge_strategy: MergeStrategy::MergeAnd,
		}
	}
}

/// Who may influence a tool's filtering: the model, the caller, or both.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
	#[default]
	Agent,
	External,
	Collaborative,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
	#[default]
	MergeAnd,
	MergeOr,
	AgentPriority,
	ExternalPriority,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FieldDefinition {
	pub name: String,
	pub description: Option<String>,
	pub r#type: Option<FieldType>,
	#[serde(default)]
	pub sources: Vec<SourceChain>,
	/// Used for every source without an explicit entry in `sources`.
	pub wildcard: Option<Vec<ChainStep>>,
}
impl FieldDefinition {
	/// `source:<name>`, then `file:<name>`, then `llm:<name>`.
	pub fn default_chain(&self) -> Vec<ChainStep> {
		vec![
			ChainStep::Source { field_name: self.name.clone() },
			ChainStep::File { field_name: self.name.clone() },
			ChainStep::Llm { field_name: self.name.clone() },
		]
	}

	pub fn fallback_chain(&self) -> Vec<ChainStep> {
		self.wildcard.clone().unwrap_or_else(|| self.default_chain())
	}
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
	String,
	Number,
	Boolean,
	Multi,
}
impl FieldType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::String => "string",
			Self::Number => "number",
			Self::Boolean => "boolean",
			Self::Multi => "multi",
		}
	}
}

#[derive(Clone, Debug, Deserialize)]
pub struct SourceChain {
	pub source_id: String,
	pub chain: Vec<ChainStep>,
}

/// Where raw per-document metadata comes from.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataOrigin {
	File,
	Source,
	Llm,
}
impl MetadataOrigin {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::File => "file",
			Self::Source => "source",
			Self::Llm => "llm",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"file" => Some(Self::File),
			"source" => Some(Self::Source),
			"llm" => Some(Self::Llm),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainStep {
	File {
		field_name: String,
	},
	Source {
		field_name: String,
	},
	Llm {
		field_name: String,
	},
	Constant {
		#[serde(default)]
		value: Option<Value>,
		#[serde(default)]
		values: Option<Vec<Value>>,
	},
}
impl ChainStep {
	pub fn metadata(&self) -> Option<(MetadataOrigin, &str)> {
		match self {
			Self::File { field_name } => Some((MetadataOrigin::File, field_name.as_str())),
			Self::Source { field_name } => Some((MetadataOrigin::Source, field_name.as_str())),
			Self::Llm { field_name } => Some((MetadataOrigin::Llm, field_name.as_str())),
			Self::Constant { .. } => None,
		}
	}
}
