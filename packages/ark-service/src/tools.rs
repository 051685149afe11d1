//! The tools a run offers to the model.

use serde_json::{Map, Value, json};

use crate::Result;
use ark_config::{ControlMode, Corpus, SimilarityTool};
use ark_providers::completion::ToolSpec;

const DEFAULT_EXIT_DESCRIPTION: &str = "Finish the run. Call this once the collected context is \
enough to answer the user, or when it is clear the corpus does not contain the answer.";
const DEFAULT_CHUNKS_DESCRIPTION: &str = "Search the corpus for passages semantically similar to \
the query and return them. Results are restricted to the documents selected by earlier document \
searches, if any.";
const DEFAULT_SUMMARIES_DESCRIPTION: &str = "Select documents whose summary is semantically \
similar to the query. Returns only how many documents matched; later passage searches are \
restricted to them.";
const DEFAULT_METADATA_DESCRIPTION: &str = "Select documents by metadata. Returns only how many \
documents matched; later passage searches are restricted to them.";
const FILTER_DESCRIPTION: &str = "JSON-encoded filter expression. Grammar: {\"and\":[...]}, \
{\"or\":[...]}, {\"not\":expr}, {\"field\":name,\"op\":op,\"value\"|\"values\":...} or \
{\"path\":[origin,key],\"op\":op,\"value\"|\"values\":...} where origin is file, source or llm and \
op is one of eq, ne, in, contains, like, exists, not_exists, not_contains. A bare array means and.";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
	Exit,
	FindChunksBySimilarity,
	FindDocumentsBySummarySimilarity,
	FindDocumentsByMetadata,
}
impl ToolKind {
	pub const ALL: [Self; 4] = [
		Self::Exit,
		Self::FindChunksBySimilarity,
		Self::FindDocumentsBySummarySimilarity,
		Self::FindDocumentsByMetadata,
	];

	pub fn name(self) -> &'static str {
		match self {
			Self::Exit => "exit",
			Self::FindChunksBySimilarity => "findChunksBySimilarity",
			Self::FindDocumentsBySummarySimilarity => "findDocumentsBySummarySimilarity",
			Self::FindDocumentsByMetadata => "findDocumentsByMetadata",
		}
	}

	pub fn parse(name: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|kind| kind.name() == name)
	}
}

/// Builds the full tool set for `corpus`, in `ToolKind::ALL` order, skipping disabled tools.
pub fn build_tools(corpus: &Corpus) -> Result<Vec<ToolSpec>> {
	let tools = &corpus.tools;
	let mut specs = Vec::with_capacity(ToolKind::ALL.len());

	for kind in ToolKind::ALL {
		let spec = match kind {
			ToolKind::Exit => {
				if !tools.exit.enabled {
					continue;
				}

				ToolSpec {
					name: kind.name().to_string(),
					description: description(
						tools.exit.description.as_deref(),
						DEFAULT_EXIT_DESCRIPTION,
					),
					parameters: object_schema(
						[
							("reasoning", string_property("Why the run can end now.")),
							("answer", string_property("The final answer for the user.")),
						],
						&["reasoning", "answer"],
					),
				}
			},
			ToolKind::FindChunksBySimilarity => {
				let tool = &tools.find_chunks_by_similarity;

				if !tool.enabled {
					continue;
				}

				similarity_spec(kind, tool, DEFAULT_CHUNKS_DESCRIPTION)
			},
			ToolKind::FindDocumentsBySummarySimilarity => {
				let tool = &tools.find_documents_by_summary_similarity;

				if !tool.enabled {
					continue;
				}

				similarity_spec(kind, tool, DEFAULT_SUMMARIES_DESCRIPTION)
			},
			ToolKind::FindDocumentsByMetadata => {
				let tool = &tools.find_documents_by_metadata;

				if !tool.enabled {
					continue;
				}

				let base = description(tool.description.as_deref(), DEFAULT_METADATA_DESCRIPTION);
				let reasoning = ("reasoning", string_property("Why these documents are needed."));
				let parameters = match tool.control_mode {
					ControlMode::Agent => object_schema(
						[reasoning, ("filter", string_property(FILTER_DESCRIPTION))],
						&["reasoning", "filter"],
					),
					ControlMode::Collaborative => object_schema(
						[reasoning, ("filter", string_property(FILTER_DESCRIPTION))],
						&["reasoning"],
					),
					ControlMode::External => object_schema([reasoning], &["reasoning"]),
				};

				ToolSpec {
					name: kind.name().to_string(),
					description: format!(
						"{base}\n\nAvailable fields: {}",
						corpus.field_schema_json()?
					),
					parameters,
				}
			},
		};

		specs.push(spec);
	}

	Ok(specs)
}

fn similarity_spec(kind: ToolKind, tool: &SimilarityTool, default_description: &str) -> ToolSpec {
	let mut properties = vec![
		("reasoning", string_property("Why this search helps answer the user.")),
		("query", string_property("Natural-language search text.")),
	];

	if tool.search_control == ControlMode::Agent {
		properties.push((
			"limit",
			json!({
				"type": "integer",
				"description": format!("Maximum number of results. Defaults to {}.", tool.limit),
			}),
		));
		properties.push((
			"scoreThreshold",
			json!({
				"type": "number",
				"description": format!(
					"Minimum similarity score in the range -1 to 1. Defaults to {}.",
					tool.score_threshold
				),
			}),
		));
	}

	ToolSpec {
		name: kind.name().to_string(),
		description: description(tool.description.as_deref(), default_description),
		parameters: object_schema(properties, &["reasoning", "query"]),
	}
}

fn description(configured: Option<&str>, default: &str) -> String {
	configured.unwrap_or(default).to_string()
}

fn string_property(description: &str) -> Value {
	json!({ "type": "string", "description": description })
}

fn object_schema<'a>(
	properties: impl IntoIterator<Item = (&'a str, Value)>,
	required: &[&str],
) -> Value {
	let properties = properties
		.into_iter()
		.map(|(name, schema)| (name.to_string(), schema))
		.collect::<Map<_, _>>();

	json!({
		"type": "object",
		"properties": properties,
		"required": required,
		"additionalProperties": false,
	})
}
