//! The bounded tool-calling loop behind `ArkService::retrieve`.
//!
//! A run asks the model for the next action, executes the requested tools in order, feeds their
//! results back, and stops on `exit`, on a reply without tool calls, on the first error, or after
//! `max_iterations` completions. The last iteration only offers `exit`; a model that calls another
//! known tool there ends the run with its last message as the answer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::{
	ArkService, Error, Result,
	sources::assemble_sources,
	state::{LoopState, Source, ToolCallRecord},
	tools::{self, ToolKind},
};
use ark_config::{Corpus, SimilarityTool};
use ark_domain::{FilterExpr, compile, merge, parse_filter_value};
use ark_providers::completion::{Message, Role, ToolCall, ToolSpec};
use ark_storage::chunks::ChunkQuery;

const DEFAULT_SYSTEM_PROMPT: &str = "You answer questions using a document corpus that you can \
only reach through the provided tools. Narrow down relevant documents by metadata or summary \
similarity when that helps, fetch passages with chunk similarity search, and call exit with an \
answer grounded in the passages you found. Say so when the corpus does not contain the answer.";
const FINAL_ITERATION_PROMPT: &str = "This is the final step. Call exit now with the best answer \
the collected passages support.";

#[derive(Clone, Debug, Deserialize)]
pub struct ChatMessage {
	pub role: Role,
	pub content: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RetrievalRequest {
	pub corpus_id: String,
	/// Prior conversation, oldest first, ending with the user turn to answer.
	pub messages: Vec<ChatMessage>,
	/// Caller-side filter, either a filter tree or its JSON-encoded string.
	#[serde(default)]
	pub filter: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RetrievalResult {
	pub content: String,
	pub sources: Vec<Source>,
	pub workflow: Vec<ToolCallRecord>,
}

enum Step {
	Continue(Value),
	Exited,
	/// A known tool that this iteration did not offer. Ends the run with the best-effort answer.
	Withheld,
}

struct Run<'a> {
	service: &'a ArkService,
	corpus: &'a Corpus,
	external_filter: Option<FilterExpr>,
	state: LoopState,
}

impl ArkService {
	pub async fn retrieve(&self, req: RetrievalRequest) -> Result<RetrievalResult> {
		let corpus = self.cfg.corpus(&req.corpus_id).ok_or_else(|| Error::NotFound {
			message: format!("Unknown corpus {:?}.", req.corpus_id),
		})?;
		let mut transcript = seed_transcript(corpus, &req.messages)?;
		let all_tools = tools::build_tools(corpus)?;
		let external_filter = match req.filter.as_ref().map(parse_filter_value).transpose() {
			Ok(filter) => filter.flatten(),
			Err(err) => {
				tracing::warn!(
					corpus_id = corpus.id.as_str(),
					error = %err,
					path = err.path(),
					"Ignoring unparseable caller filter."
				);

				None
			},
		};
		let mut run = Run { service: self, corpus, external_filter, state: LoopState::default() };

		match run.iterate(&mut transcript, &all_tools).await {
			Ok(()) => Ok(run.finish()),
			Err(err) => Err(run.fail(err)),
		}
	}
}

impl Run<'_> {
	async fn iterate(
		&mut self,
		transcript: &mut Vec<Message>,
		all_tools: &[ToolSpec],
	) -> Result<()> {
		let max_iterations = self.corpus.retrieval.max_iterations;
		let mut last_content = None;

		'iterations: for iteration in 1..=max_iterations {
			let remaining = max_iterations - iteration;
			let offered: Vec<ToolSpec> = if remaining == 0 {
				transcript.push(Message::system(FINAL_ITERATION_PROMPT));

				all_tools
					.iter()
					.filter(|tool| tool.name == ToolKind::Exit.name())
					.cloned()
					.collect()
			} else {
				all_tools.to_vec()
			};
			let force_tool = !offered.is_empty();

			tracing::info!(
				corpus_id = self.corpus.id.as_str(),
				iteration,
				remaining,
				tools_offered = offered.len(),
				"Requesting completion."
			);

			let completion = self
				.service
				.providers
				.completion
				.complete(
					&self.service.cfg.providers.llm,
					transcript.as_slice(),
					&offered,
					force_tool,
				)
				.await?;

			if completion.content.is_some() {
				last_content = completion.content.clone();
			}
			if completion.tool_calls.is_empty() {
				tracing::info!(
					iteration,
					"Completion without tool calls, treating it as the answer."
				);

				self.state.answer = Some(completion.content.unwrap_or_default());

				return Ok(());
			}

			transcript.push(Message::assistant_tool_calls(
				completion.content.clone(),
				completion.tool_calls.clone(),
			));

			for call in &completion.tool_calls {
				match self.dispatch(iteration, call, &offered).await? {
					Step::Continue(result) =>
						transcript.push(Message::tool_result(call.id.as_str(), result.to_string())),
					Step::Exited => return Ok(()),
					Step::Withheld => {
						tracing::warn!(
							corpus_id = self.corpus.id.as_str(),
							iteration,
							tool = call.name.as_str(),
							"Model called a tool that was not offered, ending the run."
						);

						break 'iterations;
					},
				}
			}
		}

		tracing::warn!(
			corpus_id = self.corpus.id.as_str(),
			max_iterations,
			"Run ended without exit, using the last model message as the answer."
		);

		self.state.answer = Some(last_content.unwrap_or_default());

		Ok(())
	}

	async fn dispatch(
		&mut self,
		iteration: u32,
		call: &ToolCall,
		offered: &[ToolSpec],
	) -> Result<Step> {
		let kind = ToolKind::parse(&call.name).ok_or_else(|| Error::Protocol {
			message: format!("Model called unknown tool {:?}.", call.name),
		})?;

		if !offered.iter().any(|tool| tool.name == kind.name()) {
			return Ok(Step::Withheld);
		}

		let arguments = parse_arguments(call)?;

		tracing::info!(
			iteration,
			tool = kind.name(),
			tool_call_id = call.id.as_str(),
			"Dispatching tool call."
		);

		let (step, summary) = match kind {
			ToolKind::Exit => {
				let answer = required_str(&arguments, kind, "answer")?.to_string();

				self.state.answer = Some(answer);

				(Step::Exited, json!({ "exited": true }))
			},
			ToolKind::FindChunksBySimilarity => self.find_chunks(kind, &arguments).await?,
			ToolKind::FindDocumentsBySummarySimilarity =>
				self.find_documents_by_summary(kind, &arguments).await?,
			ToolKind::FindDocumentsByMetadata => self.find_documents_by_metadata(&arguments).await?,
		};

		self.state.record(ToolCallRecord {
			iteration,
			tool: kind.name().to_string(),
			arguments: Value::Object(arguments),
			summary,
		});

		Ok(step)
	}

	async fn find_chunks(
		&mut self,
		kind: ToolKind,
		arguments: &Map<String, Value>,
	) -> Result<(Step, Value)> {
		let tool = &self.corpus.tools.find_chunks_by_similarity;
		let query = required_str(arguments, kind, "query")?;
		let (limit, threshold) = search_knobs(tool, arguments);
		let vector = self.embed_query(query).await?;
		let chunk_query = ChunkQuery {
			graph_id: self.corpus.id.as_str(),
			vector: &vector,
			limit,
			only_doc_ids: self.state.relevant_document_ids.as_deref(),
			filter: self.state.doc_filter.as_ref(),
		};
		let hits = self.service.backend.search_chunks(&chunk_query).await?;
		let chunks = hits
			.into_iter()
			.filter(|hit| hit.score >= threshold)
			.map(Source::from)
			.collect::<Vec<_>>();
		let result = json!({ "chunks": chunks });
		let summary = json!({
			"chunks": chunks.len(),
			"limit": limit,
			"scoreThreshold": threshold,
			"restrictedToDocuments": self.state.relevant_document_ids.as_ref().map(Vec::len),
			"metadataFilter": self.state.doc_filter.is_some(),
		});

		self.state.collected_chunks.extend(chunks);

		Ok((Step::Continue(result), summary))
	}

	async fn find_documents_by_summary(
		&mut self,
		kind: ToolKind,
		arguments: &Map<String, Value>,
	) -> Result<(Step, Value)> {
		let tool = &self.corpus.tools.find_documents_by_summary_similarity;
		let query = required_str(arguments, kind, "query")?;
		let (limit, threshold) = search_knobs(tool, arguments);
		let vector = self.embed_query(query).await?;
		let hits = self.service.backend.search_documents(&self.corpus.id, &vector, limit).await?;

		let relevant = hits
			.into_iter()
			.filter(|hit| hit.score >= threshold)
			.map(|hit| hit.document_id)
			.collect::<Vec<_>>();
		let matched = relevant.len();

		self.state.relevant_document_ids = Some(relevant);

		Ok((
			Step::Continue(json!({ "matchedDocuments": matched })),
			json!({ "matchedDocuments": matched, "limit": limit, "scoreThreshold": threshold }),
		))
	}

	async fn find_documents_by_metadata(
		&mut self,
		arguments: &Map<String, Value>,
	) -> Result<(Step, Value)> {
		let tool = &self.corpus.tools.find_documents_by_metadata;
		let agent_filter = match arguments.get("filter").map(parse_filter_value).transpose() {
			Ok(filter) => filter.flatten(),
			Err(err) => {
				tracing::warn!(
					corpus_id = self.corpus.id.as_str(),
					error = %err,
					path = err.path(),
					"Ignoring unparseable model filter."
				);

				None
			},
		};
		let effective = merge(
			agent_filter,
			self.external_filter.clone(),
			tool.control_mode,
			tool.merge_strategy,
		);
		let Some(effective) = effective else {
			return Ok((
				Step::Continue(json!({ "matchedDocuments": 0 })),
				json!({ "matchedDocuments": 0, "filter": Value::Null }),
			));
		};
		let compiled = compile(&effective, &self.corpus.fields);
		let matched = self.service.backend.count_documents(&self.corpus.id, Some(&compiled)).await?;

		self.state.doc_filter = if compiled.is_empty() { None } else { Some(compiled) };

		Ok((
			Step::Continue(json!({ "matchedDocuments": matched })),
			json!({ "matchedDocuments": matched, "filter": effective.to_value() }),
		))
	}

	async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
		let texts = [query.to_string()];
		let mut vectors = self
			.service
			.providers
			.embedding
			.embed(
				&self.service.cfg.providers.embedding,
				self.corpus.embedding_model.as_deref(),
				&texts,
			)
			.await?;

		if vectors.is_empty() {
			return Err(Error::Provider {
				message: "Embedding provider returned no vectors.".to_string(),
			});
		}

		Ok(vectors.swap_remove(0))
	}

	fn finish(self) -> RetrievalResult {
		let mode = self.corpus.retrieval.response_mode;
		let sources = if mode.includes_sources() {
			let max_sources = self.corpus.retrieval.max_sources as usize;

			assemble_sources(&self.state.collected_chunks, max_sources)
		} else {
			Vec::new()
		};
		let content = if mode.includes_answer() {
			self.state.answer.clone().unwrap_or_default()
		} else {
			String::new()
		};

		tracing::info!(
			corpus_id = self.corpus.id.as_str(),
			steps = self.state.workflow().len(),
			sources = sources.len(),
			"Retrieval run finished."
		);

		RetrievalResult { content, sources, workflow: self.state.into_workflow() }
	}

	fn fail(mut self, err: Error) -> Error {
		let message = err.to_string();

		tracing::warn!(
			corpus_id = self.corpus.id.as_str(),
			error = %message,
			steps = self.state.workflow().len(),
			"Retrieval run failed."
		);

		self.state.error = Some(message.clone());

		Error::RunFailed { message, workflow: self.state.into_workflow() }
	}
}

fn seed_transcript(corpus: &Corpus, history: &[ChatMessage]) -> Result<Vec<Message>> {
	if history.is_empty() {
		return Err(Error::InvalidRequest { message: "messages must be non-empty.".to_string() });
	}

	let mut transcript = Vec::with_capacity(history.len() + 1);

	let system_prompt = corpus.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT);

	transcript.push(Message::system(system_prompt));

	for message in history {
		if message.role == Role::Tool {
			return Err(Error::InvalidRequest {
				message: "messages may not contain tool results.".to_string(),
			});
		}

		transcript.push(Message::new(message.role, message.content.as_str()));
	}

	Ok(transcript)
}

fn parse_arguments(call: &ToolCall) -> Result<Map<String, Value>> {
	let raw = if call.arguments.trim().is_empty() { "{}" } else { call.arguments.as_str() };

	match serde_json::from_str::<Value>(raw) {
		Ok(Value::Object(arguments)) => Ok(arguments),
		Ok(_) => Err(Error::Protocol {
			message: format!("Arguments of tool {:?} must be a JSON object.", call.name),
		}),
		Err(err) => Err(Error::Protocol {
			message: format!("Arguments of tool {:?} are not valid JSON: {err}.", call.name),
		}),
	}
}

fn required_str<'a>(
	arguments: &'a Map<String, Value>,
	kind: ToolKind,
	name: &str,
) -> Result<&'a str> {
	arguments.get(name).and_then(Value::as_str).ok_or_else(|| Error::Protocol {
		message: format!("Tool {} requires a string {name:?} argument.", kind.name()),
	})
}

/// Effective `(limit, score_threshold)`. Model-supplied values only count under `agent` search
/// control; a non-positive limit or non-finite threshold falls back to the configured one.
fn search_knobs(tool: &SimilarityTool, arguments: &Map<String, Value>) -> (i64, f32) {
	let configured = (i64::from(tool.limit), tool.score_threshold);

	if tool.search_control != ark_config::ControlMode::Agent {
		return configured;
	}

	let limit = arguments
		.get("limit")
		.and_then(Value::as_f64)
		.map(|limit| limit as i64)
		.filter(|limit| *limit > 0)
		.unwrap_or(configured.0);
	let threshold = arguments
		.get("scoreThreshold")
		.and_then(Value::as_f64)
		.map(|threshold| threshold as f32)
		.filter(|threshold| threshold.is_finite())
		.unwrap_or(configured.1);

	(limit, threshold)
}
