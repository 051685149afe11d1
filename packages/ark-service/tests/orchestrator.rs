use std::sync::{Arc, Mutex};

use serde_json::{Map, Value, json};
use uuid::Uuid;

use ark_config::{
	Config, ControlMode, Corpus, EmbeddingProviderConfig, FieldDefinition, LlmProviderConfig,
	Postgres, ResponseMode, Retrieval, Service, Storage, Tools,
};
use ark_domain::CompiledPredicate;
use ark_providers::completion::{Completion, Message, Role, ToolCall, ToolSpec};
use ark_service::{
	ArkService, BoxFuture, ChatMessage, CompletionProvider, EmbeddingProvider, Error, Providers,
	Result, RetrievalRequest, SearchBackend,
};
use ark_storage::{
	chunks::ChunkQuery,
	models::{ChunkHit, DocumentHit},
};

type Policy = dyn Fn(usize, &[Message], &[ToolSpec]) -> Result<Completion> + Send + Sync;

struct ScriptedCompletion {
	policy: Box<Policy>,
	offered: Mutex<Vec<Vec<String>>>,
	transcripts: Mutex<Vec<Vec<Message>>>,
}
impl ScriptedCompletion {
	fn new(
		policy: impl Fn(usize, &[Message], &[ToolSpec]) -> Result<Completion>
		+ Send
		+ Sync
		+ 'static,
	) -> Arc<Self> {
		Arc::new(Self {
			policy: Box::new(policy),
			offered: Mutex::new(Vec::new()),
			transcripts: Mutex::new(Vec::new()),
		})
	}

	fn offered(&self) -> Vec<Vec<String>> {
		self.offered.lock().expect("offered lock").clone()
	}

	fn transcripts(&self) -> Vec<Vec<Message>> {
		self.transcripts.lock().expect("transcripts lock").clone()
	}
}
impl CompletionProvider for ScriptedCompletion {
	fn complete<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		messages: &'a [Message],
		tools: &'a [ToolSpec],
		_force_tool: bool,
	) -> BoxFuture<'a, Result<Completion>> {
		let index = {
			let mut offered = self.offered.lock().expect("offered lock");

			offered.push(tools.iter().map(|tool| tool.name.clone()).collect());

			offered.len() - 1
		};

		self.transcripts.lock().expect("transcripts lock").push(messages.to_vec());

		let result = (self.policy)(index, messages, tools);

		Box::pin(async move { result })
	}
}

struct StubEmbedding {
	fail: bool,
}
impl EmbeddingProvider for StubEmbedding {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		_model: Option<&'a str>,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		let result = if self.fail {
			Err(Error::Provider { message: "embedding endpoint returned 503".to_string() })
		} else {
			Ok(vec![vec![0.0; cfg.dimensions as usize]; texts.len()])
		};

		Box::pin(async move { result })
	}
}

#[derive(Default)]
struct StubBackend {
	counted: Mutex<Vec<Option<CompiledPredicate>>>,
	chunk_queries: Mutex<Vec<(Option<Vec<Uuid>>, Option<CompiledPredicate>, i64)>>,
}
impl StubBackend {
	fn document(id: u128, score: f32) -> DocumentHit {
		DocumentHit {
			document_id: Uuid::from_u128(id),
			title: Some(format!("Document {id}")),
			summary: Some("CONFIDENTIAL SUMMARY TEXT".to_string()),
			score,
		}
	}

	fn chunk(id: u128, document: u128, score: f32) -> ChunkHit {
		ChunkHit {
			chunk_id: Uuid::from_u128(id),
			document_id: Uuid::from_u128(document),
			title: Some(format!("Document {document}")),
			content: format!("Passage {id}."),
			score,
		}
	}
}
impl SearchBackend for StubBackend {
	fn count_documents<'a>(
		&'a self,
		_graph_id: &'a str,
		filter: Option<&'a CompiledPredicate>,
	) -> BoxFuture<'a, Result<i64>> {
		self.counted.lock().expect("counted lock").push(filter.cloned());

		Box::pin(async move { Ok(7) })
	}

	fn search_documents<'a>(
		&'a self,
		_graph_id: &'a str,
		_vector: &'a [f32],
		_limit: i64,
	) -> BoxFuture<'a, Result<Vec<DocumentHit>>> {
		let hits = vec![Self::document(1, 0.9), Self::document(2, 0.6), Self::document(3, 0.1)];

		Box::pin(async move { Ok(hits) })
	}

	fn search_chunks<'a>(
		&'a self,
		query: &'a ChunkQuery<'a>,
	) -> BoxFuture<'a, Result<Vec<ChunkHit>>> {
		self.chunk_queries.lock().expect("chunk lock").push((
			query.only_doc_ids.map(<[Uuid]>::to_vec),
			query.filter.cloned(),
			query.limit,
		));

		let hits = vec![Self::chunk(10, 1, 0.8), Self::chunk(11, 2, 0.7), Self::chunk(12, 2, 0.2)];

		Box::pin(async move { Ok(hits) })
	}
}

fn corpus(max_iterations: u32) -> Corpus {
	let mut tools = Tools::default();

	tools.find_chunks_by_similarity.score_threshold = 0.5;
	tools.find_documents_by_summary_similarity.score_threshold = 0.5;

	Corpus {
		id: "handbook".to_string(),
		embedding_model: None,
		system_prompt: None,
		retrieval: Retrieval {
			max_iterations,
			response_mode: ResponseMode::AnswerAndSources,
			max_sources: 5,
		},
		tools,
		fields: vec![FieldDefinition {
			name: "lang".to_string(),
			description: None,
			r#type: None,
			sources: Vec::new(),
			wildcard: None,
		}],
	}
}

fn config(corpus: Corpus) -> Config {
	Config {
		service: Service { http_bind: "127.0.0.1:0".to_string(), log_level: "info".to_string() },
		storage: Storage {
			postgres: Postgres {
				dsn: "postgres://unused".to_string(),
				pool_max_conns: 1,
				vector_dim: 3,
			},
		},
		providers: ark_config::Providers {
			embedding: EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "key".to_string(),
				path: "/embeddings".to_string(),
				model: "embed".to_string(),
				dimensions: 3,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			llm: LlmProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "key".to_string(),
				path: "/chat/completions".to_string(),
				model: "chat".to_string(),
				temperature: 0.0,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		corpora: vec![corpus],
	}
}

fn service(
	corpus: Corpus,
	completion: Arc<ScriptedCompletion>,
	backend: Arc<StubBackend>,
	embedding_fails: bool,
) -> ArkService {
	ArkService::with_providers(
		config(corpus),
		backend,
		Providers::new(completion, Arc::new(StubEmbedding { fail: embedding_fails })),
	)
}

fn request(filter: Option<Value>) -> RetrievalRequest {
	RetrievalRequest {
		corpus_id: "handbook".to_string(),
		messages: vec![ChatMessage {
			role: Role::User,
			content: "How do I rotate keys?".to_string(),
		}],
		filter,
	}
}

fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
	ToolCall { id: id.to_string(), name: name.to_string(), arguments: arguments.to_string() }
}

fn calls(tool_calls: Vec<ToolCall>) -> Result<Completion> {
	Ok(Completion { content: None, tool_calls })
}

fn exit(answer: &str) -> ToolCall {
	call("exit", "exit", json!({ "reasoning": "done", "answer": answer }))
}

fn chunks_call(id: &str) -> ToolCall {
	call(id, "findChunksBySimilarity", json!({ "reasoning": "look", "query": "rotate keys" }))
}

fn tool_results(transcript: &[Message]) -> Vec<Value> {
	transcript
		.iter()
		.filter(|message| message.role == Role::Tool)
		.map(|message| {
			serde_json::from_str(message.content.as_deref().unwrap_or("null"))
				.expect("tool result json")
		})
		.collect()
}

#[tokio::test]
async fn final_iteration_offers_only_exit() {
	let completion = ScriptedCompletion::new(|_, _, tools| {
		if tools.len() == 1 {
			calls(vec![exit("Use the key rotation runbook.")])
		} else {
			calls(vec![chunks_call("c")])
		}
	});
	let service = service(corpus(3), completion.clone(), Arc::default(), false);
	let result = service.retrieve(request(None)).await.expect("run failed");
	let offered = completion.offered();

	assert_eq!(offered.len(), 3);
	assert_eq!(offered[0].len(), 4);
	assert_eq!(offered[1].len(), 4);
	assert_eq!(offered[2], vec!["exit".to_string()]);
	assert_eq!(result.content, "Use the key rotation runbook.");
	assert_eq!(result.workflow.len(), 3);
	assert_eq!(result.workflow[2].tool, "exit");
	assert_eq!(result.workflow[2].iteration, 3);

	let last_transcript = completion.transcripts().pop().expect("transcript");

	assert_eq!(last_transcript.last().map(|message| message.role), Some(Role::System));
}

#[tokio::test]
async fn document_tools_only_return_counts() {
	let completion = ScriptedCompletion::new(|index, _, _| match index {
		0 => calls(vec![
			call(
				"m",
				"findDocumentsByMetadata",
				json!({
					"reasoning": "english only",
					"filter": "{\"field\":\"lang\",\"op\":\"eq\",\"value\":\"en\"}",
				}),
			),
			call(
				"s",
				"findDocumentsBySummarySimilarity",
				json!({ "reasoning": "r", "query": "keys" }),
			),
		]),
		_ => calls(vec![exit("ok")]),
	});
	let service = service(corpus(5), completion.clone(), Arc::default(), false);

	service.retrieve(request(None)).await.expect("run failed");

	let transcript = completion.transcripts().pop().expect("transcript");
	let results = tool_results(&transcript);

	assert_eq!(results, vec![json!({ "matchedDocuments": 7 }), json!({ "matchedDocuments": 2 })]);
	assert!(transcript.iter().all(|message| {
		!message.content.as_deref().unwrap_or_default().contains("CONFIDENTIAL")
	}));
}

#[tokio::test]
async fn chunk_search_uses_earlier_restrictions() {
	let completion = ScriptedCompletion::new(|index, _, _| match index {
		0 => calls(vec![
			call(
				"m",
				"findDocumentsByMetadata",
				json!({
					"reasoning": "r",
					"filter": "{\"field\":\"lang\",\"op\":\"eq\",\"value\":\"en\"}",
				}),
			),
			call(
				"s",
				"findDocumentsBySummarySimilarity",
				json!({ "reasoning": "r", "query": "keys" }),
			),
			chunks_call("c1"),
		]),
		1 => calls(vec![chunks_call("c2")]),
		_ => calls(vec![exit("Rotate them quarterly.")]),
	});
	let backend = Arc::new(StubBackend::default());
	let service = service(corpus(5), completion.clone(), backend.clone(), false);
	let result = service.retrieve(request(None)).await.expect("run failed");
	let queries = backend.chunk_queries.lock().expect("chunk lock").clone();

	assert_eq!(queries.len(), 2);
	assert_eq!(queries[0].0, Some(vec![Uuid::from_u128(1), Uuid::from_u128(2)]));
	assert!(queries[0].1.as_ref().is_some_and(|filter| !filter.is_empty()));
	assert_eq!(queries[0].2, 10);

	// Chunks below the 0.5 threshold are dropped; repeated chunks collapse into one source.
	let chunk_results = tool_results(&completion.transcripts()[1]);

	assert_eq!(chunk_results[2]["chunks"].as_array().map(Vec::len), Some(2));
	assert_eq!(
		result.sources.iter().map(|source| source.id).collect::<Vec<_>>(),
		vec![Uuid::from_u128(10), Uuid::from_u128(11)]
	);
	assert_eq!(result.content, "Rotate them quarterly.");
}

#[tokio::test]
async fn reply_without_tool_calls_is_the_answer() {
	let completion = ScriptedCompletion::new(|_, _, _| {
		Ok(Completion {
			content: Some("The corpus does not cover this.".to_string()),
			tool_calls: Vec::new(),
		})
	});
	let service = service(corpus(5), completion.clone(), Arc::default(), false);
	let result = service.retrieve(request(None)).await.expect("run failed");

	assert_eq!(result.content, "The corpus does not cover this.");
	assert!(result.workflow.is_empty());
	assert!(result.sources.is_empty());
	assert_eq!(completion.offered().len(), 1);
}

#[tokio::test]
async fn unknown_tool_fails_the_run() {
	let completion = ScriptedCompletion::new(|_, _, _| {
		calls(vec![call("x", "deleteEverything", json!({}))])
	});
	let service = service(corpus(5), completion, Arc::default(), false);
	let err = service.retrieve(request(None)).await.expect_err("run should fail");

	let Error::RunFailed { message, workflow } = err else {
		panic!("Expected a failed run.");
	};

	assert!(message.contains("deleteEverything"));
	assert!(workflow.is_empty());
}

#[tokio::test]
async fn withheld_tool_on_final_iteration_keeps_last_message() {
	let completion = ScriptedCompletion::new(|_, _, _| {
		Ok(Completion {
			content: Some("Best effort: rotate quarterly.".to_string()),
			tool_calls: vec![chunks_call("c")],
		})
	});
	let service = service(corpus(2), completion.clone(), Arc::default(), false);
	let result = service.retrieve(request(None)).await.expect("run failed");
	let offered = completion.offered();

	assert_eq!(offered.len(), 2);
	assert_eq!(offered[1], vec!["exit".to_string()]);
	assert_eq!(result.content, "Best effort: rotate quarterly.");
	assert_eq!(result.workflow.len(), 1);
	assert_eq!(result.workflow[0].tool, "findChunksBySimilarity");
	assert_eq!(result.sources.len(), 2);
}

#[tokio::test]
async fn empty_summary_match_restricts_chunks_to_nothing() {
	let completion = ScriptedCompletion::new(|index, _, _| match index {
		0 => calls(vec![
			call(
				"s",
				"findDocumentsBySummarySimilarity",
				json!({ "reasoning": "r", "query": "x" }),
			),
			chunks_call("c"),
		]),
		_ => calls(vec![exit("Nothing relevant.")]),
	});
	let backend = Arc::new(StubBackend::default());
	let mut corpus = corpus(5);

	corpus.tools.find_documents_by_summary_similarity.score_threshold = 0.95;

	let service = service(corpus, completion.clone(), backend.clone(), false);

	service.retrieve(request(None)).await.expect("run failed");

	let queries = backend.chunk_queries.lock().expect("chunk lock").clone();

	assert_eq!(tool_results(&completion.transcripts()[1])[0], json!({ "matchedDocuments": 0 }));
	assert_eq!(queries.len(), 1);
	assert_eq!(queries[0].0, Some(Vec::new()));
}

#[tokio::test]
async fn collaborator_failure_keeps_partial_workflow() {
	let completion = ScriptedCompletion::new(|index, _, _| match index {
		0 => calls(vec![call(
			"m",
			"findDocumentsByMetadata",
			json!({ "reasoning": "r", "filter": "[]" }),
		)]),
		_ => calls(vec![chunks_call("c")]),
	});
	let service = service(corpus(5), completion, Arc::default(), true);
	let err = service.retrieve(request(None)).await.expect_err("run should fail");
	let Error::RunFailed { message, workflow } = err else {
		panic!("Expected a failed run.");
	};

	assert!(message.contains("embedding endpoint returned 503"));
	assert_eq!(workflow.len(), 1);
	assert_eq!(workflow[0].tool, "findDocumentsByMetadata");
}

#[tokio::test]
async fn malformed_arguments_fail_the_run() {
	let completion = ScriptedCompletion::new(|_, _, _| {
		calls(vec![ToolCall {
			id: "c".to_string(),
			name: "findChunksBySimilarity".to_string(),
			arguments: "{\"query\": ".to_string(),
		}])
	});
	let service = service(corpus(5), completion, Arc::default(), false);

	assert!(matches!(service.retrieve(request(None)).await, Err(Error::RunFailed { .. })));
}

#[tokio::test]
async fn malformed_filter_degrades_to_no_query() {
	let completion = ScriptedCompletion::new(|index, _, _| match index {
		0 => calls(vec![call(
			"m",
			"findDocumentsByMetadata",
			json!({ "reasoning": "r", "filter": "{\"field\": \"lang\", \"op\": " }),
		)]),
		_ => calls(vec![exit("done")]),
	});
	let backend = Arc::new(StubBackend::default());
	let service = service(corpus(5), completion.clone(), backend.clone(), false);
	let result = service.retrieve(request(None)).await.expect("run failed");

	assert!(backend.counted.lock().expect("counted lock").is_empty());
	assert_eq!(tool_results(&completion.transcripts()[1]), vec![json!({ "matchedDocuments": 0 })]);
	assert_eq!(result.workflow[0].summary["filter"], Value::Null);
}

#[tokio::test]
async fn external_control_uses_caller_filter() {
	let completion = ScriptedCompletion::new(|index, _, _| match index {
		0 => calls(vec![call(
			"m",
			"findDocumentsByMetadata",
			json!({
				"reasoning": "r",
				"filter": "{\"field\":\"lang\",\"op\":\"eq\",\"value\":\"de\"}",
			}),
		)]),
		_ => calls(vec![exit("done")]),
	});
	let backend = Arc::new(StubBackend::default());
	let mut corpus = corpus(5);

	corpus.tools.find_documents_by_metadata.control_mode = ControlMode::External;

	let service = service(corpus, completion, backend.clone(), false);
	let result = service
		.retrieve(request(Some(json!({ "field": "lang", "op": "eq", "value": "en" }))))
		.await
		.expect("run failed");
	let counted = backend.counted.lock().expect("counted lock").clone();

	assert_eq!(counted.len(), 1);
	assert!(counted[0].as_ref().is_some_and(|filter| filter.params.values().any(|v| v == "en")));
	assert!(counted[0].as_ref().is_some_and(|filter| filter.params.values().all(|v| v != "de")));
	assert_eq!(result.workflow[0].summary["filter"]["value"], "en");
}

#[tokio::test]
async fn sources_only_suppresses_the_answer() {
	let completion = ScriptedCompletion::new(|index, _, _| match index {
		0 => calls(vec![chunks_call("c")]),
		_ => calls(vec![exit("hidden")]),
	});
	let mut corpus = corpus(5);

	corpus.retrieval.response_mode = ResponseMode::SourcesOnly;
	corpus.retrieval.max_sources = 1;

	let service = service(corpus, completion, Arc::default(), false);
	let result = service.retrieve(request(None)).await.expect("run failed");

	assert_eq!(result.content, "");
	assert_eq!(result.sources.len(), 1);
	assert_eq!(result.sources[0].id, Uuid::from_u128(10));
}

#[tokio::test]
async fn rejects_unknown_corpus_and_empty_history() {
	let completion = ScriptedCompletion::new(|_, _, _| calls(vec![exit("x")]));
	let service = service(corpus(5), completion, Arc::default(), false);
	let mut unknown = request(None);

	unknown.corpus_id = "missing".to_string();

	assert!(matches!(service.retrieve(unknown).await, Err(Error::NotFound { .. })));

	let mut empty = request(None);

	empty.messages.clear();

	assert!(matches!(service.retrieve(empty).await, Err(Error::InvalidRequest { .. })));
}
