pub mod backend;
pub mod orchestrator;
pub mod sources;
pub mod state;
pub mod tools;

mod error;

pub use error::{Error, Result};
pub use orchestrator::{ChatMessage, RetrievalRequest, RetrievalResult};
pub use state::{LoopState, Source, ToolCallRecord};
pub use tools::ToolKind;

use std::{future::Future, pin::Pin, sync::Arc};

use ark_config::{Config, EmbeddingProviderConfig, LlmProviderConfig};
use ark_domain::CompiledPredicate;
use ark_providers::completion::{self, Completion, Message, ToolSpec};
use ark_storage::{
	chunks::ChunkQuery,
	db::Db,
	models::{ChunkHit, DocumentHit},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait CompletionProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Message],
		tools: &'a [ToolSpec],
		force_tool: bool,
	) -> BoxFuture<'a, Result<Completion>>;
}

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		model: Option<&'a str>,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;
}

/// Read-only access to the indexed corpus. `graph_id` is the corpus id.
pub trait SearchBackend
where
	Self: Send + Sync,
{
	fn count_documents<'a>(
		&'a self,
		graph_id: &'a str,
		filter: Option<&'a CompiledPredicate>,
	) -> BoxFuture<'a, Result<i64>>;

	fn search_documents<'a>(
		&'a self,
		graph_id: &'a str,
		vector: &'a [f32],
		limit: i64,
	) -> BoxFuture<'a, Result<Vec<DocumentHit>>>;

	fn search_chunks<'a>(&'a self, query: &'a ChunkQuery<'a>)
	-> BoxFuture<'a, Result<Vec<ChunkHit>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub completion: Arc<dyn CompletionProvider>,
	pub embedding: Arc<dyn EmbeddingProvider>,
}
impl Providers {
	pub fn new(
		completion: Arc<dyn CompletionProvider>,
		embedding: Arc<dyn EmbeddingProvider>,
	) -> Self {
		Self { completion, embedding }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self { completion: provider.clone(), embedding: provider }
	}
}

pub struct ArkService {
	pub cfg: Config,
	pub backend: Arc<dyn SearchBackend>,
	pub providers: Providers,
}
impl ArkService {
	pub fn new(cfg: Config, db: Db) -> Self {
		Self {
			cfg,
			backend: Arc::new(backend::PgSearchBackend::new(db)),
			providers: Providers::default(),
		}
	}

	pub fn with_providers(
		cfg: Config,
		backend: Arc<dyn SearchBackend>,
		providers: Providers,
	) -> Self {
		Self { cfg, backend, providers }
	}
}

struct DefaultProviders;
impl CompletionProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Message],
		tools: &'a [ToolSpec],
		force_tool: bool,
	) -> BoxFuture<'a, Result<Completion>> {
		Box::pin(async move { Ok(completion::complete(cfg, messages, tools, force_tool).await?) })
	}
}
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		model: Option<&'a str>,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(ark_providers::embedding::embed(cfg, model, texts).await?) })
	}
}
