mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	ChainStep, Config, ControlMode, Corpus, EmbeddingProviderConfig, ExitTool, FieldDefinition,
	FieldType, LlmProviderConfig, MergeStrategy, MetadataOrigin, MetadataTool, Postgres, Providers,
	ResponseMode, Retrieval, Service, SimilarityTool, SourceChain, Storage, Tools,
};

use std::{collections::HashSet, fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);
	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.http_bind.trim().is_empty() {
		return Err(Error::Validation {
			message: "service.http_bind must be non-empty.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.postgres.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.postgres.vector_dim."
				.to_string(),
		});
	}
	if !cfg.providers.llm.temperature.is_finite() || cfg.providers.llm.temperature < 0.0 {
		return Err(Error::Validation {
			message: "providers.llm.temperature must be a finite number, zero or greater."
				.to_string(),
		});
	}

	for (label, key) in
		[("embedding", &cfg.providers.embedding.api_key), ("llm", &cfg.providers.llm.api_key)]
	{
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	let mut corpus_ids = HashSet::new();

	for corpus in &cfg.corpora {
		if corpus.id.trim().is_empty() {
			return Err(Error::Validation { message: "corpora.id must be non-empty.".to_string() });
		}
		if !corpus_ids.insert(corpus.id.as_str()) {
			return Err(Error::Validation {
				message: format!("corpora.id {:?} is declared more than once.", corpus.id),
			});
		}

		validate_corpus(corpus)?;
	}

	Ok(())
}

fn validate_corpus(corpus: &Corpus) -> Result<()> {
	let id = corpus.id.as_str();

	if corpus.retrieval.max_iterations == 0 {
		return Err(Error::Validation {
			message: format!("corpora[{id}].retrieval.max_iterations must be greater than zero."),
		});
	}
	if corpus.retrieval.max_sources == 0 && corpus.retrieval.response_mode.includes_sources() {
		return Err(Error::Validation {
			message: format!(
				"corpora[{id}].retrieval.max_sources must be greater than zero unless response_mode is answer_only."
			),
		});
	}

	for (label, tool) in [
		("find_chunks_by_similarity", &corpus.tools.find_chunks_by_similarity),
		(
			"find_documents_by_summary_similarity",
			&corpus.tools.find_documents_by_summary_similarity,
		),
	] {
		if tool.limit == 0 {
			return Err(Error::Validation {
				message: format!("corpora[{id}].tools.{label}.limit must be greater than zero."),
			});
		}
		if !tool.score_threshold.is_finite() {
			return Err(Error::Validation {
				message: format!(
					"corpora[{id}].tools.{label}.score_threshold must be a finite number."
				),
			});
		}
		if !(-1.0..=1.0).contains(&tool.score_threshold) {
			return Err(Error::Validation {
				message: format!(
					"corpora[{id}].tools.{label}.score_threshold must be in the range -1.0-1.0."
				),
			});
		}
	}

	let mut names = HashSet::new();

	for field in &corpus.fields {
		if field.name.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("corpora[{id}].fields.name must be non-empty."),
			});
		}
		if !names.insert(field.name.as_str()) {
			return Err(Error::Validation {
				message: format!(
					"corpora[{id}].fields.name {:?} is declared more than once.",
					field.name
				),
			});
		}

		for source in &field.sources {
			if source.source_id.trim().is_empty() {
				return Err(Error::Validation {
					message: format!(
						"corpora[{id}].fields[{}].sources.source_id must be non-empty.",
						field.name
					),
				});
			}

			validate_chain(id, &field.name, &source.chain)?;
		}

		if let Some(chain) = field.wildcard.as_ref() {
			validate_chain(id, &field.name, chain)?;
		}
	}

	Ok(())
}

fn validate_chain(corpus_id: &str, field_name: &str, chain: &[ChainStep]) -> Result<()> {
	if chain.is_empty() {
		return Err(Error::Validation {
			message: format!(
				"corpora[{corpus_id}].fields[{field_name}] resolution chains must be non-empty."
			),
		});
	}

	for step in chain {
		match step {
			ChainStep::Constant { value: None, values: None } => {
				return Err(Error::Validation {
					message: format!(
						"corpora[{corpus_id}].fields[{field_name}] constant steps need value or values."
					),
				});
			},
			ChainStep::Constant { .. } => {},
			ChainStep::File { field_name: key }
			| ChainStep::Source { field_name: key }
			| ChainStep::Llm { field_name: key } =>
				if key.trim().is_empty() {
					return Err(Error::Validation {
						message: format!(
							"corpora[{corpus_id}].fields[{field_name}] chain field_name must be non-empty."
						),
					});
				},
		}
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	for corpus in &mut cfg.corpora {
		if corpus.embedding_model.as_deref().map(|model| model.trim().is_empty()).unwrap_or(false) {
			corpus.embedding_model = None;
		}
		if corpus.system_prompt.as_deref().map(|prompt| prompt.trim().is_empty()).unwrap_or(false)
		{
			corpus.system_prompt = None;
		}

		for description in [
			&mut corpus.tools.exit.description,
			&mut corpus.tools.find_chunks_by_similarity.description,
			&mut corpus.tools.find_documents_by_summary_similarity.description,
			&mut corpus.tools.find_documents_by_metadata.description,
		] {
			if description.as_deref().map(|text| text.trim().is_empty()).unwrap_or(false) {
				*description = None;
			}
		}
	}
}
