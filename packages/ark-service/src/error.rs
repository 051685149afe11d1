use crate::state::ToolCallRecord;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Protocol violation: {message}")]
	Protocol { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	/// A run that reached `Failed`. `workflow` holds the tool calls recorded before the failure.
	#[error("Retrieval run failed: {message}")]
	RunFailed { message: String, workflow: Vec<ToolCallRecord> },
}
impl From<ark_storage::Error> for Error {
	fn from(err: ark_storage::Error) -> Self {
		match err {
			ark_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			ark_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
		}
	}
}

impl From<ark_providers::Error> for Error {
	fn from(err: ark_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<ark_config::Error> for Error {
	fn from(err: ark_config::Error) -> Self {
		Self::InvalidRequest { message: err.to_string() }
	}
}
