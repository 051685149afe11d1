use axum::{
	Json, Router,
	extract::State,
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use crate::state::AppState;
use ark_service::{Error as ServiceError, RetrievalRequest, RetrievalResult};

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/retrieve", post(retrieve))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn retrieve(
	State(state): State<AppState>,
	Json(payload): Json<RetrievalRequest>,
) -> Result<Json<RetrievalResult>, ApiError> {
	let response = state.service.retrieve(payload).await?;

	Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: &'static str,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: &'static str, message: impl Into<String>) -> Self {
		Self { status, error_code, message: message.into() }
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { message } =>
				Self::new(StatusCode::BAD_REQUEST, "invalid_request", message),
			ServiceError::NotFound { message } =>
				Self::new(StatusCode::NOT_FOUND, "not_found", message),
			ServiceError::RunFailed { message, workflow } => {
				// The caller only gets a generic message; details stay in the logs.
				tracing::error!(
					error = %message,
					workflow = %serde_json::to_string(&workflow).unwrap_or_default(),
					"Retrieval run failed."
				);

				Self::new(
					StatusCode::BAD_GATEWAY,
					"retrieval_failed",
					"The retrieval run failed. Please try again.",
				)
			},
			err @ (ServiceError::Protocol { .. }
			| ServiceError::Provider { .. }
			| ServiceError::Storage { .. }) => {
				tracing::error!(error = %err, "Retrieval request failed.");

				Self::new(
					StatusCode::BAD_GATEWAY,
					"upstream_error",
					"An upstream dependency failed.",
				)
			},
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code.to_string(), message: self.message };

		(self.status, Json(body)).into_response()
	}
}
