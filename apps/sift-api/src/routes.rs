use axum::{
	Json, Router,
	extract::{State, rejection::JsonRejection},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{get, post},
};
use serde::Serialize;

use sift_service::{Error as ServiceError, SearchRequest, SearchResponse};

use crate::state::AppState;

pub const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable.";

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/search", post(search))
		.with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn search(
	State(state): State<AppState>,
	payload: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<ApiResponse<SearchResponse>>, ApiError> {
	let Json(payload) =
		payload.map_err(|err| ApiError::new(StatusCode::BAD_REQUEST, err.body_text()))?;
	let response = state.service.search(payload).await?;

	Ok(Json(ApiResponse::success(response)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStatus {
	Success,
	Error,
}

/// Envelope shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
	pub status: ApiStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
}
impl<T> ApiResponse<T> {
	pub fn success(data: T) -> Self {
		Self { status: ApiStatus::Success, message: None, data: Some(data) }
	}
}
impl ApiResponse<()> {
	pub fn error(message: impl Into<String>) -> Self {
		Self { status: ApiStatus::Error, message: Some(message.into()), data: None }
	}
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, message: impl Into<String>) -> Self {
		Self { status, message: message.into() }
	}
}
impl From<ServiceError> for ApiError {
	fn from(err: ServiceError) -> Self {
		match err {
			ServiceError::InvalidRequest { .. } => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
			ServiceError::Dispatch { .. } | ServiceError::Abandoned { .. } => {
				tracing::error!(error = %err, "Search could not be dispatched.");

				Self::new(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE)
			},
			ServiceError::DuplicateCorrelation { .. } => {
				tracing::error!(error = %err, "Search could not be registered.");

				Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error.")
			},
		}
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		(self.status, Json(ApiResponse::error(self.message))).into_response()
	}
}
