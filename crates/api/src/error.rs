//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use orchestrator::OrchestratorError;
use serde_json::json;
use transaction_store::TransactionStoreError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Engine error.
    Orchestrator(OrchestratorError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::Orchestrator(err) => orchestrator_error_to_response(err),
        };

        (status, axum::Json(body)).into_response()
    }
}

fn orchestrator_error_to_response(err: OrchestratorError) -> (StatusCode, serde_json::Value) {
    let message = err.to_string();
    match err {
        OrchestratorError::Validation { stage, issues, .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({ "error": message, "stage": stage, "issues": issues }),
        ),
        OrchestratorError::StepFailed {
            transaction_id,
            failure,
            state,
            compensation_errors,
            ..
        } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": message,
                "transaction_id": transaction_id,
                "state": state,
                "failure": failure,
                "compensation_errors": compensation_errors,
            }),
        ),
        OrchestratorError::WorkflowNotFound(_)
        | OrchestratorError::TransactionNotFound { .. }
        | OrchestratorError::UnknownStep { .. }
        | OrchestratorError::UnknownHook { .. } => {
            (StatusCode::NOT_FOUND, json!({ "error": message }))
        }
        OrchestratorError::InvalidState { .. }
        | OrchestratorError::AlreadyRunning { .. }
        | OrchestratorError::AlreadyRegistered(_)
        | OrchestratorError::HookAlreadyBound { .. }
        | OrchestratorError::Store(TransactionStoreError::ConcurrencyConflict { .. }) => {
            (StatusCode::CONFLICT, json!({ "error": message }))
        }
        OrchestratorError::MissingHandler { .. }
        | OrchestratorError::MissingCondition { .. }
        | OrchestratorError::InvalidSchedule(_)
        | OrchestratorError::Workflow(_) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
        OrchestratorError::Store(_) | OrchestratorError::Serialization(_) => {
            tracing::error!(error = %message, "internal server error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": message }),
            )
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        ApiError::Orchestrator(err)
    }
}
