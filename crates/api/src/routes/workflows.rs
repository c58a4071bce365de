//! Workflow run and signal endpoints.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{TransactionId, WorkflowId};
use orchestrator::{RunRequest, RunResult, StepError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use workflow::{DistributedTransaction, StepFailure};

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct RunWorkflowRequest {
    #[serde(default)]
    pub input: Value,
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
pub struct StepFailureRequest {
    pub error: String,
    #[serde(default)]
    pub permanent: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct WorkflowListResponse {
    pub workflows: Vec<String>,
}

#[derive(Serialize)]
pub struct StepStatusResponse {
    pub step_id: String,
    pub invoke: String,
    pub compensate: String,
    pub attempts: u32,
    pub error: Option<String>,
    pub compensation_error: Option<String>,
}

#[derive(Serialize)]
pub struct TransactionResponse {
    pub workflow_id: String,
    pub transaction_id: String,
    pub state: String,
    pub cancelled: bool,
    pub waiting_on: Vec<String>,
    pub steps: Vec<StepStatusResponse>,
    pub errors: Vec<StepFailure>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&DistributedTransaction> for TransactionResponse {
    fn from(tx: &DistributedTransaction) -> Self {
        let steps = tx
            .steps()
            .map(|step| StepStatusResponse {
                step_id: step.step_id.clone(),
                invoke: step.invoke.as_str().to_string(),
                compensate: step.compensate.as_str().to_string(),
                attempts: step.attempts,
                error: step.error.as_ref().map(|e| e.message.clone()),
                compensation_error: step
                    .compensation_error
                    .as_ref()
                    .map(|e| e.message.clone()),
            })
            .collect();

        Self {
            workflow_id: tx.workflow_id().to_string(),
            transaction_id: tx.transaction_id().to_string(),
            state: tx.flow_state().to_string(),
            cancelled: tx.is_cancelled(),
            waiting_on: tx.dormant(),
            steps,
            errors: tx.errors().to_vec(),
            created_at: tx.created_at().to_rfc3339(),
            updated_at: tx.updated_at().to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct RunResponse {
    pub result: Value,
    pub errors: Vec<StepFailure>,
    pub transaction: TransactionResponse,
}

impl From<RunResult> for RunResponse {
    fn from(run: RunResult) -> Self {
        Self {
            transaction: TransactionResponse::from(&run.transaction),
            result: run.result,
            errors: run.errors,
        }
    }
}

// -- Handlers --

/// GET /workflows: list registered workflow ids.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<WorkflowListResponse> {
    let workflows = state
        .engine
        .list_workflows()
        .await
        .into_iter()
        .map(|id| id.to_string())
        .collect();
    Json(WorkflowListResponse { workflows })
}

/// POST /workflows/:workflow_id/run: start (or look up) a transaction.
#[tracing::instrument(skip(state, req))]
pub async fn run(
    State(state): State<Arc<AppState>>,
    Path(workflow_id): Path<String>,
    Json(req): Json<RunWorkflowRequest>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let mut request = RunRequest::new(workflow_id, req.input).throw_on_error(false);
    if let Some(transaction_id) = req.transaction_id {
        if transaction_id.is_empty() {
            return Err(ApiError::BadRequest(
                "transaction_id must not be empty".to_string(),
            ));
        }
        request = request.transaction_id(transaction_id);
    }
    request.context = req.context;

    let run = state.engine.run(request).await?;
    let status = if run.is_suspended() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(RunResponse::from(run))))
}

/// GET /workflows/:workflow_id/transactions/:transaction_id: load a transaction.
#[tracing::instrument(skip(state))]
pub async fn get_transaction(
    State(state): State<Arc<AppState>>,
    Path((workflow_id, transaction_id)): Path<(String, String)>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let tx = state
        .engine
        .get_transaction(
            &WorkflowId::new(&workflow_id),
            &TransactionId::new(&transaction_id),
        )
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "Transaction {transaction_id} of workflow {workflow_id} not found"
            ))
        })?;

    Ok(Json(TransactionResponse::from(&tx)))
}

/// POST .../steps/:step_id/success: report an async step's result.
#[tracing::instrument(skip(state, response))]
pub async fn step_success(
    State(state): State<Arc<AppState>>,
    Path((workflow_id, transaction_id, step_id)): Path<(String, String, String)>,
    Json(response): Json<Value>,
) -> Result<Json<RunResponse>, ApiError> {
    metrics::counter!("workflow_api_signals_total", "kind" => "success").increment(1);

    let run = state
        .engine
        .set_step_success(
            &WorkflowId::new(workflow_id),
            &TransactionId::new(transaction_id),
            &step_id,
            response,
        )
        .await?;
    Ok(Json(RunResponse::from(run)))
}

/// POST .../steps/:step_id/failure: report an async step's failure.
#[tracing::instrument(skip(state, req))]
pub async fn step_failure(
    State(state): State<Arc<AppState>>,
    Path((workflow_id, transaction_id, step_id)): Path<(String, String, String)>,
    Json(req): Json<StepFailureRequest>,
) -> Result<Json<RunResponse>, ApiError> {
    metrics::counter!("workflow_api_signals_total", "kind" => "failure").increment(1);

    let error = if req.permanent {
        StepError::permanent(req.error)
    } else {
        StepError::new(req.error)
    };
    let run = state
        .engine
        .set_step_failure(
            &WorkflowId::new(workflow_id),
            &TransactionId::new(transaction_id),
            &step_id,
            error,
        )
        .await?;
    Ok(Json(RunResponse::from(run)))
}

/// POST .../resume: continue a transaction after a restart.
#[tracing::instrument(skip(state))]
pub async fn resume(
    State(state): State<Arc<AppState>>,
    Path((workflow_id, transaction_id)): Path<(String, String)>,
) -> Result<Json<RunResponse>, ApiError> {
    let run = state
        .engine
        .resume(
            &WorkflowId::new(workflow_id),
            &TransactionId::new(transaction_id),
        )
        .await?;
    Ok(Json(RunResponse::from(run)))
}

/// POST .../cancel: roll back a running transaction.
#[tracing::instrument(skip(state))]
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path((workflow_id, transaction_id)): Path<(String, String)>,
) -> Result<Json<RunResponse>, ApiError> {
    let run = state
        .engine
        .cancel(
            &WorkflowId::new(workflow_id),
            &TransactionId::new(transaction_id),
        )
        .await?;
    Ok(Json(RunResponse::from(run)))
}
