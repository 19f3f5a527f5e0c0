use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use courier_auth_types::identity::Operator;
use courier_domain::status::ReconcileStatus;

use crate::domain::types::ReconcileRun;
use crate::error::OutboxServiceError;
use crate::state::AppState;
use crate::usecase::query::ListReconcileRunsUseCase;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub integration_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub reconcile_run_id: Uuid,
    pub checked: u32,
    pub drift_fixed: u32,
    pub status: ReconcileStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRunResponse {
    pub id: Uuid,
    pub integration_id: String,
    pub status: ReconcileStatus,
    pub checked: u32,
    pub drift_fixed: u32,
    pub notes: Option<String>,
    #[serde(serialize_with = "courier_core::serde::to_rfc3339_ms")]
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(serialize_with = "courier_core::serde::to_rfc3339_ms_opt")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ReconcileRun> for ReconcileRunResponse {
    fn from(run: ReconcileRun) -> Self {
        Self {
            id: run.id,
            integration_id: run.integration_id,
            status: run.status,
            checked: run.checked,
            drift_fixed: run.drift_fixed,
            notes: run.notes,
            started_at: run.started_at,
            finished_at: run.finished_at,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct RunListQuery {
    pub integration_id: Option<String>,
    pub limit: Option<u64>,
}

// ── POST /reconcile ──────────────────────────────────────────────────────────

pub async fn reconcile(
    _operator: Operator,
    State(state): State<AppState>,
    payload: Result<Json<ReconcileRequest>, JsonRejection>,
) -> Result<Json<ReconcileResponse>, OutboxServiceError> {
    let Json(body) = payload?;
    let integration_id = body.integration_id.unwrap_or_default();
    if integration_id.trim().is_empty() {
        return Err(OutboxServiceError::validation("integrationId is required"));
    }

    let _guard = state.reconcile_locks.acquire(&integration_id).await;
    let run = state.reconcile_usecase().execute(&integration_id).await?;
    Ok(Json(ReconcileResponse {
        reconcile_run_id: run.id,
        checked: run.checked,
        drift_fixed: run.drift_fixed,
        status: run.status,
    }))
}

// ── GET /reconcile/runs ──────────────────────────────────────────────────────

pub async fn list_runs(
    _operator: Operator,
    State(state): State<AppState>,
    Query(query): Query<RunListQuery>,
) -> Result<Json<Vec<ReconcileRunResponse>>, OutboxServiceError> {
    let usecase = ListReconcileRunsUseCase {
        runs: state.reconcile_run_repo(),
    };
    let runs = usecase
        .execute(query.integration_id.as_deref(), query.limit)
        .await?;
    Ok(Json(runs.into_iter().map(ReconcileRunResponse::from).collect()))
}
