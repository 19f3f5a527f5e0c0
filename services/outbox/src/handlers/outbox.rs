use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use courier_auth_types::identity::Operator;
use courier_domain::pagination::PageRequest;
use courier_domain::status::OutboxStatus;

use crate::domain::types::{EntryFilter, IntegrationStats, OutboxEntry};
use crate::error::OutboxServiceError;
use crate::state::AppState;
use crate::usecase::dispatch::{DispatchInput, DispatchReport};
use crate::usecase::enqueue::{EnqueueInput, EnqueueUseCase};
use crate::usecase::query::{GetEntryUseCase, ListEntriesUseCase, OutboxStatsUseCase};

// ── Request / response types ─────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub integration_id: Option<String>,
    pub operation: Option<String>,
    pub stable_resource_id: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResponse {
    pub entry_id: Uuid,
    pub idempotency_key: String,
    pub status: OutboxStatus,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryResponse {
    pub id: Uuid,
    pub integration_id: String,
    pub operation: String,
    pub stable_resource_id: String,
    pub payload: Value,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub attempt_count: u32,
    #[serde(serialize_with = "courier_core::serde::to_rfc3339_ms")]
    pub next_attempt_at: chrono::DateTime<chrono::Utc>,
    pub lease_owner: Option<String>,
    #[serde(serialize_with = "courier_core::serde::to_rfc3339_ms_opt")]
    pub lease_expires_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_error: Option<String>,
    #[serde(serialize_with = "courier_core::serde::to_rfc3339_ms")]
    pub created_at: chrono::DateTime<chrono::Utc>,
    #[serde(serialize_with = "courier_core::serde::to_rfc3339_ms")]
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<OutboxEntry> for EntryResponse {
    fn from(entry: OutboxEntry) -> Self {
        // Stored payloads are canonical JSON; fall back to the raw text if not.
        let payload = serde_json::from_str(&entry.payload)
            .unwrap_or_else(|_| Value::String(entry.payload.clone()));
        Self {
            id: entry.id,
            integration_id: entry.integration_id,
            operation: entry.operation,
            stable_resource_id: entry.stable_resource_id,
            payload,
            idempotency_key: entry.idempotency_key,
            status: entry.status,
            attempt_count: entry.attempt_count,
            next_attempt_at: entry.next_attempt_at,
            lease_owner: entry.lease_owner,
            lease_expires_at: entry.lease_expires_at,
            last_error: entry.last_error,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub integration_id: String,
    pub queued: u64,
    pub leased: u64,
    pub delivered: u64,
    pub retry_scheduled: u64,
    pub dead_lettered: u64,
}

impl From<IntegrationStats> for StatsResponse {
    fn from(stats: IntegrationStats) -> Self {
        Self {
            integration_id: stats.integration_id,
            queued: stats.queued,
            leased: stats.leased,
            delivered: stats.delivered,
            retry_scheduled: stats.retry_scheduled,
            dead_lettered: stats.dead_lettered,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRequest {
    pub integration_id: Option<String>,
}

// ── Query params ─────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct EntryListQuery {
    pub integration_id: Option<String>,
    pub status: Option<String>,
    pub per_page: Option<u32>,
    pub page: Option<u32>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct StatsQuery {
    pub integration_id: Option<String>,
}

// ── POST /outbox/entries ─────────────────────────────────────────────────────

pub async fn enqueue(
    State(state): State<AppState>,
    payload: Result<Json<EnqueueRequest>, JsonRejection>,
) -> Result<Json<EnqueueResponse>, OutboxServiceError> {
    let Json(body) = payload?;
    let usecase = EnqueueUseCase {
        repo: state.outbox_repo(),
    };
    let output = usecase
        .execute(EnqueueInput {
            integration_id: body.integration_id,
            operation: body.operation,
            stable_resource_id: body.stable_resource_id,
            payload: body.payload,
        })
        .await?;
    Ok(Json(EnqueueResponse {
        entry_id: output.entry_id,
        idempotency_key: output.idempotency_key,
        status: output.status,
    }))
}

// ── GET /outbox/entries/{id} ─────────────────────────────────────────────────

pub async fn get_entry(
    _operator: Operator,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EntryResponse>, OutboxServiceError> {
    let usecase = GetEntryUseCase {
        repo: state.outbox_repo(),
    };
    let entry = usecase.execute(id).await?;
    Ok(Json(entry.into()))
}

// ── GET /outbox/entries ──────────────────────────────────────────────────────

pub async fn list_entries(
    _operator: Operator,
    State(state): State<AppState>,
    Query(query): Query<EntryListQuery>,
) -> Result<Json<Vec<EntryResponse>>, OutboxServiceError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<OutboxStatus>)
        .transpose()
        .map_err(|e| OutboxServiceError::validation(e.to_string()))?;
    let filter = EntryFilter {
        integration_id: query.integration_id,
        status,
    };
    let page = PageRequest {
        per_page: query.per_page.unwrap_or(25),
        page: query.page.unwrap_or(1),
    };

    let usecase = ListEntriesUseCase {
        repo: state.outbox_repo(),
    };
    let entries = usecase.execute(filter, page).await?;
    Ok(Json(entries.into_iter().map(EntryResponse::from).collect()))
}

// ── GET /outbox/stats ────────────────────────────────────────────────────────

pub async fn get_stats(
    _operator: Operator,
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Vec<StatsResponse>>, OutboxServiceError> {
    let usecase = OutboxStatsUseCase {
        repo: state.outbox_repo(),
    };
    let stats = usecase.execute(query.integration_id.as_deref()).await?;
    Ok(Json(stats.into_iter().map(StatsResponse::from).collect()))
}

// ── POST /outbox/dispatch ────────────────────────────────────────────────────

/// Run one claim + dispatch cycle now, outside the worker schedule.
pub async fn dispatch_now(
    Operator(identity): Operator,
    State(state): State<AppState>,
    payload: Result<Json<DispatchRequest>, JsonRejection>,
) -> Result<Json<DispatchReport>, OutboxServiceError> {
    let Json(body) = payload?;
    let integration_id = body
        .integration_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| OutboxServiceError::validation("integrationId is required"))?;

    let worker_id = format!("operator-{}-{}", identity.user_id, Uuid::now_v7());
    let report = state
        .dispatch_usecase()
        .execute(DispatchInput {
            integration_id,
            worker_id,
            limit: state.config.claim_batch_size,
        })
        .await?;
    Ok(Json(report))
}
