use anyhow::Context as _;
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, DatabaseConnection, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect,
    sea_query::{Expr, OnConflict},
};
use uuid::Uuid;

use courier_domain::pagination::PageRequest;
use courier_domain::status::{OutboxStatus, ReconcileStatus};
use courier_outbox_schema::{integration_outbox, reconcile_runs};

use crate::domain::repository::{OutboxRepository, ReconcileRunRepository};
use crate::domain::types::{
    Completion, EntryFilter, Lease, NewOutboxEntry, OutboxEntry, ReconcileRun, StatusCount,
};
use crate::error::OutboxServiceError;

// ── Outbox repository ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOutboxRepository {
    pub db: DatabaseConnection,
}

impl OutboxRepository for DbOutboxRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEntry>, OutboxServiceError> {
        let model = integration_outbox::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("find outbox entry by id")?;
        model.map(entry_from_model).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<OutboxEntry>, OutboxServiceError> {
        let model = integration_outbox::Entity::find()
            .filter(integration_outbox::Column::IdempotencyKey.eq(key))
            .one(&self.db)
            .await
            .context("find outbox entry by idempotency key")?;
        model.map(entry_from_model).transpose()
    }

    async fn create(
        &self,
        entry: &NewOutboxEntry,
    ) -> Result<Option<OutboxEntry>, OutboxServiceError> {
        let created = OutboxEntry {
            id: Uuid::now_v7(),
            integration_id: entry.integration_id.clone(),
            operation: entry.operation.clone(),
            stable_resource_id: entry.stable_resource_id.clone(),
            payload: entry.payload.clone(),
            idempotency_key: entry.idempotency_key.clone(),
            status: OutboxStatus::Queued,
            attempt_count: 0,
            next_attempt_at: entry.created_at,
            lease_owner: None,
            lease_expires_at: None,
            last_error: None,
            created_at: entry.created_at,
            updated_at: entry.created_at,
        };
        let model = integration_outbox::ActiveModel {
            id: Set(created.id),
            integration_id: Set(created.integration_id.clone()),
            operation: Set(created.operation.clone()),
            stable_resource_id: Set(created.stable_resource_id.clone()),
            payload: Set(created.payload.clone()),
            idempotency_key: Set(created.idempotency_key.clone()),
            status: Set(created.status.as_str().to_owned()),
            attempt_count: Set(0),
            next_attempt_at: Set(created.next_attempt_at),
            lease_owner: Set(None),
            lease_expires_at: Set(None),
            last_error: Set(None),
            created_at: Set(created.created_at),
            updated_at: Set(created.updated_at),
        };
        // A concurrent enqueue of the same key inserts nothing here.
        let inserted = integration_outbox::Entity::insert(model)
            .on_conflict(
                OnConflict::column(integration_outbox::Column::IdempotencyKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await
            .context("create outbox entry")?;
        Ok((inserted == 1).then_some(created))
    }

    async fn list_eligible(
        &self,
        integration_id: &str,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        let models = integration_outbox::Entity::find()
            .filter(integration_outbox::Column::IntegrationId.eq(integration_id))
            .filter(integration_outbox::Column::Status.is_in(status_strs(&OutboxStatus::CLAIMABLE)))
            .filter(integration_outbox::Column::NextAttemptAt.lte(now))
            .order_by_asc(integration_outbox::Column::NextAttemptAt)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list eligible outbox entries")?;
        models.into_iter().map(entry_from_model).collect()
    }

    async fn try_lease(
        &self,
        id: Uuid,
        expected: OutboxStatus,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError> {
        let result = integration_outbox::Entity::update_many()
            .col_expr(
                integration_outbox::Column::Status,
                Expr::value(OutboxStatus::Leased.as_str()),
            )
            .col_expr(
                integration_outbox::Column::LeaseOwner,
                Expr::value(lease.owner.clone()),
            )
            .col_expr(
                integration_outbox::Column::LeaseExpiresAt,
                Expr::value(lease.expires_at),
            )
            .col_expr(integration_outbox::Column::UpdatedAt, Expr::value(now))
            .filter(integration_outbox::Column::Id.eq(id))
            .filter(integration_outbox::Column::Status.eq(expected.as_str()))
            .filter(integration_outbox::Column::NextAttemptAt.lte(now))
            .exec(&self.db)
            .await
            .context("lease outbox entry")?;
        Ok(result.rows_affected == 1)
    }

    async fn complete(
        &self,
        id: Uuid,
        owner: &str,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError> {
        let attempt_count = to_i32(completion.attempt_count());
        let mut update = integration_outbox::Entity::update_many()
            .col_expr(
                integration_outbox::Column::Status,
                Expr::value(completion.status().as_str()),
            )
            .col_expr(
                integration_outbox::Column::AttemptCount,
                Expr::value(attempt_count),
            )
            .col_expr(
                integration_outbox::Column::LeaseOwner,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                integration_outbox::Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(
                integration_outbox::Column::LastError,
                Expr::value(completion.last_error().map(str::to_owned)),
            )
            .col_expr(integration_outbox::Column::UpdatedAt, Expr::value(now));
        if let Completion::RetryScheduled {
            next_attempt_at, ..
        } = completion
        {
            update = update.col_expr(
                integration_outbox::Column::NextAttemptAt,
                Expr::value(*next_attempt_at),
            );
        }
        let result = update
            .filter(integration_outbox::Column::Id.eq(id))
            .filter(integration_outbox::Column::Status.eq(OutboxStatus::Leased.as_str()))
            .filter(integration_outbox::Column::LeaseOwner.eq(owner))
            .filter(integration_outbox::Column::AttemptCount.lt(attempt_count))
            .exec(&self.db)
            .await
            .context("complete outbox entry")?;
        Ok(result.rows_affected == 1)
    }

    async fn list_drifted(
        &self,
        integration_id: &str,
        now: DateTime<Utc>,
        stale_threshold: Duration,
        limit: u64,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        let stale_before = now - stale_threshold;
        let orphaned_lease = Condition::all()
            .add(integration_outbox::Column::Status.eq(OutboxStatus::Leased.as_str()))
            .add(
                Condition::any()
                    .add(integration_outbox::Column::LeaseExpiresAt.lt(now))
                    .add(integration_outbox::Column::LeaseExpiresAt.is_null()),
            );
        let stale_queue = Condition::all()
            .add(integration_outbox::Column::Status.is_in(status_strs(&OutboxStatus::CLAIMABLE)))
            .add(integration_outbox::Column::CreatedAt.lt(stale_before))
            .add(integration_outbox::Column::NextAttemptAt.lt(stale_before));
        let models = integration_outbox::Entity::find()
            .filter(integration_outbox::Column::IntegrationId.eq(integration_id))
            .filter(Condition::any().add(orphaned_lease).add(stale_queue))
            .order_by_asc(integration_outbox::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list drifted outbox entries")?;
        models.into_iter().map(entry_from_model).collect()
    }

    async fn requeue(
        &self,
        observed: &OutboxEntry,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError> {
        let mut update = integration_outbox::Entity::update_many()
            .col_expr(
                integration_outbox::Column::Status,
                Expr::value(OutboxStatus::Queued.as_str()),
            )
            .col_expr(
                integration_outbox::Column::LeaseOwner,
                Expr::value(Option::<String>::None),
            )
            .col_expr(
                integration_outbox::Column::LeaseExpiresAt,
                Expr::value(Option::<DateTime<Utc>>::None),
            )
            .col_expr(integration_outbox::Column::NextAttemptAt, Expr::value(now))
            .col_expr(integration_outbox::Column::UpdatedAt, Expr::value(now))
            .filter(integration_outbox::Column::Id.eq(observed.id))
            .filter(integration_outbox::Column::Status.eq(observed.status.as_str()));

        // Guard on the exact observed lease or schedule so a fresh claim is never undone.
        update = if observed.status == OutboxStatus::Leased {
            let update = match &observed.lease_owner {
                Some(owner) => update.filter(integration_outbox::Column::LeaseOwner.eq(owner.as_str())),
                None => update.filter(integration_outbox::Column::LeaseOwner.is_null()),
            };
            match observed.lease_expires_at {
                Some(expires_at) => update
                    .filter(integration_outbox::Column::LeaseExpiresAt.eq(expires_at))
                    .filter(integration_outbox::Column::LeaseExpiresAt.lt(now)),
                None => update.filter(integration_outbox::Column::LeaseExpiresAt.is_null()),
            }
        } else {
            update.filter(integration_outbox::Column::NextAttemptAt.eq(observed.next_attempt_at))
        };

        let result = update
            .exec(&self.db)
            .await
            .context("requeue drifted outbox entry")?;
        Ok(result.rows_affected == 1)
    }

    async fn list(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        let mut query = integration_outbox::Entity::find();
        if let Some(integration_id) = filter.integration_id.as_deref() {
            query = query.filter(integration_outbox::Column::IntegrationId.eq(integration_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(integration_outbox::Column::Status.eq(status.as_str()));
        }
        let models = query
            .order_by_desc(integration_outbox::Column::CreatedAt)
            .offset(page.offset())
            .limit(page.limit())
            .all(&self.db)
            .await
            .context("list outbox entries")?;
        models.into_iter().map(entry_from_model).collect()
    }

    async fn count_by_status(
        &self,
        integration_id: Option<&str>,
    ) -> Result<Vec<StatusCount>, OutboxServiceError> {
        let mut query = integration_outbox::Entity::find()
            .select_only()
            .column(integration_outbox::Column::IntegrationId)
            .column(integration_outbox::Column::Status)
            .column_as(Expr::col(integration_outbox::Column::Id).count(), "count")
            .group_by(integration_outbox::Column::IntegrationId)
            .group_by(integration_outbox::Column::Status);
        if let Some(integration_id) = integration_id {
            query = query.filter(integration_outbox::Column::IntegrationId.eq(integration_id));
        }
        let rows: Vec<(String, String, i64)> = query
            .into_tuple()
            .all(&self.db)
            .await
            .context("count outbox entries by status")?;
        rows.into_iter()
            .map(|(integration_id, status, count)| {
                Ok(StatusCount {
                    integration_id,
                    status: parse_outbox_status(&status)?,
                    count: u64::try_from(count).unwrap_or_default(),
                })
            })
            .collect()
    }
}

fn status_strs(statuses: &[OutboxStatus]) -> Vec<&'static str> {
    statuses.iter().map(|s| s.as_str()).collect()
}

fn parse_outbox_status(raw: &str) -> Result<OutboxStatus, OutboxServiceError> {
    Ok(raw
        .parse::<OutboxStatus>()
        .with_context(|| format!("corrupt outbox status {raw:?}"))?)
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

fn to_u32(n: i32) -> u32 {
    u32::try_from(n).unwrap_or_default()
}

fn entry_from_model(model: integration_outbox::Model) -> Result<OutboxEntry, OutboxServiceError> {
    Ok(OutboxEntry {
        id: model.id,
        status: parse_outbox_status(&model.status)?,
        integration_id: model.integration_id,
        operation: model.operation,
        stable_resource_id: model.stable_resource_id,
        payload: model.payload,
        idempotency_key: model.idempotency_key,
        attempt_count: to_u32(model.attempt_count),
        next_attempt_at: model.next_attempt_at,
        lease_owner: model.lease_owner,
        lease_expires_at: model.lease_expires_at,
        last_error: model.last_error,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

// ── Reconcile run repository ─────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbReconcileRunRepository {
    pub db: DatabaseConnection,
}

impl ReconcileRunRepository for DbReconcileRunRepository {
    async fn start(
        &self,
        integration_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ReconcileRun, OutboxServiceError> {
        let run = ReconcileRun {
            id: Uuid::now_v7(),
            integration_id: integration_id.to_owned(),
            status: ReconcileStatus::Running,
            checked: 0,
            drift_fixed: 0,
            notes: None,
            started_at,
            finished_at: None,
        };
        reconcile_runs::ActiveModel {
            id: Set(run.id),
            integration_id: Set(run.integration_id.clone()),
            status: Set(run.status.as_str().to_owned()),
            checked: Set(0),
            drift_fixed: Set(0),
            notes: Set(None),
            started_at: Set(run.started_at),
            finished_at: Set(None),
        }
        .insert(&self.db)
        .await
        .context("create reconcile run")?;
        Ok(run)
    }

    async fn finish(&self, run: &ReconcileRun) -> Result<bool, OutboxServiceError> {
        let result = reconcile_runs::Entity::update_many()
            .col_expr(
                reconcile_runs::Column::Status,
                Expr::value(run.status.as_str()),
            )
            .col_expr(reconcile_runs::Column::Checked, Expr::value(to_i32(run.checked)))
            .col_expr(
                reconcile_runs::Column::DriftFixed,
                Expr::value(to_i32(run.drift_fixed)),
            )
            .col_expr(reconcile_runs::Column::Notes, Expr::value(run.notes.clone()))
            .col_expr(
                reconcile_runs::Column::FinishedAt,
                Expr::value(run.finished_at),
            )
            .filter(reconcile_runs::Column::Id.eq(run.id))
            .filter(reconcile_runs::Column::Status.eq(ReconcileStatus::Running.as_str()))
            .exec(&self.db)
            .await
            .context("finish reconcile run")?;
        Ok(result.rows_affected == 1)
    }

    async fn list_recent(
        &self,
        integration_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<ReconcileRun>, OutboxServiceError> {
        let mut query = reconcile_runs::Entity::find();
        if let Some(integration_id) = integration_id {
            query = query.filter(reconcile_runs::Column::IntegrationId.eq(integration_id));
        }
        let models = query
            .order_by_desc(reconcile_runs::Column::StartedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .context("list reconcile runs")?;
        models.into_iter().map(run_from_model).collect()
    }
}

fn run_from_model(model: reconcile_runs::Model) -> Result<ReconcileRun, OutboxServiceError> {
    let status = model
        .status
        .parse::<ReconcileStatus>()
        .with_context(|| format!("corrupt reconcile run status {:?}", model.status))?;
    Ok(ReconcileRun {
        id: model.id,
        integration_id: model.integration_id,
        status,
        checked: to_u32(model.checked),
        drift_fixed: to_u32(model.drift_fixed),
        notes: model.notes,
        started_at: model.started_at,
        finished_at: model.finished_at,
    })
}
