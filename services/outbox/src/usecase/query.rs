use std::collections::BTreeMap;

use uuid::Uuid;

use courier_domain::pagination::PageRequest;

use crate::domain::repository::{OutboxRepository, ReconcileRunRepository};
use crate::domain::types::{EntryFilter, IntegrationStats, OutboxEntry, ReconcileRun};
use crate::error::OutboxServiceError;

pub const DEFAULT_RUNS_LIMIT: u64 = 20;
pub const MAX_RUNS_LIMIT: u64 = 100;

pub struct GetEntryUseCase<R: OutboxRepository> {
    pub repo: R,
}

impl<R: OutboxRepository> GetEntryUseCase<R> {
    pub async fn execute(&self, id: Uuid) -> Result<OutboxEntry, OutboxServiceError> {
        self.repo
            .find_by_id(id)
            .await?
            .ok_or(OutboxServiceError::EntryNotFound)
    }
}

pub struct ListEntriesUseCase<R: OutboxRepository> {
    pub repo: R,
}

impl<R: OutboxRepository> ListEntriesUseCase<R> {
    pub async fn execute(
        &self,
        filter: EntryFilter,
        page: PageRequest,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        self.repo.list(&filter, page.clamped()).await
    }
}

pub struct OutboxStatsUseCase<R: OutboxRepository> {
    pub repo: R,
}

impl<R: OutboxRepository> OutboxStatsUseCase<R> {
    /// Status counts per integration, ordered by integration id.
    pub async fn execute(
        &self,
        integration_id: Option<&str>,
    ) -> Result<Vec<IntegrationStats>, OutboxServiceError> {
        let counts = self.repo.count_by_status(integration_id).await?;
        let mut by_integration: BTreeMap<String, IntegrationStats> = BTreeMap::new();
        for row in counts {
            by_integration
                .entry(row.integration_id.clone())
                .or_insert_with(|| IntegrationStats::new(row.integration_id))
                .add(row.status, row.count);
        }
        Ok(by_integration.into_values().collect())
    }
}

pub struct ListReconcileRunsUseCase<S: ReconcileRunRepository> {
    pub runs: S,
}

impl<S: ReconcileRunRepository> ListReconcileRunsUseCase<S> {
    pub async fn execute(
        &self,
        integration_id: Option<&str>,
        limit: Option<u64>,
    ) -> Result<Vec<ReconcileRun>, OutboxServiceError> {
        let limit = limit.unwrap_or(DEFAULT_RUNS_LIMIT).clamp(1, MAX_RUNS_LIMIT);
        self.runs.list_recent(integration_id, limit).await
    }
}
