#![allow(async_fn_in_trait)]

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use courier_domain::pagination::PageRequest;
use courier_domain::status::OutboxStatus;

use crate::domain::types::{
    Completion, EntryFilter, Lease, NewOutboxEntry, OutboxEntry, ReconcileRun, StatusCount,
};
use crate::error::OutboxServiceError;

/// Durable store for outbox entries.
///
/// Every state change is a single conditional update; `Ok(false)` means the
/// guard did not match and another actor got there first.
pub trait OutboxRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEntry>, OutboxServiceError>;

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<OutboxEntry>, OutboxServiceError>;

    /// Insert a `queued` entry with `next_attempt_at = created_at`.
    ///
    /// Returns `None` if an entry with the same idempotency key already exists.
    async fn create(
        &self,
        entry: &NewOutboxEntry,
    ) -> Result<Option<OutboxEntry>, OutboxServiceError>;

    /// Claimable entries of one integration due at `now`, oldest `next_attempt_at` first.
    async fn list_eligible(
        &self,
        integration_id: &str,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError>;

    /// Move an entry to `leased` if its status still equals `expected`.
    async fn try_lease(
        &self,
        id: Uuid,
        expected: OutboxStatus,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError>;

    /// Apply a dispatch outcome if the entry is still leased by `owner`.
    async fn complete(
        &self,
        id: Uuid,
        owner: &str,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError>;

    /// Drifted entries of one integration at `now`, oldest first.
    ///
    /// Matches [`OutboxEntry::drift`]: leases that ran out (or never had an
    /// expiry), and claimable entries both created and due before
    /// `now - stale_threshold`. `limit` applies to the drifted set only.
    async fn list_drifted(
        &self,
        integration_id: &str,
        now: DateTime<Utc>,
        stale_threshold: Duration,
        limit: u64,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError>;

    /// Reset an observed drifted entry to `queued` with `next_attempt_at = now`.
    ///
    /// Only applies if the entry is unchanged since it was observed.
    async fn requeue(
        &self,
        observed: &OutboxEntry,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError>;

    async fn list(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError>;

    async fn count_by_status(
        &self,
        integration_id: Option<&str>,
    ) -> Result<Vec<StatusCount>, OutboxServiceError>;
}

/// Durable store for reconcile run audit records.
pub trait ReconcileRunRepository: Send + Sync {
    /// Persist a new `running` run.
    async fn start(
        &self,
        integration_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<ReconcileRun, OutboxServiceError>;

    /// Write the final state of a run that is still `running`.
    ///
    /// Returns `false` if the run was already finalised.
    async fn finish(&self, run: &ReconcileRun) -> Result<bool, OutboxServiceError>;

    /// Most recent runs first.
    async fn list_recent(
        &self,
        integration_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<ReconcileRun>, OutboxServiceError>;
}
