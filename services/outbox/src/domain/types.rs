use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use courier_domain::status::{OutboxStatus, ReconcileStatus};

/// Durable record of one logical side-effecting operation bound for an integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub integration_id: String,
    pub operation: String,
    pub stable_resource_id: String,
    /// Canonical JSON text of the payload.
    pub payload: String,
    pub idempotency_key: String,
    pub status: OutboxStatus,
    pub attempt_count: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Claimable by the lease manager at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_attempt_at <= now
    }

    /// Leased and the lease has not yet run out.
    pub fn has_active_lease(&self, now: DateTime<Utc>) -> bool {
        self.status == OutboxStatus::Leased && self.lease_expires_at.is_some_and(|at| at >= now)
    }

    /// Classify the entry as drifted, if it is.
    ///
    /// An orphaned lease is a `leased` entry whose lease ran out. A stale queue
    /// entry is claimable, older than `stale_threshold`, and has been eligible
    /// for at least `stale_threshold` without any worker picking it up.
    pub fn drift(&self, now: DateTime<Utc>, stale_threshold: Duration) -> Option<DriftKind> {
        if self.status.is_terminal() {
            return None;
        }
        if self.status == OutboxStatus::Leased {
            return (!self.has_active_lease(now)).then_some(DriftKind::ExpiredLease);
        }
        let stale_before = now - stale_threshold;
        (self.created_at < stale_before && self.next_attempt_at < stale_before)
            .then_some(DriftKind::StaleQueue)
    }
}

/// Why the reconciler considered an entry drifted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftKind {
    ExpiredLease,
    StaleQueue,
}

impl DriftKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExpiredLease => "expired_lease",
            Self::StaleQueue => "stale_queue",
        }
    }
}

/// Insert request for a fresh outbox entry; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub integration_id: String,
    pub operation: String,
    pub stable_resource_id: String,
    pub payload: String,
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
}

/// Lease granted to a worker by a successful claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub owner: String,
    pub expires_at: DateTime<Utc>,
}

/// Terminal write of one dispatch attempt, applied under the worker's lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Delivered {
        attempt_count: u32,
    },
    RetryScheduled {
        attempt_count: u32,
        next_attempt_at: DateTime<Utc>,
        last_error: String,
    },
    DeadLettered {
        attempt_count: u32,
        last_error: String,
    },
}

impl Completion {
    pub fn status(&self) -> OutboxStatus {
        match self {
            Self::Delivered { .. } => OutboxStatus::Delivered,
            Self::RetryScheduled { .. } => OutboxStatus::RetryScheduled,
            Self::DeadLettered { .. } => OutboxStatus::DeadLettered,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        match self {
            Self::Delivered { attempt_count }
            | Self::RetryScheduled { attempt_count, .. }
            | Self::DeadLettered { attempt_count, .. } => *attempt_count,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        match self {
            Self::Delivered { .. } => None,
            Self::RetryScheduled { last_error, .. } | Self::DeadLettered { last_error, .. } => {
                Some(last_error)
            }
        }
    }
}

/// Audit record of one reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileRun {
    pub id: Uuid,
    pub integration_id: String,
    pub status: ReconcileStatus,
    pub checked: u32,
    pub drift_fixed: u32,
    pub notes: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ReconcileRun {
    pub fn completed(mut self, checked: u32, drift_fixed: u32, finished_at: DateTime<Utc>) -> Self {
        self.status = ReconcileStatus::Completed;
        self.checked = checked;
        self.drift_fixed = drift_fixed;
        self.finished_at = Some(finished_at);
        self
    }

    pub fn failed(
        mut self,
        checked: u32,
        drift_fixed: u32,
        notes: String,
        finished_at: DateTime<Utc>,
    ) -> Self {
        self.status = ReconcileStatus::Failed;
        self.checked = checked;
        self.drift_fixed = drift_fixed;
        self.notes = Some(notes);
        self.finished_at = Some(finished_at);
        self
    }
}

/// Filter for listing outbox entries.
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub integration_id: Option<String>,
    pub status: Option<OutboxStatus>,
}

/// Number of entries of one integration in one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub integration_id: String,
    pub status: OutboxStatus,
    pub count: u64,
}

/// Per-integration outbox depth by status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrationStats {
    pub integration_id: String,
    pub queued: u64,
    pub leased: u64,
    pub delivered: u64,
    pub retry_scheduled: u64,
    pub dead_lettered: u64,
}

impl IntegrationStats {
    pub fn new(integration_id: impl Into<String>) -> Self {
        Self {
            integration_id: integration_id.into(),
            ..Default::default()
        }
    }

    pub fn add(&mut self, status: OutboxStatus, count: u64) {
        let slot = match status {
            OutboxStatus::Queued => &mut self.queued,
            OutboxStatus::Leased => &mut self.leased,
            OutboxStatus::Delivered => &mut self.delivered,
            OutboxStatus::RetryScheduled => &mut self.retry_scheduled,
            OutboxStatus::DeadLettered => &mut self.dead_lettered,
        };
        *slot += count;
    }
}

/// Maximum stored length of `last_error`, in characters.
pub const LAST_ERROR_MAX_CHARS: usize = 1024;

/// Truncate a failure description to [`LAST_ERROR_MAX_CHARS`].
pub fn truncate_error(detail: &str) -> String {
    detail.chars().take(LAST_ERROR_MAX_CHARS).collect()
}
