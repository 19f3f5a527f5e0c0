use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::json;
use uuid::Uuid;

use courier_domain::pagination::PageRequest;
use courier_domain::status::{OutboxStatus, ReconcileStatus};
use courier_outbox::domain::backoff::RetryPolicy;
use courier_outbox::domain::delivery::{
    DeliveryAdapter, DeliveryError, DeliveryReceipt, DeliveryRequest,
};
use courier_outbox::domain::idempotency::CanonicalRequest;
use courier_outbox::domain::repository::{OutboxRepository, ReconcileRunRepository};
use courier_outbox::domain::types::{
    Completion, EntryFilter, Lease, NewOutboxEntry, OutboxEntry, ReconcileRun, StatusCount,
};
use courier_outbox::error::OutboxServiceError;
use courier_outbox::usecase::dispatch::DispatchSettings;
use courier_outbox::usecase::reconcile::ReconcileSettings;

// ── Fixtures ─────────────────────────────────────────────────────────────────

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn dispatch_settings() -> DispatchSettings {
    DispatchSettings {
        retry: RetryPolicy {
            max_attempts: 8,
            base: StdDuration::from_secs(5),
            max: StdDuration::from_secs(3600),
        },
        lease_duration: Duration::minutes(5),
        delivery_timeout: StdDuration::from_secs(30),
    }
}

pub fn reconcile_settings() -> ReconcileSettings {
    ReconcileSettings {
        stale_threshold: Duration::hours(6),
        max_items: 3000,
    }
}

/// A `queued` entry for `integration_id`, created and due at `at`.
pub fn queued_entry(integration_id: &str, resource_id: &str, at: DateTime<Utc>) -> OutboxEntry {
    let request = CanonicalRequest::new(
        Some(integration_id),
        Some("post_message"),
        Some(resource_id),
        Some(&json!({ "text": format!("hello {resource_id}") })),
    )
    .unwrap();
    OutboxEntry {
        id: Uuid::now_v7(),
        integration_id: request.integration_id,
        operation: request.operation,
        stable_resource_id: request.stable_resource_id,
        payload: request.payload,
        idempotency_key: request.idempotency_key,
        status: OutboxStatus::Queued,
        attempt_count: 0,
        next_attempt_at: at,
        lease_owner: None,
        lease_expires_at: None,
        last_error: None,
        created_at: at,
        updated_at: at,
    }
}

/// A `leased` entry held by `owner` until `expires_at`.
pub fn leased_entry(
    integration_id: &str,
    resource_id: &str,
    owner: &str,
    leased_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> OutboxEntry {
    let mut entry = queued_entry(integration_id, resource_id, leased_at);
    entry.status = OutboxStatus::Leased;
    entry.lease_owner = Some(owner.to_owned());
    entry.lease_expires_at = Some(expires_at);
    entry
}

// ── InMemoryOutboxRepo ───────────────────────────────────────────────────────

/// Outbox store with the same conditional-update guards as the database.
#[derive(Clone, Default)]
pub struct InMemoryOutboxRepo {
    pub entries: Arc<Mutex<Vec<OutboxEntry>>>,
    /// Successful state-changing writes.
    pub writes: Arc<AtomicUsize>,
    /// Number of upcoming key lookups that answer `None` regardless of contents.
    pub hidden_key_lookups: Arc<AtomicUsize>,
    /// Successful requeues allowed before `requeue` starts failing.
    pub requeue_budget: Arc<Mutex<Option<u32>>>,
}

impl InMemoryOutboxRepo {
    pub fn new(entries: Vec<OutboxEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
            ..Default::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns a shared handle to the stored entries for post-execution inspection.
    pub fn entries_handle(&self) -> Arc<Mutex<Vec<OutboxEntry>>> {
        Arc::clone(&self.entries)
    }

    pub fn get(&self, id: Uuid) -> OutboxEntry {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .expect("entry exists")
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn hide_next_key_lookups(&self, n: usize) {
        self.hidden_key_lookups.store(n, Ordering::SeqCst);
    }

    pub fn fail_requeue_after(&self, successes: u32) {
        *self.requeue_budget.lock().unwrap() = Some(successes);
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl OutboxRepository for InMemoryOutboxRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEntry>, OutboxServiceError> {
        Ok(self.entries.lock().unwrap().iter().find(|e| e.id == id).cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<OutboxEntry>, OutboxServiceError> {
        let hidden = self
            .hidden_key_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if hidden {
            return Ok(None);
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.idempotency_key == key)
            .cloned())
    }

    async fn create(
        &self,
        entry: &NewOutboxEntry,
    ) -> Result<Option<OutboxEntry>, OutboxServiceError> {
        let mut entries = self.entries.lock().unwrap();
        if entries
            .iter()
            .any(|e| e.idempotency_key == entry.idempotency_key)
        {
            return Ok(None);
        }
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
        entries.push(created.clone());
        drop(entries);
        self.wrote();
        Ok(Some(created))
    }

    async fn list_eligible(
        &self,
        integration_id: &str,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        let mut eligible: Vec<OutboxEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.integration_id == integration_id && e.is_eligible(now))
            .cloned()
            .collect();
        eligible.sort_by_key(|e| e.next_attempt_at);
        eligible.truncate(limit as usize);
        Ok(eligible)
    }

    async fn try_lease(
        &self,
        id: Uuid,
        expected: OutboxStatus,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries
            .iter_mut()
            .find(|e| e.id == id && e.status == expected && e.next_attempt_at <= now)
        else {
            return Ok(false);
        };
        entry.status = OutboxStatus::Leased;
        entry.lease_owner = Some(lease.owner.clone());
        entry.lease_expires_at = Some(lease.expires_at);
        entry.updated_at = now;
        drop(entries);
        self.wrote();
        Ok(true)
    }

    async fn complete(
        &self,
        id: Uuid,
        owner: &str,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.iter_mut().find(|e| {
            e.id == id
                && e.status == OutboxStatus::Leased
                && e.lease_owner.as_deref() == Some(owner)
                && e.attempt_count < completion.attempt_count()
        }) else {
            return Ok(false);
        };
        entry.status = completion.status();
        entry.attempt_count = completion.attempt_count();
        entry.lease_owner = None;
        entry.lease_expires_at = None;
        entry.last_error = completion.last_error().map(str::to_owned);
        if let Completion::RetryScheduled {
            next_attempt_at, ..
        } = completion
        {
            entry.next_attempt_at = *next_attempt_at;
        }
        entry.updated_at = now;
        drop(entries);
        self.wrote();
        Ok(true)
    }

    async fn list_drifted(
        &self,
        integration_id: &str,
        now: DateTime<Utc>,
        stale_threshold: Duration,
        limit: u64,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        let mut drifted: Vec<OutboxEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.integration_id == integration_id && e.drift(now, stale_threshold).is_some()
            })
            .cloned()
            .collect();
        drifted.sort_by_key(|e| e.created_at);
        drifted.truncate(limit as usize);
        Ok(drifted)
    }

    async fn requeue(
        &self,
        observed: &OutboxEntry,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError> {
        {
            let mut budget = self.requeue_budget.lock().unwrap();
            if let Some(remaining) = budget.as_mut() {
                if *remaining == 0 {
                    return Err(anyhow::anyhow!("store unavailable").into());
                }
                *remaining -= 1;
            }
        }
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.iter_mut().find(|e| {
            e.id == observed.id
                && e.status == observed.status
                && if observed.status == OutboxStatus::Leased {
                    e.lease_owner == observed.lease_owner
                        && e.lease_expires_at == observed.lease_expires_at
                        && e.lease_expires_at.is_none_or(|at| at < now)
                } else {
                    e.next_attempt_at == observed.next_attempt_at
                }
        }) else {
            return Ok(false);
        };
        entry.status = OutboxStatus::Queued;
        entry.lease_owner = None;
        entry.lease_expires_at = None;
        entry.next_attempt_at = now;
        entry.updated_at = now;
        drop(entries);
        self.wrote();
        Ok(true)
    }

    async fn list(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        let mut matching: Vec<OutboxEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                filter
                    .integration_id
                    .as_deref()
                    .is_none_or(|id| e.integration_id == id)
                    && filter.status.is_none_or(|s| e.status == s)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|e| std::cmp::Reverse(e.created_at));
        Ok(matching
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.limit() as usize)
            .collect())
    }

    async fn count_by_status(
        &self,
        integration_id: Option<&str>,
    ) -> Result<Vec<StatusCount>, OutboxServiceError> {
        let mut counts: Vec<StatusCount> = Vec::new();
        for entry in self.entries.lock().unwrap().iter() {
            if integration_id.is_some_and(|id| entry.integration_id != id) {
                continue;
            }
            match counts
                .iter_mut()
                .find(|c| c.integration_id == entry.integration_id && c.status == entry.status)
            {
                Some(row) => row.count += 1,
                None => counts.push(StatusCount {
                    integration_id: entry.integration_id.clone(),
                    status: entry.status,
                    count: 1,
                }),
            }
        }
        Ok(counts)
    }
}

// ── StaleScanRepo ────────────────────────────────────────────────────────────

/// Answers `list_eligible` from a snapshot taken earlier, as a worker that
/// scanned before a competitor claimed would see it. Writes go to `inner`.
#[derive(Clone)]
pub struct StaleScanRepo {
    pub inner: InMemoryOutboxRepo,
    pub snapshot: Vec<OutboxEntry>,
}

impl OutboxRepository for StaleScanRepo {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEntry>, OutboxServiceError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<OutboxEntry>, OutboxServiceError> {
        self.inner.find_by_idempotency_key(key).await
    }

    async fn create(
        &self,
        entry: &NewOutboxEntry,
    ) -> Result<Option<OutboxEntry>, OutboxServiceError> {
        self.inner.create(entry).await
    }

    async fn list_eligible(
        &self,
        _integration_id: &str,
        _now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        Ok(self.snapshot.iter().take(limit as usize).cloned().collect())
    }

    async fn try_lease(
        &self,
        id: Uuid,
        expected: OutboxStatus,
        lease: &Lease,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError> {
        self.inner.try_lease(id, expected, lease, now).await
    }

    async fn complete(
        &self,
        id: Uuid,
        owner: &str,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError> {
        self.inner.complete(id, owner, completion, now).await
    }

    async fn list_drifted(
        &self,
        integration_id: &str,
        now: DateTime<Utc>,
        stale_threshold: Duration,
        limit: u64,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        self.inner
            .list_drifted(integration_id, now, stale_threshold, limit)
            .await
    }

    async fn requeue(
        &self,
        observed: &OutboxEntry,
        now: DateTime<Utc>,
    ) -> Result<bool, OutboxServiceError> {
        self.inner.requeue(observed, now).await
    }

    async fn list(
        &self,
        filter: &EntryFilter,
        page: PageRequest,
    ) -> Result<Vec<OutboxEntry>, OutboxServiceError> {
        self.inner.list(filter, page).await
    }

    async fn count_by_status(
        &self,
        integration_id: Option<&str>,
    ) -> Result<Vec<StatusCount>, OutboxServiceError> {
        self.inner.count_by_status(integration_id).await
    }
}

// ── InMemoryReconcileRunRepo ─────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct InMemoryReconcileRunRepo {
    pub runs: Arc<Mutex<Vec<ReconcileRun>>>,
    /// Number of upcoming `finish` calls that fail without writing.
    pub failing_finishes: Arc<AtomicUsize>,
}

impl InMemoryReconcileRunRepo {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fail_next_finishes(&self, n: usize) {
        self.failing_finishes.store(n, Ordering::SeqCst);
    }

    pub fn runs_handle(&self) -> Arc<Mutex<Vec<ReconcileRun>>> {
        Arc::clone(&self.runs)
    }
}

impl ReconcileRunRepository for InMemoryReconcileRunRepo {
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
        self.runs.lock().unwrap().push(run.clone());
        Ok(run)
    }

    async fn finish(&self, run: &ReconcileRun) -> Result<bool, OutboxServiceError> {
        let failing = self
            .failing_finishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(anyhow::anyhow!("run store unavailable").into());
        }
        let mut runs = self.runs.lock().unwrap();
        let Some(stored) = runs
            .iter_mut()
            .find(|r| r.id == run.id && r.status == ReconcileStatus::Running)
        else {
            return Ok(false);
        };
        *stored = run.clone();
        Ok(true)
    }

    async fn list_recent(
        &self,
        integration_id: Option<&str>,
        limit: u64,
    ) -> Result<Vec<ReconcileRun>, OutboxServiceError> {
        let mut runs: Vec<ReconcileRun> = self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| integration_id.is_none_or(|id| r.integration_id == id))
            .cloned()
            .collect();
        runs.sort_by_key(|r| std::cmp::Reverse(r.started_at));
        runs.truncate(limit as usize);
        Ok(runs)
    }
}

// ── ScriptedAdapter ──────────────────────────────────────────────────────────

/// Delivery adapter that replays scripted outcomes, then succeeds.
#[derive(Clone, Default)]
pub struct ScriptedAdapter {
    pub script: Arc<Mutex<VecDeque<Result<DeliveryReceipt, DeliveryError>>>>,
    /// Idempotency keys of every delivery attempt, in call order.
    pub calls: Arc<Mutex<Vec<String>>>,
    /// Simulated call latency.
    pub latency: Option<StdDuration>,
    /// When set, every delivery hands all leases in this store to another worker.
    pub hijack: Option<InMemoryOutboxRepo>,
}

impl ScriptedAdapter {
    pub fn succeeding() -> Self {
        Self::default()
    }

    pub fn with_script(outcomes: Vec<Result<DeliveryReceipt, DeliveryError>>) -> Self {
        Self {
            script: Arc::new(Mutex::new(outcomes.into())),
            ..Default::default()
        }
    }

    /// Always fails retryably.
    pub fn always_retryable(times: usize) -> Self {
        Self::with_script(
            (0..times)
                .map(|i| Err(DeliveryError::retryable(format!("gateway 503 #{i}"))))
                .collect(),
        )
    }

    pub fn calls_handle(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.calls)
    }
}

impl DeliveryAdapter for ScriptedAdapter {
    async fn deliver(
        &self,
        request: DeliveryRequest<'_>,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        self.calls
            .lock()
            .unwrap()
            .push(request.idempotency_key.to_owned());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(store) = &self.hijack {
            for entry in store.entries.lock().unwrap().iter_mut() {
                if entry.status == OutboxStatus::Leased {
                    entry.lease_owner = Some("intruder".to_owned());
                }
            }
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(DeliveryReceipt {
                detail: "ok".to_owned(),
            })
        })
    }
}
