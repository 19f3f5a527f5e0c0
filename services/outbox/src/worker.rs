//! Background loops: the dispatcher pool and the reconcile scheduler.
//!
//! Both stop on cancellation. A dispatcher finishes the batch it already
//! claimed before it stops; entries it never reached stay leased until
//! their lease expires and the reconciler requeues them.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::delivery::DeliveryAdapter;
use crate::domain::repository::{OutboxRepository, ReconcileRunRepository};
use crate::error::OutboxServiceError;
use crate::infra::db::{DbOutboxRepository, DbReconcileRunRepository};
use crate::infra::delivery::HttpDeliveryAdapter;
use crate::state::AppState;
use crate::usecase::dispatch::{DispatchInput, DispatchUseCase};
use crate::usecase::reconcile::{IntegrationLocks, ReconcileUseCase};

// ── Dispatcher ───────────────────────────────────────────────────────────────

pub struct DispatcherWorker<R, D>
where
    R: OutboxRepository + Clone,
    D: DeliveryAdapter,
{
    pub worker_id: String,
    pub integration_id: String,
    pub usecase: DispatchUseCase<R, D>,
    pub batch_size: u64,
    pub poll_interval: Duration,
}

impl<R, D> DispatcherWorker<R, D>
where
    R: OutboxRepository + Clone,
    D: DeliveryAdapter,
{
    /// Claim and dispatch batches until `token` is cancelled.
    ///
    /// A full batch is followed immediately by the next claim; a short or
    /// failed one waits `poll_interval`.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(
            worker_id = %self.worker_id,
            integration_id = %self.integration_id,
            "dispatcher started"
        );
        while !token.is_cancelled() {
            let result = self
                .usecase
                .execute(DispatchInput {
                    integration_id: self.integration_id.clone(),
                    worker_id: self.worker_id.clone(),
                    limit: self.batch_size,
                })
                .await;
            let idle = match result {
                Ok(report) => {
                    if report.claimed > 0 {
                        tracing::debug!(
                            worker_id = %self.worker_id,
                            integration_id = %self.integration_id,
                            claimed = report.claimed,
                            delivered = report.delivered,
                            retry_scheduled = report.retry_scheduled,
                            dead_lettered = report.dead_lettered,
                            lease_lost = report.lease_lost,
                            "dispatch cycle finished"
                        );
                    }
                    u64::from(report.claimed) < self.batch_size
                }
                Err(e) => {
                    tracing::error!(
                        worker_id = %self.worker_id,
                        integration_id = %self.integration_id,
                        error = %format!("{e:#}"),
                        "dispatch cycle failed"
                    );
                    true
                }
            };
            if idle {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        tracing::info!(
            worker_id = %self.worker_id,
            integration_id = %self.integration_id,
            "dispatcher stopped"
        );
    }
}

// ── Reconcile scheduler ──────────────────────────────────────────────────────

pub struct ReconcileScheduler<R, S>
where
    R: OutboxRepository,
    S: ReconcileRunRepository,
{
    pub integrations: Vec<String>,
    pub usecase: ReconcileUseCase<R, S>,
    pub interval: Duration,
    pub locks: IntegrationLocks,
}

impl<R, S> ReconcileScheduler<R, S>
where
    R: OutboxRepository,
    S: ReconcileRunRepository,
{
    /// Sweep every integration once per `interval`, starting immediately.
    pub async fn run(&self, token: CancellationToken) {
        tracing::info!(
            integrations = ?self.integrations,
            interval_secs = self.interval.as_secs(),
            "reconcile scheduler started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            for integration_id in &self.integrations {
                if token.is_cancelled() {
                    break;
                }
                self.sweep(integration_id).await;
            }
        }
        tracing::info!("reconcile scheduler stopped");
    }

    async fn sweep(&self, integration_id: &str) {
        let _guard = self.locks.acquire(integration_id).await;
        match self.usecase.execute(integration_id).await {
            Ok(_) => {}
            // Already recorded on the run and logged by the sweep.
            Err(OutboxServiceError::ReconcileFailed { .. }) => {}
            Err(e) => tracing::error!(
                integration_id,
                error = %format!("{e:#}"),
                "reconcile sweep could not start"
            ),
        }
    }
}

// ── Wiring ───────────────────────────────────────────────────────────────────

/// `DISPATCHER_WORKERS` dispatchers for every configured integration.
pub fn dispatcher_pool(
    state: &AppState,
) -> Vec<DispatcherWorker<DbOutboxRepository, HttpDeliveryAdapter>> {
    let config = &state.config;
    config
        .integrations
        .iter()
        .flat_map(|integration_id| {
            (0..config.dispatcher_workers).map(move |index| DispatcherWorker {
                worker_id: format!("{integration_id}-{index}-{}", Uuid::now_v7()),
                integration_id: integration_id.clone(),
                usecase: state.dispatch_usecase(),
                batch_size: config.claim_batch_size,
                poll_interval: Duration::from_secs(config.dispatch_poll_interval_secs),
            })
        })
        .collect()
}

pub fn reconcile_scheduler(
    state: &AppState,
) -> ReconcileScheduler<DbOutboxRepository, DbReconcileRunRepository> {
    ReconcileScheduler {
        integrations: state.config.integrations.clone(),
        usecase: state.reconcile_usecase(),
        interval: Duration::from_secs(state.config.reconcile_interval_secs),
        locks: state.reconcile_locks.clone(),
    }
}

/// Run the dispatcher pool and the reconcile scheduler until `token` is cancelled.
pub async fn run_background(state: AppState, token: CancellationToken) {
    let workers = dispatcher_pool(&state);
    let scheduler = reconcile_scheduler(&state);
    let dispatchers = join_all(workers.iter().map(|worker| worker.run(token.clone())));
    tokio::join!(dispatchers, scheduler.run(token.clone()));
}
