use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::OutboxConfig;
use crate::infra::db::{DbOutboxRepository, DbReconcileRunRepository};
use crate::infra::delivery::HttpDeliveryAdapter;
use crate::usecase::dispatch::DispatchUseCase;
use crate::usecase::reconcile::{IntegrationLocks, ReconcileUseCase};

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub delivery: HttpDeliveryAdapter,
    pub config: Arc<OutboxConfig>,
    pub reconcile_locks: IntegrationLocks,
}

impl AppState {
    pub fn new(db: DatabaseConnection, config: OutboxConfig) -> anyhow::Result<Self> {
        let delivery = HttpDeliveryAdapter::new(
            &config.delivery_gateway_url,
            config.delivery_gateway_token.clone(),
            config.delivery_timeout(),
        )?;
        Ok(Self {
            db,
            delivery,
            config: Arc::new(config),
            reconcile_locks: IntegrationLocks::default(),
        })
    }

    pub fn outbox_repo(&self) -> DbOutboxRepository {
        DbOutboxRepository {
            db: self.db.clone(),
        }
    }

    pub fn reconcile_run_repo(&self) -> DbReconcileRunRepository {
        DbReconcileRunRepository {
            db: self.db.clone(),
        }
    }

    pub fn dispatch_usecase(&self) -> DispatchUseCase<DbOutboxRepository, HttpDeliveryAdapter> {
        DispatchUseCase {
            repo: self.outbox_repo(),
            adapter: self.delivery.clone(),
            settings: self.config.dispatch_settings(),
        }
    }

    pub fn reconcile_usecase(
        &self,
    ) -> ReconcileUseCase<DbOutboxRepository, DbReconcileRunRepository> {
        ReconcileUseCase {
            entries: self.outbox_repo(),
            runs: self.reconcile_run_repo(),
            settings: self.config.reconcile_settings(),
        }
    }
}
