use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use courier_core::health::healthz;
use courier_core::middleware::{propagate_request_id_layer, request_id_layer};

use crate::handlers::{
    health::readyz,
    outbox::{dispatch_now, enqueue, get_entry, get_stats, list_entries},
    reconcile::{list_runs, reconcile},
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Outbox
        .route("/outbox/entries", post(enqueue))
        .route("/outbox/entries", get(list_entries))
        .route("/outbox/entries/{id}", get(get_entry))
        .route("/outbox/stats", get(get_stats))
        .route("/outbox/dispatch", post(dispatch_now))
        // Reconcile
        .route("/reconcile", post(reconcile))
        .route("/reconcile/runs", get(list_runs))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id_layer())
        .layer(request_id_layer())
}
